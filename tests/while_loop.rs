mod common;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use canvasflow::nodes::{ConditionEvaluator, EvaluationContext};
use canvasflow::provider::ChatResponse;
use canvasflow::scheduler::{ExecutionError, ExecutionOptions};
use canvasflow::workflow::{IterationPolicy, Workflow};
use common::*;

/// Start → While(w){body → bodyAgent, done → out}.
fn loop_workflow(configure: impl FnOnce(&mut canvasflow::workflow::WhileLoopData)) -> Workflow {
    Workflow::new(
        [
            canvasflow::workflow::Node::start("start"),
            while_loop("w", configure),
            agent("body", "append a dot"),
            // The loop result is the interesting output; the body repeats
            // in the chain.
            out_with("out", |data| data.sources = Some(vec!["w".to_string()])),
        ],
        [
            edge("e1", "start", "w"),
            edge_on("e2", "w", "body", "body"),
            edge_on("e3", "w", "done", "out"),
        ],
    )
}

/// Condition replies come from a script; the body appends a dot to its
/// input.
fn loop_stub(conditions: Vec<&'static str>) -> StubProvider {
    let conditions = Mutex::new(VecDeque::from(conditions));
    StubProvider::returning(move |_, messages| {
        let system = messages
            .first()
            .map(canvasflow::message::ChatMessage::text)
            .unwrap_or_default();
        if system.contains("loop controller") {
            let reply = conditions
                .lock()
                .unwrap()
                .pop_front()
                .expect("condition script exhausted");
            return Ok(ChatResponse::text(reply));
        }
        let current = messages
            .iter()
            .rev()
            .find(|m| m.has_role(canvasflow::message::ChatMessage::USER))
            .map(canvasflow::message::ChatMessage::text)
            .unwrap_or_default();
        Ok(ChatResponse::text(format!("{current}.")))
    })
}

#[tokio::test]
async fn loop_runs_until_the_condition_says_done() {
    // S4: continue twice, then done; body appends "." per iteration.
    let (executor, _stub) = executor(loop_stub(vec!["continue", "continue", "done"]));
    let report = executor
        .run(&loop_workflow(|_| {}), "", ExecutionOptions::default())
        .await
        .unwrap();

    assert_eq!(report.outputs["w"], "...");
    assert_eq!(report.output, "...");
}

#[tokio::test]
async fn max_iterations_one_runs_the_body_once() {
    let (executor, stub) = executor(loop_stub(vec![]));
    let report = executor
        .run(
            &loop_workflow(|data| data.max_iterations = Some(1)),
            "",
            ExecutionOptions::default(),
        )
        .await
        .unwrap();

    // One body call, no condition calls, exit on the done handle.
    assert_eq!(report.outputs["w"], ".");
    assert_eq!(stub.call_count(), 1);
    assert!(report.node_chain.contains(&"out".to_string()));
}

#[tokio::test]
async fn exhausting_the_budget_with_error_policy_fails() {
    let (executor, _stub) = executor(loop_stub(vec!["continue", "continue", "continue"]));
    let err = executor
        .run(
            &loop_workflow(|data| {
                data.max_iterations = Some(3);
                data.on_max_iterations = Some(IterationPolicy::Error);
            }),
            "",
            ExecutionOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::NodeFailed { ref node_id, .. } if node_id == "w"));
}

#[tokio::test]
async fn exhausting_the_budget_with_warning_policy_emits_done() {
    let (executor, _stub) = executor(loop_stub(vec!["continue", "continue"]));
    let report = executor
        .run(
            &loop_workflow(|data| data.max_iterations = Some(3)),
            "",
            ExecutionOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(report.outputs["w"], "...");
}

struct CountingEvaluator {
    limit: u32,
    seen: Arc<Mutex<Vec<u32>>>,
}

#[async_trait]
impl ConditionEvaluator for CountingEvaluator {
    async fn evaluate(
        &self,
        evaluation: EvaluationContext,
    ) -> Result<bool, canvasflow::nodes::NodeError> {
        self.seen.lock().unwrap().push(evaluation.iteration);
        Ok(evaluation.iteration < self.limit)
    }
}

#[tokio::test]
async fn custom_evaluator_replaces_the_llm_condition() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let evaluator = Arc::new(CountingEvaluator {
        limit: 2,
        seen: seen.clone(),
    });

    let (executor, stub) = executor(loop_stub(vec![]));
    let report = executor
        .run(
            &loop_workflow(|data| {
                data.condition_prompt = None;
                data.custom_evaluator = Some("counter".to_string());
            }),
            "",
            ExecutionOptions::default().with_evaluator("counter", evaluator),
        )
        .await
        .unwrap();

    // Two body iterations: the evaluator stopped at iteration 2.
    assert_eq!(report.outputs["w"], "..");
    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    // Only body calls hit the provider.
    assert_eq!(stub.call_count(), 2);
}

#[tokio::test]
async fn runaway_body_counts_against_the_circuit_breaker() {
    let (executor, _stub) = executor(loop_stub(vec![
        "continue", "continue", "continue", "continue", "continue", "continue",
    ]));
    let err = executor
        .run(
            &loop_workflow(|data| data.max_iterations = Some(50)),
            "",
            ExecutionOptions::default().with_max_node_executions(4),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::CircuitBreakerTripped { .. }));
}
