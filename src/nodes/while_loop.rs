//! While-loop node: conditional iteration over a body subgraph.

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::context::ExecutionContext;
use crate::memory::MemoryAdapter;
use crate::message::ChatMessage;
use crate::provider::ChatOptions;
use crate::workflow::{handles, IterationPolicy, WhileLoopData};

use super::chat_loop::emit_on_handle;
use super::NodeError;
use super::NodeExecution;

const CONDITION_SYSTEM_PROMPT: &str = "You are a loop controller. Decide whether the loop should \
run another iteration based on the condition below. Respond with exactly one word: \"continue\" \
to run another iteration, or \"done\" to stop.";

/// Host-registered replacement for the LLM condition check.
#[async_trait]
pub trait ConditionEvaluator: Send + Sync {
    /// Return `true` to run another iteration.
    async fn evaluate(&self, evaluation: EvaluationContext) -> Result<bool, NodeError>;
}

/// Everything an evaluator can see.
#[derive(Clone)]
pub struct EvaluationContext {
    pub current_input: String,
    pub last_output: Option<String>,
    pub iteration: u32,
    pub session_id: String,
    pub outputs: FxHashMap<String, String>,
    pub memory: Option<Arc<dyn MemoryAdapter>>,
}

pub(crate) async fn execute(
    ctx: &ExecutionContext,
    data: &WhileLoopData,
) -> Result<NodeExecution, NodeError> {
    let max_iterations = data.max_iterations();
    if max_iterations == 0 {
        return Err(NodeError::InvalidConfig(
            "while-loop maxIterations must be greater than zero".to_string(),
        ));
    }
    let body_start = ctx
        .targets(handles::BODY)
        .into_iter()
        .next()
        .ok_or_else(|| {
            NodeError::InvalidConfig("while-loop has no edge on the body handle".to_string())
        })?;

    let mut current = ctx.input.clone();
    let mut iteration: u32 = 0;

    while iteration < max_iterations {
        ctx.ensure_active()?;
        // The first iteration runs unconditioned.
        if iteration > 0 && !should_continue(ctx, data, &current, iteration).await? {
            break;
        }

        // Body iterations count against this node's circuit breaker.
        ctx.bump_execution_count(&ctx.node_id)?;
        debug!(node = %ctx.node_id, iteration, "running loop body");
        let outcome = ctx
            .execute_subgraph(&body_start, &current)
            .await
            .map_err(|err| NodeError::Nested(Box::new(err)))?;
        current = outcome.output;
        iteration += 1;
    }

    if iteration == max_iterations {
        match data.on_max_iterations.unwrap_or_default() {
            IterationPolicy::Error => {
                return Err(NodeError::MaxLoopIterations {
                    limit: max_iterations,
                });
            }
            IterationPolicy::Warning => {
                warn!(node = %ctx.node_id, limit = max_iterations, "loop exhausted its iteration budget");
            }
        }
    }

    Ok(emit_on_handle(ctx, current, handles::DONE))
}

async fn should_continue(
    ctx: &ExecutionContext,
    data: &WhileLoopData,
    current: &str,
    iteration: u32,
) -> Result<bool, NodeError> {
    if let Some(name) = &data.custom_evaluator {
        if let Some(evaluator) = ctx.custom_evaluator(name) {
            return evaluator
                .evaluate(EvaluationContext {
                    current_input: current.to_string(),
                    last_output: Some(current.to_string()),
                    iteration,
                    session_id: ctx.session_id().to_string(),
                    outputs: ctx.outputs(),
                    memory: ctx.memory(),
                })
                .await;
        }
        warn!(node = %ctx.node_id, evaluator = %name, "custom evaluator not registered, using LLM condition");
    }

    let condition = data.condition_prompt.as_deref().ok_or_else(|| {
        NodeError::InvalidConfig("while-loop has no condition prompt".to_string())
    })?;
    let model = ctx.resolve_model(data.condition_model.as_deref())?;

    let system = format!("{CONDITION_SYSTEM_PROMPT}\n\nCondition: {condition}");
    let user = format!("Iteration: {iteration}\nCurrent value:\n{current}");
    let response = ctx
        .provider()
        .chat(
            &model,
            &[ChatMessage::system(system), ChatMessage::user(user)],
            ChatOptions {
                temperature: Some(0.0),
                max_tokens: Some(10),
                cancel: Some(ctx.cancel().clone()),
                ..Default::default()
            },
        )
        .await?;
    if let Some(usage) = &response.usage {
        ctx.record_usage(usage);
    }

    let reply = response.content.unwrap_or_default();
    Ok(reply.to_lowercase().contains("continue"))
}
