//! Agent node: one LLM call with an optional tool-calling loop.

use tracing::warn;

use crate::context::ExecutionContext;
use crate::workflow::{handles, AgentData};

use super::chat_loop::{run_chat_loop, ChatLoopSpec, StreamTarget};
use super::{NodeError, NodeExecution, Transition};

pub(crate) async fn execute(
    ctx: &ExecutionContext,
    data: &AgentData,
) -> Result<NodeExecution, NodeError> {
    let model = ctx.resolve_model(data.model.as_deref())?;

    ctx.maybe_compact(&model).await;

    let system_prompt = compose_system_prompt(ctx, data);
    let tools = match &data.tools {
        Some(names) if !names.is_empty() => ctx.tools().resolve(names),
        _ => ctx.tools().all(),
    };

    let outcome = run_chat_loop(
        ctx,
        ChatLoopSpec {
            model,
            system_prompt,
            seed_history: ctx.history(),
            user_text: ctx.input.clone(),
            attachments: ctx.attachments(),
            tools,
            temperature: data.temperature,
            max_tokens: data.max_tokens,
            max_iterations: data
                .max_tool_iterations
                .unwrap_or_else(|| ctx.max_tool_iterations()),
            on_limit: data
                .on_max_tool_iterations
                .unwrap_or_else(|| ctx.tool_iteration_policy()),
            stream: StreamTarget::Node,
        },
    )
    .await;

    match outcome {
        Ok(outcome) => {
            let next = ctx
                .targets(handles::OUTPUT)
                .into_iter()
                .map(Transition::to)
                .collect();
            Ok(NodeExecution::new(outcome.content)
                .with_next(next)
                .with_messages(outcome.new_messages))
        }
        // A human rejection drains through the rejected handle when wired.
        Err(NodeError::HitlRejected { reason }) if ctx.has_handle(handles::REJECTED) => {
            warn!(node = %ctx.node_id, %reason, "tool loop rejected by reviewer");
            let next = ctx
                .targets(handles::REJECTED)
                .into_iter()
                .map(Transition::to)
                .collect();
            Ok(NodeExecution::new(reason).with_next(next))
        }
        Err(err) => Err(err),
    }
}

/// Configured prompt plus a context block summarizing earlier outputs.
fn compose_system_prompt(ctx: &ExecutionContext, data: &AgentData) -> Option<String> {
    let chain = ctx.node_chain();
    let outputs = ctx.outputs();

    let mut lines: Vec<String> = Vec::new();
    for node_id in &chain {
        if node_id == &ctx.node_id {
            continue;
        }
        let Some(output) = outputs.get(node_id) else {
            continue;
        };
        if output.is_empty() {
            continue;
        }
        let label = ctx
            .get_node(node_id)
            .map(|node| node.label().to_string())
            .unwrap_or_else(|| node_id.clone());
        lines.push(format!("- {label}: {output}"));
    }

    match (&data.prompt, lines.is_empty()) {
        (Some(prompt), true) => Some(prompt.clone()),
        (Some(prompt), false) => Some(format!(
            "{prompt}\n\nContext from previous agents:\n{}",
            lines.join("\n")
        )),
        (None, true) => None,
        (None, false) => Some(format!(
            "Context from previous agents:\n{}",
            lines.join("\n")
        )),
    }
}
