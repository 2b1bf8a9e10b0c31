//! Subflow node: invocation of a registered reusable workflow.

use serde_json::Value;
use tracing::warn;

use crate::context::ExecutionContext;
use crate::scheduler::ExecutionInput;
use crate::workflow::{handles, SubflowData};

use super::{NodeError, NodeExecution, Transition};

pub(crate) async fn execute(
    ctx: &ExecutionContext,
    data: &SubflowData,
) -> Result<NodeExecution, NodeError> {
    let depth = ctx.subflow_depth();
    let limit = ctx.max_subflow_depth();
    if depth >= limit {
        return Err(NodeError::MaxSubflowDepthExceeded { depth, limit });
    }

    let subflow_id = data
        .subflow_id
        .as_deref()
        .ok_or_else(|| NodeError::InvalidConfig("subflow node has no subflowId".to_string()))?;
    let definition = ctx
        .subflows()
        .get(subflow_id)
        .ok_or_else(|| NodeError::SubflowNotFound {
            id: subflow_id.to_string(),
        })?;

    for input in &definition.inputs {
        if input.required
            && input.default.is_none()
            && !data.input_mappings.contains_key(&input.id)
        {
            return Err(NodeError::MissingInputMapping {
                input: input.id.clone(),
            });
        }
    }

    // The definition's first input feeds the embedded start node.
    let primary = match definition.primary_input() {
        Some(port) => match data.input_mappings.get(&port.id) {
            Some(mapped) => resolve_mapping(ctx, mapped),
            None => port
                .default
                .as_ref()
                .map(value_to_string)
                .unwrap_or_default(),
        },
        None => ctx.input.clone(),
    };

    let result = ctx
        .execute_workflow(
            definition.workflow.clone(),
            ExecutionInput {
                text: primary,
                attachments: ctx.attachments(),
            },
            data.share_session(),
        )
        .await;

    match result {
        Ok(report) => {
            let next = ctx
                .targets(handles::OUTPUT)
                .into_iter()
                .map(Transition::to)
                .collect();
            Ok(NodeExecution::new(report.output).with_next(next))
        }
        Err(err) if ctx.has_handle(handles::ERROR) => {
            // Local recovery: the error string drains through the handle
            // and this node still completes.
            warn!(node = %ctx.node_id, error = %err, "subflow failed, routing error handle");
            let message = err.to_string();
            let next = ctx
                .targets(handles::ERROR)
                .into_iter()
                .map(Transition::to)
                .collect();
            Ok(NodeExecution::new(message).with_next(next))
        }
        Err(err) => Err(NodeError::Nested(Box::new(err))),
    }
}

/// Resolve a mapping value: literals pass through, `{{…}}` expressions
/// pull from the execution context, unknown expressions become empty.
fn resolve_mapping(ctx: &ExecutionContext, value: &Value) -> String {
    let Value::String(raw) = value else {
        return value_to_string(value);
    };
    let trimmed = raw.trim();
    let Some(expression) = trimmed
        .strip_prefix("{{")
        .and_then(|rest| rest.strip_suffix("}}"))
    else {
        return raw.clone();
    };

    let expression = expression.trim();
    match expression {
        "output" | "input" => ctx.input.clone(),
        "context.sessionId" => ctx.session_id().to_string(),
        _ => {
            if let Some(node_id) = expression.strip_prefix("outputs.") {
                ctx.output_of(node_id).unwrap_or_default()
            } else {
                String::new()
            }
        }
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
