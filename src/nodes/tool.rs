//! Tool node: a direct registry invocation outside any LLM loop.

use crate::context::ExecutionContext;
use crate::workflow::{handles, ToolData};

use super::chat_loop::emit_on_handle;
use super::{NodeError, NodeExecution};

pub(crate) async fn execute(
    ctx: &ExecutionContext,
    data: &ToolData,
) -> Result<NodeExecution, NodeError> {
    let tool_id = data
        .tool_id
        .as_deref()
        .ok_or_else(|| NodeError::InvalidConfig("tool node has no toolId".to_string()))?;

    // Unlike tool calls inside an agent loop, a failing tool node is a
    // node failure (routable through the error handle).
    let output = ctx
        .tools()
        .execute(tool_id, &ctx.input, data.config.as_ref())
        .await?;

    Ok(emit_on_handle(ctx, output, handles::OUTPUT))
}
