//! Start node: pass-through entry point.

use crate::context::ExecutionContext;

use super::{NodeError, NodeExecution, Transition};

/// Output = input; successors = every outgoing edge. Never fails.
pub(crate) fn execute(ctx: &ExecutionContext) -> Result<NodeExecution, NodeError> {
    let next = ctx
        .outgoing_edges(&ctx.node_id, None)
        .into_iter()
        .map(|edge| Transition::to(edge.target.clone()))
        .collect();
    Ok(NodeExecution::new(ctx.input.clone()).with_next(next))
}
