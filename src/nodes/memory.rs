//! Memory node: store or retrieve long-term entries for the session.

use chrono::Utc;
use serde_json::Map;

use crate::context::ExecutionContext;
use crate::memory::{MemoryEntry, MemoryMetadata, MemoryQuery};
use crate::utils::id::short_id;
use crate::workflow::{handles, MemoryData, MemoryOp};

use super::chat_loop::emit_on_handle;
use super::{NodeError, NodeExecution};

pub(crate) async fn execute(
    ctx: &ExecutionContext,
    data: &MemoryData,
) -> Result<NodeExecution, NodeError> {
    let adapter = ctx.memory().ok_or_else(|| {
        NodeError::InvalidConfig("memory node requires a configured memory adapter".to_string())
    })?;

    let output = match data.operation() {
        MemoryOp::Store => {
            adapter
                .store(MemoryEntry {
                    id: short_id("mem"),
                    content: ctx.input.clone(),
                    metadata: MemoryMetadata {
                        timestamp: Utc::now(),
                        source: "workflow".to_string(),
                        node_id: Some(ctx.node_id.clone()),
                        session_id: Some(ctx.session_id().to_string()),
                        extra: Map::new(),
                    },
                })
                .await?;
            // Store passes the input through.
            ctx.input.clone()
        }
        MemoryOp::Retrieve => {
            let entries = adapter
                .query(MemoryQuery {
                    text: Some(ctx.input.clone()),
                    limit: Some(data.limit()),
                    session_id: Some(ctx.session_id().to_string()),
                    filter: None,
                })
                .await?;
            entries
                .iter()
                .map(|entry| entry.content.clone())
                .collect::<Vec<_>>()
                .join("\n\n")
        }
    };

    Ok(emit_on_handle(ctx, output, handles::OUTPUT))
}
