//! Per-run mutable state and the final report.

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::events::NodeStatus;
use crate::tokens::UsageTotals;

/// State the scheduler exclusively owns for one run.
#[derive(Debug, Default)]
pub(crate) struct RunState {
    /// Node id → last produced output; parallel branches add composite
    /// `"{parallelId}:{branchId}"` keys.
    pub outputs: FxHashMap<String, String>,
    pub statuses: FxHashMap<String, NodeStatus>,
    /// Nodes that actually executed, in completion order.
    pub chain: Vec<String>,
    pub counts: FxHashMap<String, u32>,
    pub metadata: FxHashMap<String, Value>,
    pub usage: UsageTotals,
}

/// What a completed run hands back to the caller.
#[derive(Clone, Debug)]
pub struct RunReport {
    /// Output of the last completed node.
    pub output: String,
    pub outputs: FxHashMap<String, String>,
    pub node_statuses: FxHashMap<String, NodeStatus>,
    pub node_chain: Vec<String>,
    /// Handler metadata keyed by node id (router decisions, branch
    /// failures).
    pub node_metadata: FxHashMap<String, Value>,
    pub usage: UsageTotals,
    pub session_id: String,
}

/// Result of a nested subgraph run.
#[derive(Clone, Debug)]
pub struct SubgraphOutcome {
    pub output: String,
}
