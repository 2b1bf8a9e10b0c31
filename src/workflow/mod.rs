//! Workflow graph data model and JSON surface.
//!
//! A [`Workflow`] is the static description the editor persists: a set of
//! typed nodes joined by handle-tagged edges. Node behavior lives in
//! [`crate::nodes`]; this module only defines structure, lookups, and the
//! serialization contract (unknown fields are preserved on round-trip).

mod edge;
mod node;
#[allow(clippy::module_inception)]
mod workflow;

pub use edge::Edge;
pub use node::{
    AgentData, BranchSpec, IterationPolicy, MemoryData, MemoryOp, Node, NodeBody, OutputData,
    OutputFormat, OutputMode, ParallelData, RouterData, RouterFallback, StartData, SubflowData,
    SynthesisSpec, ToolData, ToolIterationPolicy, WhileLoopData,
};
pub use workflow::{Workflow, WorkflowExport, EXPORT_VERSION};

/// Named output handles with reserved meaning across node kinds.
pub mod handles {
    /// Default handle carrying a node's primary output. An edge without an
    /// explicit `sourceHandle` attaches here.
    pub const OUTPUT: &str = "output";
    /// Failure route: the scheduler redirects a node error to this handle
    /// when connected instead of failing the run.
    pub const ERROR: &str = "error";
    /// Human-rejection route used by HITL-gated handlers.
    pub const REJECTED: &str = "rejected";
    /// Fan-in handle of a parallel node in merge mode.
    pub const MERGED: &str = "merged";
    /// Entry into a while-loop body subgraph.
    pub const BODY: &str = "body";
    /// Exit of a while-loop after the condition stops the iteration.
    pub const DONE: &str = "done";

    /// Handles the router must not offer as routes.
    pub const RESERVED: &[&str] = &[ERROR, REJECTED];
}
