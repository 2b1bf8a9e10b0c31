//! Node kind handlers.
//!
//! Each kind implements one async function `execute(ctx, data) ->
//! Result<NodeExecution, NodeError>`. Handlers never mutate run state
//! directly: they return the produced output, the transitions to enqueue,
//! and any messages or composite-key records for the scheduler to
//! integrate. [`execute`] dispatches over the closed [`NodeBody`] variant.

mod agent;
mod chat_loop;
mod memory;
mod output;
mod parallel;
mod router;
mod start;
mod subflow;
mod tool;
mod while_loop;

pub use while_loop::{ConditionEvaluator, EvaluationContext};

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::context::ExecutionContext;
use crate::memory::MemoryError;
use crate::message::ChatMessage;
use crate::provider::ProviderError;
use crate::registry::ToolError;
use crate::scheduler::ExecutionError;
use crate::workflow::{Node, NodeBody};

/// One enqueued successor of a completed node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub target: String,
    /// Input override for the target; `None` means the node's own output.
    pub input: Option<String>,
}

impl Transition {
    #[must_use]
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            input: None,
        }
    }

    #[must_use]
    pub fn with_input(target: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            input: Some(input.into()),
        }
    }
}

/// What a handler hands back to the scheduler.
#[derive(Clone, Debug, Default)]
pub struct NodeExecution {
    /// The node's string output, recorded under its id.
    pub output: String,
    /// Successors to enqueue, in order.
    pub next: Vec<Transition>,
    /// Messages to append to the shared history.
    pub messages: Vec<ChatMessage>,
    /// Additional outputs recorded under composite keys
    /// (`"{parallelId}:{branchId}"`).
    pub records: Vec<(String, String)>,
    /// Handler-specific metadata (router decisions, branch failures).
    pub metadata: Option<Value>,
}

impl NodeExecution {
    #[must_use]
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_next(mut self, next: Vec<Transition>) -> Self {
        self.next = next;
        self
    }

    #[must_use]
    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    #[must_use]
    pub fn with_records(mut self, records: Vec<(String, String)>) -> Self {
        self.records = records;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Errors raised inside node handlers.
///
/// The scheduler routes any of these through the failing node's `error`
/// handle when one is connected; otherwise the run fails. Cancellation
/// and circuit-breaker variants are promoted to their run-level
/// counterparts.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Memory(#[from] MemoryError),

    #[error("maximum tool iterations ({limit}) reached")]
    #[diagnostic(
        code(canvasflow::nodes::max_tool_iterations),
        help("Raise maxToolIterations or relax the tool loop's stop criteria.")
    )]
    MaxToolIterationsReached { limit: u32 },

    #[error("while-loop hit its iteration limit ({limit})")]
    #[diagnostic(code(canvasflow::nodes::max_loop_iterations))]
    MaxLoopIterations { limit: u32 },

    #[error("human reviewer rejected continuation: {reason}")]
    #[diagnostic(code(canvasflow::nodes::hitl_rejected))]
    HitlRejected { reason: String },

    #[error("human approval request timed out")]
    #[diagnostic(code(canvasflow::nodes::hitl_timeout))]
    HitlTimedOut,

    #[error("branch '{branch}' timed out after {elapsed_ms} ms")]
    #[diagnostic(code(canvasflow::nodes::branch_timeout))]
    BranchTimeout { branch: String, elapsed_ms: u64 },

    #[error("subflow depth {depth} exceeds the limit of {limit}")]
    #[diagnostic(
        code(canvasflow::nodes::subflow_depth),
        help("Check for unbounded subflow recursion or raise maxSubflowDepth.")
    )]
    MaxSubflowDepthExceeded { depth: u32, limit: u32 },

    #[error("subflow '{id}' is not registered")]
    #[diagnostic(code(canvasflow::nodes::subflow_not_found))]
    SubflowNotFound { id: String },

    #[error("subflow input '{input}' has no mapping and no default")]
    #[diagnostic(code(canvasflow::nodes::missing_input_mapping))]
    MissingInputMapping { input: String },

    #[error("invalid node configuration: {0}")]
    #[diagnostic(code(canvasflow::nodes::invalid_config))]
    InvalidConfig(String),

    #[error("node execution cancelled")]
    #[diagnostic(code(canvasflow::nodes::cancelled))]
    Cancelled,

    #[error("node '{node_id}' exceeded its execution limit of {limit}")]
    #[diagnostic(code(canvasflow::nodes::circuit_breaker))]
    CircuitBreaker { node_id: String, limit: u32 },

    /// A nested run (subgraph or sub-workflow) failed.
    #[error("nested execution failed: {0}")]
    #[diagnostic(code(canvasflow::nodes::nested))]
    Nested(#[source] Box<ExecutionError>),

    #[error(transparent)]
    #[diagnostic(code(canvasflow::nodes::serde))]
    Serde(#[from] serde_json::Error),
}

impl NodeError {
    /// Whether this error is (or wraps) a cancellation.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        match self {
            NodeError::Cancelled | NodeError::Provider(ProviderError::Cancelled) => true,
            NodeError::Nested(inner) => matches!(**inner, ExecutionError::Cancelled),
            _ => false,
        }
    }
}

/// Dispatch a node to its kind handler.
pub(crate) async fn execute(
    ctx: &ExecutionContext,
    node: &Node,
) -> Result<NodeExecution, NodeError> {
    match &node.body {
        NodeBody::Start(_) => start::execute(ctx),
        NodeBody::Agent(data) => agent::execute(ctx, data).await,
        NodeBody::Router(data) => router::execute(ctx, data).await,
        NodeBody::Parallel(data) => parallel::execute(ctx, data).await,
        NodeBody::WhileLoop(data) => while_loop::execute(ctx, data).await,
        NodeBody::Subflow(data) => subflow::execute(ctx, data).await,
        NodeBody::Memory(data) => memory::execute(ctx, data).await,
        NodeBody::Tool(data) => tool::execute(ctx, data).await,
        NodeBody::Output(data) => output::execute(ctx, data).await,
    }
}
