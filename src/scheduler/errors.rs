//! Run-level error taxonomy.

use miette::Diagnostic;
use thiserror::Error;

use crate::nodes::NodeError;
use crate::validation::ValidationIssue;

/// Why a run failed.
#[derive(Debug, Error, Diagnostic)]
pub enum ExecutionError {
    /// Pre-flight validation reported at least one error-severity issue.
    #[error("workflow validation failed ({} issues)", issues.len())]
    #[diagnostic(
        code(canvasflow::scheduler::validation),
        help("Inspect the issues list; error-severity entries block execution.")
    )]
    ValidationFailed { issues: Vec<ValidationIssue> },

    /// The cancellation signal fired. Partial outputs and the node chain
    /// stay observable on the shared state for post-mortem.
    #[error("execution cancelled")]
    #[diagnostic(code(canvasflow::scheduler::cancelled))]
    Cancelled,

    /// A node exceeded `max_node_executions`.
    #[error("node '{node_id}' exceeded the execution limit of {limit}")]
    #[diagnostic(
        code(canvasflow::scheduler::circuit_breaker),
        help("A node re-enqueued itself too often. Check loop conditions or raise maxNodeExecutions.")
    )]
    CircuitBreakerTripped { node_id: String, limit: u32 },

    /// A handler failed and no `error` handle was connected.
    #[error("node '{node_id}' failed")]
    #[diagnostic(code(canvasflow::scheduler::node_failed))]
    NodeFailed {
        node_id: String,
        #[source]
        #[diagnostic_source]
        source: NodeError,
    },
}
