//! Execution context: the read-only façade handed to node handlers.
//!
//! The scheduler exclusively owns run state; handlers observe it through
//! snapshot accessors here and hand changes back in their
//! [`NodeExecution`](crate::nodes::NodeExecution). The context also
//! carries the subsystem handles (provider, registries, memory, hooks)
//! and the two re-entrant execution methods handlers use to drive nested
//! graphs.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::compaction::Compactor;
use crate::events::RunHooks;
use crate::hitl::HitlHandler;
use crate::memory::MemoryAdapter;
use crate::message::{Attachment, ChatMessage};
use crate::nodes::{ConditionEvaluator, NodeError};
use crate::provider::{ChatProvider, TokenUsage};
use crate::registry::{SubflowRegistry, ToolCallFallback, ToolRegistry};
use crate::scheduler::runner::{execute_shared, run_frontier, RunShared};
use crate::scheduler::state::RunState;
use crate::scheduler::{ExecutionError, ExecutionInput, RunReport, SubgraphOutcome};
use crate::workflow::{Edge, Node, ToolIterationPolicy};

/// Per-node execution context.
///
/// Cloning is cheap; parallel branches clone the context into their
/// tasks.
#[derive(Clone)]
pub struct ExecutionContext {
    /// The node being executed.
    pub node_id: String,
    /// The input string carried by the edge that enqueued this node.
    pub input: String,
    pub(crate) shared: Arc<RunShared>,
}

impl ExecutionContext {
    pub(crate) fn new(node_id: String, input: String, shared: Arc<RunShared>) -> Self {
        Self {
            node_id,
            input,
            shared,
        }
    }

    // -- run identity -------------------------------------------------------

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    #[must_use]
    pub fn debug(&self) -> bool {
        self.shared.options.debug
    }

    #[must_use]
    pub fn subflow_depth(&self) -> u32 {
        self.shared.depth
    }

    #[must_use]
    pub fn max_subflow_depth(&self) -> u32 {
        self.shared.options.max_subflow_depth
    }

    #[must_use]
    pub fn max_tool_iterations(&self) -> u32 {
        self.shared.options.max_tool_iterations
    }

    #[must_use]
    pub fn tool_iteration_policy(&self) -> ToolIterationPolicy {
        self.shared.options.on_max_tool_iterations
    }

    #[must_use]
    pub fn hitl_timeout(&self) -> Duration {
        self.shared.options.hitl_timeout
    }

    #[must_use]
    pub fn default_model(&self) -> Option<&str> {
        self.shared.default_model.as_deref()
    }

    /// The model for a call: the node's own, else the run default.
    pub fn resolve_model(&self, node_model: Option<&str>) -> Result<String, NodeError> {
        node_model
            .or(self.shared.default_model.as_deref())
            .map(str::to_string)
            .ok_or_else(|| {
                NodeError::InvalidConfig(
                    "no model configured on the node and no default model set".to_string(),
                )
            })
    }

    // -- state snapshots ----------------------------------------------------

    #[must_use]
    pub fn attachments(&self) -> Vec<Attachment> {
        self.shared.attachments.clone()
    }

    /// Snapshot of the shared conversation history.
    #[must_use]
    pub fn history(&self) -> Vec<ChatMessage> {
        self.shared.history.lock().unwrap().clone()
    }

    /// Snapshot of recorded node outputs (including composite branch keys).
    #[must_use]
    pub fn outputs(&self) -> FxHashMap<String, String> {
        self.shared.state.lock().unwrap().outputs.clone()
    }

    #[must_use]
    pub fn output_of(&self, node_id: &str) -> Option<String> {
        self.shared
            .state
            .lock()
            .unwrap()
            .outputs
            .get(node_id)
            .cloned()
    }

    /// Node ids that actually executed so far, in completion order.
    #[must_use]
    pub fn node_chain(&self) -> Vec<String> {
        self.shared.state.lock().unwrap().chain.clone()
    }

    // -- graph queries ------------------------------------------------------

    #[must_use]
    pub fn get_node(&self, node_id: &str) -> Option<&Node> {
        self.shared.workflow.node(node_id)
    }

    /// Outgoing edges of a node, optionally restricted to one handle.
    #[must_use]
    pub fn outgoing_edges(&self, node_id: &str, handle: Option<&str>) -> Vec<&Edge> {
        match handle {
            Some(handle) => self.shared.workflow.outgoing_on(node_id, handle),
            None => self.shared.workflow.outgoing(node_id).collect(),
        }
    }

    /// Targets on a handle of the current node.
    #[must_use]
    pub fn targets(&self, handle: &str) -> Vec<String> {
        self.shared.workflow.targets_on(&self.node_id, handle)
    }

    #[must_use]
    pub fn has_handle(&self, handle: &str) -> bool {
        self.shared.workflow.has_handle(&self.node_id, handle)
    }

    // -- subsystems ---------------------------------------------------------

    #[must_use]
    pub fn provider(&self) -> &Arc<dyn ChatProvider> {
        &self.shared.provider
    }

    #[must_use]
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.shared.tools
    }

    #[must_use]
    pub fn subflows(&self) -> &Arc<SubflowRegistry> {
        &self.shared.subflows
    }

    #[must_use]
    pub fn memory(&self) -> Option<Arc<dyn MemoryAdapter>> {
        self.shared.memory.clone()
    }

    #[must_use]
    pub fn custom_evaluator(&self, name: &str) -> Option<Arc<dyn ConditionEvaluator>> {
        self.shared.options.custom_evaluators.get(name).cloned()
    }

    #[must_use]
    pub fn tool_fallback(&self) -> Option<Arc<dyn ToolCallFallback>> {
        self.shared.options.tool_fallback.clone()
    }

    #[must_use]
    pub fn hitl(&self) -> Option<Arc<dyn HitlHandler>> {
        self.shared.options.hitl.clone()
    }

    #[must_use]
    pub fn hooks(&self) -> &RunHooks {
        &self.shared.options.hooks
    }

    // -- cancellation & accounting ------------------------------------------

    #[must_use]
    pub fn cancel(&self) -> &CancellationToken {
        &self.shared.cancel
    }

    /// Bail out with [`NodeError::Cancelled`] once the run is cancelled.
    pub fn ensure_active(&self) -> Result<(), NodeError> {
        if self.shared.cancel.is_cancelled() {
            return Err(NodeError::Cancelled);
        }
        Ok(())
    }

    /// Fold a provider-reported usage into the run totals and hooks.
    pub fn record_usage(&self, usage: &TokenUsage) {
        self.shared.state.lock().unwrap().usage.record(usage);
        self.hooks().usage(&self.node_id, usage);
    }

    /// Count one execution against the circuit breaker. Used by the
    /// scheduler per dispatch and by while-loops per body iteration.
    pub fn bump_execution_count(&self, node_id: &str) -> Result<u32, NodeError> {
        self.shared.bump(node_id)
    }

    /// Best-effort history compaction ahead of a chat call.
    pub async fn maybe_compact(&self, model: &str) {
        let Some(policy) = &self.shared.options.compaction else {
            return;
        };
        let compactor = Compactor::new(policy.clone());
        let capabilities = self.shared.provider.model_capabilities(model);
        let history = self.history();
        if !compactor.should_compact(
            &self.shared.options.token_counter,
            &history,
            capabilities.context_length,
        ) {
            return;
        }
        match compactor
            .compact(&self.shared.provider, model, &history, self.cancel())
            .await
        {
            Ok(compacted) => {
                *self.shared.history.lock().unwrap() = compacted;
            }
            Err(err) => {
                warn!(node = %self.node_id, error = %err, "history compaction failed, continuing uncompacted");
            }
        }
    }

    // -- re-entrant execution -----------------------------------------------

    /// Run a subgraph rooted at `start_id` on a fresh frontier, sharing
    /// this run's state, history, and registries.
    pub async fn execute_subgraph(
        &self,
        start_id: &str,
        input: &str,
    ) -> Result<SubgraphOutcome, ExecutionError> {
        let output = run_frontier(&self.shared, start_id.to_string(), input.to_string()).await?;
        Ok(SubgraphOutcome { output })
    }

    /// Run an embedded workflow with fresh scheduler state, one level
    /// deeper, optionally sharing this run's session and history.
    pub async fn execute_workflow(
        &self,
        workflow: crate::workflow::Workflow,
        input: ExecutionInput,
        share_session: bool,
    ) -> Result<RunReport, ExecutionError> {
        let parent = &self.shared;
        let shared = Arc::new(RunShared {
            workflow: Arc::new(workflow),
            provider: Arc::clone(&parent.provider),
            tools: Arc::clone(&parent.tools),
            subflows: Arc::clone(&parent.subflows),
            memory: parent.memory.clone(),
            options: Arc::clone(&parent.options),
            session_id: if share_session {
                parent.session_id.clone()
            } else {
                crate::utils::id::session_id()
            },
            default_model: parent.default_model.clone(),
            attachments: input.attachments.clone(),
            state: Mutex::new(RunState::default()),
            history: if share_session {
                Arc::clone(&parent.history)
            } else {
                Arc::new(Mutex::new(Vec::new()))
            },
            cancel: parent.cancel.clone(),
            depth: parent.depth + 1,
        });
        execute_shared(shared, input.text).await
    }
}
