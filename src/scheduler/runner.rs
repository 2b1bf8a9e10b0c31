//! The run loop.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::{debug, instrument, warn};

use crate::context::ExecutionContext;
use crate::events::NodeStatus;
use crate::memory::MemoryAdapter;
use crate::message::{Attachment, ChatMessage};
use crate::nodes::{self, NodeError};
use crate::provider::ChatProvider;
use crate::registry::{SubflowRegistry, ToolRegistry};
use crate::utils::json_merge;
use crate::validation::{self, Severity};
use crate::workflow::{Node, NodeBody, Workflow};

use super::state::RunState;
use super::{ExecutionError, ExecutionInput, ExecutionOptions, RunReport};

/// Executes workflows against a provider and a set of registries.
///
/// One executor is typically process-wide: it owns the long-lived
/// collaborators (provider, tool and subflow registries, memory adapter)
/// while every [`run`](Self::run) gets fresh scheduler state. Per-run
/// overrides come in through [`ExecutionOptions`].
pub struct WorkflowExecutor {
    provider: Arc<dyn ChatProvider>,
    tools: Arc<ToolRegistry>,
    subflows: Arc<SubflowRegistry>,
    memory: Option<Arc<dyn MemoryAdapter>>,
}

impl WorkflowExecutor {
    #[must_use]
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self {
            provider,
            tools: Arc::new(ToolRegistry::new()),
            subflows: Arc::new(SubflowRegistry::new()),
            memory: None,
        }
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn with_subflows(mut self, subflows: Arc<SubflowRegistry>) -> Self {
        self.subflows = subflows;
        self
    }

    #[must_use]
    pub fn with_memory(mut self, memory: Arc<dyn MemoryAdapter>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Validate and execute a workflow to completion.
    ///
    /// Fails with [`ExecutionError::ValidationFailed`] before any node
    /// runs, [`ExecutionError::Cancelled`] when the signal fires,
    /// [`ExecutionError::CircuitBreakerTripped`] on runaway re-enqueueing,
    /// or [`ExecutionError::NodeFailed`] for an unrecovered handler error.
    #[instrument(skip_all, fields(workflow = workflow.name.as_deref().unwrap_or("unnamed")), err)]
    pub async fn run(
        &self,
        workflow: &Workflow,
        input: impl Into<ExecutionInput>,
        options: ExecutionOptions,
    ) -> Result<RunReport, ExecutionError> {
        let input = input.into();
        let options = Arc::new(options);

        let shared = Arc::new(RunShared {
            workflow: Arc::new(workflow.clone()),
            provider: Arc::clone(&self.provider),
            tools: options
                .tools
                .clone()
                .unwrap_or_else(|| Arc::clone(&self.tools)),
            subflows: options
                .subflow_registry
                .clone()
                .unwrap_or_else(|| Arc::clone(&self.subflows)),
            memory: options.memory.clone().or_else(|| self.memory.clone()),
            session_id: options
                .session_id
                .clone()
                .unwrap_or_else(crate::utils::id::session_id),
            default_model: resolve_default_model(&options),
            attachments: input.attachments.clone(),
            state: Mutex::new(RunState::default()),
            history: Arc::new(Mutex::new(Vec::new())),
            cancel: options.cancel.clone(),
            depth: 0,
            options,
        });

        execute_shared(shared, input.text).await
    }
}

fn resolve_default_model(options: &ExecutionOptions) -> Option<String> {
    options.default_model.clone().or_else(|| {
        dotenvy::dotenv().ok();
        std::env::var("CANVASFLOW_DEFAULT_MODEL").ok()
    })
}

/// Everything a run (and its nested subgraph frontiers) shares.
pub(crate) struct RunShared {
    pub workflow: Arc<Workflow>,
    pub provider: Arc<dyn ChatProvider>,
    pub tools: Arc<ToolRegistry>,
    pub subflows: Arc<SubflowRegistry>,
    pub memory: Option<Arc<dyn MemoryAdapter>>,
    pub options: Arc<ExecutionOptions>,
    pub session_id: String,
    pub default_model: Option<String>,
    pub attachments: Vec<Attachment>,
    pub state: Mutex<RunState>,
    /// Shared with sub-workflow runs when the subflow opts into session
    /// sharing.
    pub history: Arc<Mutex<Vec<ChatMessage>>>,
    pub cancel: tokio_util::sync::CancellationToken,
    pub depth: u32,
}

impl RunShared {
    /// Increment a node's execution count; trips once the count exceeds
    /// the cap, so a node runs at most `max_node_executions` times.
    pub(crate) fn bump(&self, node_id: &str) -> Result<u32, NodeError> {
        let mut state = self.state.lock().unwrap();
        let count = state.counts.entry(node_id.to_string()).or_insert(0);
        *count += 1;
        if *count > self.options.max_node_executions {
            Err(NodeError::CircuitBreaker {
                node_id: node_id.to_string(),
                limit: self.options.max_node_executions,
            })
        } else {
            Ok(*count)
        }
    }

    fn set_status(&self, node_id: &str, status: NodeStatus) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(node_id.to_string(), status);
        self.options.hooks.status(node_id, status);
    }
}

/// Validate, locate the entry node, and drive the frontier to completion.
pub(crate) async fn execute_shared(
    shared: Arc<RunShared>,
    input_text: String,
) -> Result<RunReport, ExecutionError> {
    let issues = validation::validate(
        &shared.workflow,
        Some(shared.subflows.as_ref()),
        shared.default_model.as_deref(),
    );
    for issue in issues.iter().filter(|issue| issue.severity == Severity::Warning) {
        warn!(code = %issue.code, node = issue.node_id.as_deref().unwrap_or("-"), "{}", issue.message);
    }
    if issues.iter().any(|issue| issue.severity == Severity::Error) {
        return Err(ExecutionError::ValidationFailed { issues });
    }

    let start_id = shared
        .workflow
        .start_node()
        .map(|node| node.id.clone())
        .ok_or(ExecutionError::ValidationFailed { issues })?;

    let output = run_frontier(&shared, start_id, input_text).await?;

    let state = shared.state.lock().unwrap();
    Ok(RunReport {
        output,
        outputs: state.outputs.clone(),
        node_statuses: state.statuses.clone(),
        node_chain: state.chain.clone(),
        node_metadata: state.metadata.clone(),
        usage: state.usage,
        session_id: shared.session_id.clone(),
    })
}

/// Drive one FIFO frontier until it drains. Returns the output of the
/// last node that completed on this frontier.
///
/// Boxed so handlers (while-loop bodies, subflows) can recurse through
/// [`ExecutionContext::execute_subgraph`].
pub(crate) fn run_frontier<'a>(
    shared: &'a Arc<RunShared>,
    start_id: String,
    input: String,
) -> BoxFuture<'a, Result<String, ExecutionError>> {
    async move {
        let mut frontier: VecDeque<(String, String)> = VecDeque::new();
        frontier.push_back((start_id, input.clone()));
        let mut last_output = input;

        while let Some((node_id, node_input)) = frontier.pop_front() {
            if shared.cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled);
            }

            let Some(node) = shared.workflow.node(&node_id) else {
                warn!(node = %node_id, "edge target does not exist, skipping");
                continue;
            };

            if let Err(NodeError::CircuitBreaker { node_id, limit }) = shared.bump(&node_id) {
                shared.set_status(&node_id, NodeStatus::Error);
                return Err(ExecutionError::CircuitBreakerTripped { node_id, limit });
            }

            shared.set_status(&node_id, NodeStatus::Active);
            let node = apply_override(shared, node)
                .map_err(|source| ExecutionError::NodeFailed {
                    node_id: node_id.clone(),
                    source,
                })?;

            if shared.options.debug {
                debug!(node = %node_id, kind = node.kind(), input = %node_input, "dispatching");
            }
            let ctx = ExecutionContext::new(node_id.clone(), node_input, Arc::clone(shared));
            match nodes::execute(&ctx, &node).await {
                Ok(execution) => {
                    {
                        let mut state = shared.state.lock().unwrap();
                        state
                            .outputs
                            .insert(node_id.clone(), execution.output.clone());
                        for (key, value) in execution.records {
                            state.outputs.insert(key, value);
                        }
                        state.chain.push(node_id.clone());
                        if let Some(metadata) = execution.metadata {
                            state.metadata.insert(node_id.clone(), metadata);
                        }
                    }
                    if !execution.messages.is_empty() {
                        shared
                            .history
                            .lock()
                            .unwrap()
                            .extend(execution.messages);
                    }
                    shared.set_status(&node_id, NodeStatus::Completed);
                    last_output = execution.output.clone();

                    for transition in execution.next {
                        let next_input = transition
                            .input
                            .unwrap_or_else(|| execution.output.clone());
                        mark_idle(shared, &transition.target);
                        frontier.push_back((transition.target, next_input));
                    }
                    debug!(node = %node_id, frontier = frontier.len(), "node completed");
                }
                Err(err) => {
                    shared.set_status(&node_id, NodeStatus::Error);

                    // Breaker trips inside handlers (loop body iterations)
                    // are scheduler guards, not routable failures.
                    if let NodeError::CircuitBreaker { node_id, limit } = &err {
                        return Err(ExecutionError::CircuitBreakerTripped {
                            node_id: node_id.clone(),
                            limit: *limit,
                        });
                    }

                    let error_targets = shared.workflow.error_targets(&node_id);
                    if !error_targets.is_empty() {
                        warn!(node = %node_id, error = %err, "routing failure through error handle");
                        let message = err.to_string();
                        for target in error_targets {
                            mark_idle(shared, &target);
                            frontier.push_back((target, message.clone()));
                        }
                        continue;
                    }

                    if err.is_cancellation() {
                        return Err(ExecutionError::Cancelled);
                    }
                    return Err(ExecutionError::NodeFailed {
                        node_id,
                        source: err,
                    });
                }
            }
        }

        Ok(last_output)
    }
    .boxed()
}

fn mark_idle(shared: &Arc<RunShared>, node_id: &str) {
    let mut state = shared.state.lock().unwrap();
    state
        .statuses
        .entry(node_id.to_string())
        .or_insert(NodeStatus::Idle);
}

/// Merge a per-run `{ "data": … }` override into the node before
/// dispatch.
fn apply_override(shared: &Arc<RunShared>, node: &Node) -> Result<Node, NodeError> {
    let Some(patch) = shared.options.node_overrides.get(&node.id) else {
        return Ok(node.clone());
    };
    let data_patch = patch.get("data").unwrap_or(patch);
    let mut data = node.body.data_value()?;
    json_merge::merge(&mut data, data_patch);
    let body = NodeBody::from_kind_data(node.kind(), data)?;
    Ok(Node {
        id: node.id.clone(),
        body,
        extra: node.extra.clone(),
    })
}
