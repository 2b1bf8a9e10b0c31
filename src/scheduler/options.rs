//! Run input and execution options.

use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::compaction::CompactionPolicy;
use crate::events::RunHooks;
use crate::hitl::{self, HitlHandler};
use crate::memory::MemoryAdapter;
use crate::message::Attachment;
use crate::nodes::ConditionEvaluator;
use crate::registry::{SubflowRegistry, ToolCallFallback, ToolRegistry};
use crate::tokens::TokenCounter;
use crate::workflow::ToolIterationPolicy;

/// The initial input of a run: text plus optional attachments.
#[derive(Clone, Debug, Default)]
pub struct ExecutionInput {
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl ExecutionInput {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }
}

impl From<&str> for ExecutionInput {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for ExecutionInput {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// Per-run knobs, callbacks, and subsystem overrides.
///
/// Registries and the memory adapter set here override the executor-level
/// defaults for this run only.
#[derive(Clone)]
pub struct ExecutionOptions {
    pub session_id: Option<String>,
    /// Model used when a node doesn't name one. Falls back to the
    /// `CANVASFLOW_DEFAULT_MODEL` environment variable.
    pub default_model: Option<String>,
    pub max_node_executions: u32,
    pub max_subflow_depth: u32,
    pub max_tool_iterations: u32,
    pub on_max_tool_iterations: ToolIterationPolicy,
    pub hitl_timeout: Duration,
    pub cancel: CancellationToken,
    pub debug: bool,
    /// Node id → `{ "data": { … } }` partial merged into the node's data
    /// record before dispatch.
    pub node_overrides: FxHashMap<String, Value>,
    pub hooks: RunHooks,
    pub hitl: Option<Arc<dyn HitlHandler>>,
    pub tool_fallback: Option<Arc<dyn ToolCallFallback>>,
    pub custom_evaluators: FxHashMap<String, Arc<dyn ConditionEvaluator>>,
    pub token_counter: TokenCounter,
    pub compaction: Option<CompactionPolicy>,
    pub memory: Option<Arc<dyn MemoryAdapter>>,
    pub tools: Option<Arc<ToolRegistry>>,
    pub subflow_registry: Option<Arc<SubflowRegistry>>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            session_id: None,
            default_model: None,
            max_node_executions: 100,
            max_subflow_depth: 10,
            max_tool_iterations: 10,
            on_max_tool_iterations: ToolIterationPolicy::Warning,
            hitl_timeout: hitl::DEFAULT_TIMEOUT,
            cancel: CancellationToken::new(),
            debug: false,
            node_overrides: FxHashMap::default(),
            hooks: RunHooks::default(),
            hitl: None,
            tool_fallback: None,
            custom_evaluators: FxHashMap::default(),
            token_counter: TokenCounter::default(),
            compaction: None,
            memory: None,
            tools: None,
            subflow_registry: None,
        }
    }
}

impl ExecutionOptions {
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_max_node_executions(mut self, limit: u32) -> Self {
        self.max_node_executions = limit;
        self
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: RunHooks) -> Self {
        self.hooks = hooks;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_hitl(mut self, handler: Arc<dyn HitlHandler>) -> Self {
        self.hitl = Some(handler);
        self
    }

    #[must_use]
    pub fn with_memory(mut self, memory: Arc<dyn MemoryAdapter>) -> Self {
        self.memory = Some(memory);
        self
    }

    #[must_use]
    pub fn with_evaluator(
        mut self,
        name: impl Into<String>,
        evaluator: Arc<dyn ConditionEvaluator>,
    ) -> Self {
        self.custom_evaluators.insert(name.into(), evaluator);
        self
    }

    #[must_use]
    pub fn with_node_override(mut self, node_id: impl Into<String>, patch: Value) -> Self {
        self.node_overrides.insert(node_id.into(), patch);
        self
    }

    #[must_use]
    pub fn with_compaction(mut self, policy: CompactionPolicy) -> Self {
        self.compaction = Some(policy);
        self
    }
}
