//! Streaming callbacks and event fan-out.
//!
//! Observational callbacks (tokens, branch activity, status transitions,
//! usage) are grouped in [`RunHooks`]: a cloneable bundle of optional
//! closures the scheduler and node handlers invoke as execution unfolds.
//! Every invocation is also mirrored onto an optional [`flume`] channel as
//! a [`WorkflowEvent`], so hosts can bridge a run onto SSE or websocket
//! endpoints without wiring each closure.
//!
//! Ordering guarantees: tokens within one chat call arrive in emission
//! order; a node's `Completed` status precedes the next node's `Active`;
//! branch events are unordered across branches but ordered within one.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hitl::HitlRequest;
use crate::provider::TokenUsage;

/// Lifecycle state of a node within one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Idle,
    Active,
    Completed,
    Error,
}

/// Phase of a tool invocation reported through `on_tool_call_event`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallPhase {
    Started,
    Finished,
    Failed,
}

/// One observed tool invocation inside an agent loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallEvent {
    pub node_id: String,
    pub name: String,
    pub arguments: Value,
    pub phase: ToolCallPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Everything a run emits, in channel form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkflowEvent {
    NodeStatus {
        node_id: String,
        status: NodeStatus,
    },
    Token {
        node_id: String,
        text: String,
    },
    Reasoning {
        node_id: String,
        text: String,
    },
    BranchStart {
        node_id: String,
        branch_id: String,
        label: String,
    },
    BranchToken {
        node_id: String,
        branch_id: String,
        label: String,
        text: String,
    },
    BranchReasoning {
        node_id: String,
        branch_id: String,
        label: String,
        text: String,
    },
    BranchComplete {
        node_id: String,
        branch_id: String,
        label: String,
        output: String,
    },
    TokenUsage {
        node_id: String,
        usage: TokenUsage,
    },
    ToolCall(ToolCallEvent),
    HitlRequested(HitlRequest),
}

type TokenFn = Arc<dyn Fn(&str) + Send + Sync>;
type StatusFn = Arc<dyn Fn(&str, NodeStatus) + Send + Sync>;
type BranchFn = Arc<dyn Fn(&str, &str) + Send + Sync>;
type BranchTextFn = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;
type UsageFn = Arc<dyn Fn(&TokenUsage) + Send + Sync>;
type ToolEventFn = Arc<dyn Fn(&ToolCallEvent) + Send + Sync>;

/// Per-run observational callbacks. All optional; clone is cheap.
#[derive(Clone, Default)]
pub struct RunHooks {
    pub on_token: Option<TokenFn>,
    pub on_reasoning: Option<TokenFn>,
    pub on_status: Option<StatusFn>,
    pub on_branch_start: Option<BranchFn>,
    pub on_branch_token: Option<BranchTextFn>,
    pub on_branch_reasoning: Option<BranchTextFn>,
    pub on_branch_complete: Option<BranchTextFn>,
    pub on_token_usage: Option<UsageFn>,
    pub on_tool_call_event: Option<ToolEventFn>,
    channel: Option<flume::Sender<WorkflowEvent>>,
}

impl std::fmt::Debug for RunHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHooks")
            .field("on_token", &self.on_token.is_some())
            .field("on_status", &self.on_status.is_some())
            .field("channel", &self.channel.is_some())
            .finish()
    }
}

impl RunHooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hooks that fan every event into an unbounded channel.
    #[must_use]
    pub fn channel() -> (Self, flume::Receiver<WorkflowEvent>) {
        let (tx, rx) = flume::unbounded();
        (Self::default().with_channel(tx), rx)
    }

    #[must_use]
    pub fn with_channel(mut self, sender: flume::Sender<WorkflowEvent>) -> Self {
        self.channel = Some(sender);
        self
    }

    #[must_use]
    pub fn with_on_token(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_token = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_on_reasoning(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_reasoning = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_on_status(
        mut self,
        f: impl Fn(&str, NodeStatus) + Send + Sync + 'static,
    ) -> Self {
        self.on_status = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_on_branch_token(
        mut self,
        f: impl Fn(&str, &str, &str) + Send + Sync + 'static,
    ) -> Self {
        self.on_branch_token = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_on_token_usage(
        mut self,
        f: impl Fn(&TokenUsage) + Send + Sync + 'static,
    ) -> Self {
        self.on_token_usage = Some(Arc::new(f));
        self
    }

    fn send(&self, event: WorkflowEvent) {
        if let Some(channel) = &self.channel {
            let _ = channel.send(event);
        }
    }

    pub(crate) fn status(&self, node_id: &str, status: NodeStatus) {
        if let Some(f) = &self.on_status {
            f(node_id, status);
        }
        self.send(WorkflowEvent::NodeStatus {
            node_id: node_id.to_string(),
            status,
        });
    }

    pub(crate) fn token(&self, node_id: &str, text: &str) {
        if let Some(f) = &self.on_token {
            f(text);
        }
        self.send(WorkflowEvent::Token {
            node_id: node_id.to_string(),
            text: text.to_string(),
        });
    }

    pub(crate) fn reasoning(&self, node_id: &str, text: &str) {
        if let Some(f) = &self.on_reasoning {
            f(text);
        }
        self.send(WorkflowEvent::Reasoning {
            node_id: node_id.to_string(),
            text: text.to_string(),
        });
    }

    pub(crate) fn branch_start(&self, node_id: &str, branch_id: &str, label: &str) {
        if let Some(f) = &self.on_branch_start {
            f(branch_id, label);
        }
        self.send(WorkflowEvent::BranchStart {
            node_id: node_id.to_string(),
            branch_id: branch_id.to_string(),
            label: label.to_string(),
        });
    }

    pub(crate) fn branch_token(&self, node_id: &str, branch_id: &str, label: &str, text: &str) {
        if let Some(f) = &self.on_branch_token {
            f(branch_id, label, text);
        }
        self.send(WorkflowEvent::BranchToken {
            node_id: node_id.to_string(),
            branch_id: branch_id.to_string(),
            label: label.to_string(),
            text: text.to_string(),
        });
    }

    pub(crate) fn branch_reasoning(&self, node_id: &str, branch_id: &str, label: &str, text: &str) {
        if let Some(f) = &self.on_branch_reasoning {
            f(branch_id, label, text);
        }
        self.send(WorkflowEvent::BranchReasoning {
            node_id: node_id.to_string(),
            branch_id: branch_id.to_string(),
            label: label.to_string(),
            text: text.to_string(),
        });
    }

    pub(crate) fn branch_complete(&self, node_id: &str, branch_id: &str, label: &str, output: &str) {
        if let Some(f) = &self.on_branch_complete {
            f(branch_id, label, output);
        }
        self.send(WorkflowEvent::BranchComplete {
            node_id: node_id.to_string(),
            branch_id: branch_id.to_string(),
            label: label.to_string(),
            output: output.to_string(),
        });
    }

    pub(crate) fn usage(&self, node_id: &str, usage: &TokenUsage) {
        if let Some(f) = &self.on_token_usage {
            f(usage);
        }
        self.send(WorkflowEvent::TokenUsage {
            node_id: node_id.to_string(),
            usage: *usage,
        });
    }

    pub(crate) fn tool_call(&self, event: ToolCallEvent) {
        if let Some(f) = &self.on_tool_call_event {
            f(&event);
        }
        self.send(WorkflowEvent::ToolCall(event));
    }

    pub(crate) fn hitl_requested(&self, request: &HitlRequest) {
        self.send(WorkflowEvent::HitlRequested(request.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_hooks_mirror_invocations() {
        let (hooks, rx) = RunHooks::channel();
        hooks.status("n1", NodeStatus::Active);
        hooks.token("n1", "hey");
        let first = rx.try_recv().unwrap();
        assert!(matches!(
            first,
            WorkflowEvent::NodeStatus {
                status: NodeStatus::Active,
                ..
            }
        ));
        let second = rx.try_recv().unwrap();
        assert!(matches!(second, WorkflowEvent::Token { ref text, .. } if text == "hey"));
    }

    #[test]
    fn closure_hooks_fire_without_channel() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hooks = RunHooks::new().with_on_token(move |tok| sink.lock().unwrap().push(tok.to_string()));
        hooks.token("n", "a");
        hooks.token("n", "b");
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }
}
