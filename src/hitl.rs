//! Human-in-the-loop gate: a co-operative pause with a deadline.
//!
//! Handlers that need approval construct a [`HitlRequest`] and await the
//! host's decision through [`await_decision`]. Expiry is enforced by
//! comparing wall-clock timestamps against the request deadline at a
//! coarse polling interval, never by a fixed-delay timer, so the gate
//! stays correct across host suspend/resume.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Granularity of the expiry poll.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default request lifetime when the run options don't override it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// A pending approval request surfaced to the host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlRequest {
    pub id: String,
    pub node_id: String,
    pub node_label: String,
    /// What kind of gate this is (e.g. `tool-iterations`).
    pub mode: String,
    /// Question presented to the human.
    pub prompt: String,
    /// Supporting context (last output, loop state).
    pub context: String,
    /// Choices offered, typically `approve`/`reject`.
    pub options: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl HitlRequest {
    #[must_use]
    pub fn new(
        node_id: impl Into<String>,
        node_label: impl Into<String>,
        mode: impl Into<String>,
        prompt: impl Into<String>,
        context: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let created_at = Utc::now();
        let expires_at = created_at
            + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::seconds(300));
        Self {
            id: crate::utils::id::short_id("hitl"),
            node_id: node_id.into(),
            node_label: node_label.into(),
            mode: mode.into(),
            prompt: prompt.into(),
            context: context.into(),
            options: vec!["approve".to_string(), "reject".to_string()],
            created_at,
            expires_at,
        }
    }
}

/// The human's decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitlAction {
    Approve,
    Reject,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HitlResponse {
    pub action: HitlAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl HitlResponse {
    #[must_use]
    pub fn approve() -> Self {
        Self {
            action: HitlAction::Approve,
            reason: None,
        }
    }

    #[must_use]
    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            action: HitlAction::Reject,
            reason: Some(reason.into()),
        }
    }
}

/// Host-side resolver for approval requests.
#[async_trait]
pub trait HitlHandler: Send + Sync {
    async fn request(&self, request: HitlRequest) -> HitlResponse;
}

/// Final disposition of a gate, after timeout and cancellation handling.
#[derive(Clone, Debug, PartialEq)]
pub enum HitlOutcome {
    Approved,
    Rejected { reason: String },
    TimedOut,
    Cancelled,
}

/// Await the host's decision, enforcing the request deadline.
///
/// The handler future races against a 1 s poll of `Utc::now()` versus
/// `expires_at` and against the run's cancellation token. A handler that
/// answers after expiry loses the race and the caller sees a timeout.
pub async fn await_decision(
    handler: &Arc<dyn HitlHandler>,
    request: HitlRequest,
    cancel: &CancellationToken,
) -> HitlOutcome {
    let expires_at = request.expires_at;
    let expiry_watch = async {
        let mut poll = tokio::time::interval(POLL_INTERVAL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            poll.tick().await;
            if Utc::now() >= expires_at {
                break;
            }
        }
    };

    tokio::select! {
        response = handler.request(request) => match response.action {
            HitlAction::Approve => HitlOutcome::Approved,
            HitlAction::Reject => HitlOutcome::Rejected {
                reason: response.reason.unwrap_or_else(|| "rejected".to_string()),
            },
        },
        () = expiry_watch => HitlOutcome::TimedOut,
        () = cancel.cancelled() => HitlOutcome::Cancelled,
    }
}
