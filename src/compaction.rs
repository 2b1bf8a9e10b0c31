//! History compaction: summarize old conversation turns when a model's
//! context limit approaches.
//!
//! Compaction is best-effort. The agent handler consults the policy before
//! each chat loop; a failed summarization call degrades to a warning and
//! the uncompacted history is used as-is.

use std::sync::Arc;

use crate::message::ChatMessage;
use crate::provider::{ChatOptions, ChatProvider, ProviderError};
use crate::tokens::TokenCounter;
use tokio_util::sync::CancellationToken;

const SUMMARY_PROMPT: &str = "Summarize the following conversation history into a concise brief. \
Preserve decisions, facts, named entities, and any unresolved questions. \
Respond with the summary only.";

/// When and how aggressively to compact.
#[derive(Clone, Debug)]
pub struct CompactionPolicy {
    /// Compact once the estimated history exceeds this fraction of the
    /// model's context length.
    pub trigger_ratio: f32,
    /// Messages at the tail kept verbatim.
    pub keep_recent: usize,
    /// Model for the summarization call; `None` reuses the calling
    /// node's model.
    pub model: Option<String>,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            trigger_ratio: 0.8,
            keep_recent: 6,
            model: None,
        }
    }
}

/// Applies a [`CompactionPolicy`] against a history.
#[derive(Clone, Debug)]
pub struct Compactor {
    policy: CompactionPolicy,
}

impl Compactor {
    #[must_use]
    pub fn new(policy: CompactionPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &CompactionPolicy {
        &self.policy
    }

    /// Whether the history estimate crosses the trigger point.
    #[must_use]
    pub fn should_compact(
        &self,
        counter: &TokenCounter,
        history: &[ChatMessage],
        context_length: u32,
    ) -> bool {
        if history.len() <= self.policy.keep_recent {
            return false;
        }
        let estimate = counter.count_messages(history);
        let threshold = (context_length as f32 * self.policy.trigger_ratio) as u32;
        estimate >= threshold
    }

    /// Summarize everything but the retained tail into a single system
    /// message. Returns the replacement history.
    pub async fn compact(
        &self,
        provider: &Arc<dyn ChatProvider>,
        model: &str,
        history: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> Result<Vec<ChatMessage>, ProviderError> {
        let split = history.len().saturating_sub(self.policy.keep_recent);
        if split == 0 {
            return Ok(history.to_vec());
        }
        let (head, tail) = history.split_at(split);

        let transcript = head
            .iter()
            .map(|msg| format!("{}: {}", msg.role, msg.text()))
            .collect::<Vec<_>>()
            .join("\n");

        let model = self.policy.model.as_deref().unwrap_or(model);
        let response = provider
            .chat(
                model,
                &[
                    ChatMessage::system(SUMMARY_PROMPT),
                    ChatMessage::user(transcript),
                ],
                ChatOptions {
                    cancel: Some(cancel.clone()),
                    ..Default::default()
                },
            )
            .await?;

        let summary = response.content.unwrap_or_default();
        let mut compacted =
            vec![ChatMessage::system(format!("Conversation summary: {summary}"))];
        compacted.extend(tail.iter().cloned());
        Ok(compacted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_histories_never_trigger() {
        let compactor = Compactor::new(CompactionPolicy::default());
        let counter = TokenCounter::default();
        let history = vec![ChatMessage::user("hi")];
        assert!(!compactor.should_compact(&counter, &history, 100));
    }

    #[test]
    fn trigger_fires_near_the_context_limit() {
        let compactor = Compactor::new(CompactionPolicy {
            keep_recent: 2,
            ..Default::default()
        });
        let counter = TokenCounter::default();
        let history: Vec<ChatMessage> = (0..20)
            .map(|_| ChatMessage::user("a long enough message to count tokens for"))
            .collect();
        assert!(compactor.should_compact(&counter, &history, 64));
        assert!(!compactor.should_compact(&counter, &history, 100_000));
    }
}
