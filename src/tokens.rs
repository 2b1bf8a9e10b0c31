//! Token accounting: estimation heuristics and cumulative usage.

use serde::{Deserialize, Serialize};

use crate::message::ChatMessage;
use crate::provider::TokenUsage;

/// Estimates prompt sizes without a model-specific tokenizer.
///
/// The heuristic is the usual chars/4 approximation plus a fixed
/// per-message overhead for role framing. Hosts with exact tokenizers can
/// substitute their own counts when deciding compaction; the engine only
/// needs a conservative estimate.
#[derive(Clone, Copy, Debug)]
pub struct TokenCounter {
    chars_per_token: f32,
    per_message_overhead: u32,
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self {
            chars_per_token: 4.0,
            per_message_overhead: 4,
        }
    }
}

impl TokenCounter {
    #[must_use]
    pub fn new(chars_per_token: f32, per_message_overhead: u32) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1.0),
            per_message_overhead,
        }
    }

    /// Estimated tokens for a text fragment.
    #[must_use]
    pub fn count_text(&self, text: &str) -> u32 {
        (text.chars().count() as f32 / self.chars_per_token).ceil() as u32
    }

    /// Estimated prompt tokens for a message array.
    #[must_use]
    pub fn count_messages(&self, messages: &[ChatMessage]) -> u32 {
        messages
            .iter()
            .map(|msg| self.count_text(&msg.text()) + self.per_message_overhead)
            .sum()
    }
}

/// Cumulative usage across every provider call of a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub calls: u32,
}

impl UsageTotals {
    pub fn record(&mut self, usage: &TokenUsage) {
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.completion_tokens += u64::from(usage.completion_tokens);
        self.total_tokens += u64::from(usage.total_tokens);
        self.calls += 1;
    }
}
