//! Pluggable LLM provider interface.
//!
//! The engine talks to models through [`ChatProvider`]: a synchronous-
//! looking chat call that streams tokens and reasoning through sinks,
//! reports tool calls, and accounts usage. Hosts supply a concrete
//! implementation (an OpenRouter HTTP client, a local model, a scripted
//! test stub); the engine only depends on this trait.

use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::message::ChatMessage;

/// Callback receiving streamed token or reasoning fragments, in emission
/// order within a single call.
pub type TokenSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Options for a single chat call.
#[derive(Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Function tools offered to the model.
    pub tools: Vec<ToolSpec>,
    pub tool_choice: Option<ToolChoice>,
    /// Streamed completion tokens. Reasoning tokens go to `on_reasoning`
    /// and are never part of the returned `content`.
    pub on_token: Option<TokenSink>,
    pub on_reasoning: Option<TokenSink>,
    pub cancel: Option<CancellationToken>,
}

impl std::fmt::Debug for ChatOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatOptions")
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("tools", &self.tools.len())
            .field("tool_choice", &self.tool_choice)
            .field("streaming", &self.on_token.is_some())
            .finish()
    }
}

/// How the model should treat the offered tools.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    /// Force a call to the named function.
    Required(String),
}

/// A function tool declaration with JSON-Schema parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl ToolSpec {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: None,
        }
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// The wire shape providers expect:
    /// `{"type":"function","function":{...}}`.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// A structured function invocation requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub arguments: Value,
}

/// Usage accounting reported by the provider per call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Result of one chat call.
#[derive(Clone, Debug, Default)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
}

impl ChatResponse {
    /// Plain-text response helper, mostly for stubs and tests.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_calls: vec![ToolCall {
                id: None,
                name: name.into(),
                arguments,
            }],
            ..Default::default()
        }
    }
}

/// Input/output modality a model supports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
    Audio,
    Video,
    File,
}

/// Capability envelope of a model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCapabilities {
    pub input_modalities: Vec<Modality>,
    pub output_modalities: Vec<Modality>,
    pub context_length: u32,
    pub supported_parameters: Vec<String>,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            input_modalities: vec![Modality::Text],
            output_modalities: vec![Modality::Text],
            context_length: 8192,
            supported_parameters: Vec::new(),
        }
    }
}

impl ModelCapabilities {
    #[must_use]
    pub fn supports_input(&self, modality: Modality) -> bool {
        self.input_modalities.contains(&modality)
    }
}

/// The LLM provider the engine executes against.
///
/// Implementations must be reentrant: parallel branches issue concurrent
/// calls against the same provider instance. Cancellation arrives through
/// `options.cancel`; a cancelled call should return
/// [`ProviderError::Cancelled`] promptly.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<ChatResponse, ProviderError>;

    /// Capability lookup; the default is a text-only 8k-context model.
    fn model_capabilities(&self, _model: &str) -> ModelCapabilities {
        ModelCapabilities::default()
    }
}

/// Errors surfaced by provider implementations.
#[derive(Debug, Error, Diagnostic)]
pub enum ProviderError {
    /// The call observed the cancellation signal.
    #[error("chat call cancelled")]
    #[diagnostic(code(canvasflow::provider::cancelled))]
    Cancelled,

    /// The model or gateway rejected the request.
    #[error("model '{model}' rejected the request: {message}")]
    #[diagnostic(
        code(canvasflow::provider::request),
        help("Check the model id, parameters, and message payload.")
    )]
    Request { model: String, message: String },

    /// Transport-level failure (network, stream interruption).
    #[error("provider transport failure: {0}")]
    #[diagnostic(code(canvasflow::provider::transport))]
    Transport(String),

    /// The provider returned a payload the engine cannot interpret.
    #[error("malformed provider response: {0}")]
    #[diagnostic(code(canvasflow::provider::malformed))]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_spec_wire_shape() {
        let spec = ToolSpec::new("select_route")
            .describe("Pick a route")
            .with_parameters(json!({"type": "object"}));
        let wire = spec.to_wire();
        assert_eq!(wire["type"], "function");
        assert_eq!(wire["function"]["name"], "select_route");
    }

    #[test]
    fn default_capabilities_are_text_only() {
        let caps = ModelCapabilities::default();
        assert!(caps.supports_input(Modality::Text));
        assert!(!caps.supports_input(Modality::Image));
    }
}
