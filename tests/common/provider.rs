//! Scripted chat provider for integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use canvasflow::message::ChatMessage;
use canvasflow::provider::{
    ChatOptions, ChatProvider, ChatResponse, ModelCapabilities, ProviderError, TokenUsage,
};
use rustc_hash::FxHashMap;

/// Default model id used across tests.
pub const MODEL: &str = "test/model";

type Responder =
    dyn Fn(&str, &[ChatMessage]) -> Result<ChatResponse, ProviderError> + Send + Sync;

/// One observed `chat` invocation.
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub tool_names: Vec<String>,
}

impl RecordedCall {
    /// Text of the last user message in the call.
    pub fn last_user_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|msg| msg.has_role(ChatMessage::USER))
            .map(ChatMessage::text)
    }

    pub fn system_text(&self) -> String {
        self.messages
            .iter()
            .filter(|msg| msg.has_role(ChatMessage::SYSTEM))
            .map(ChatMessage::text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn user_message_count(&self, text: &str) -> usize {
        self.messages
            .iter()
            .filter(|msg| msg.has_role(ChatMessage::USER) && msg.text() == text)
            .count()
    }
}

/// Scripted provider: responses come from a closure, every call is
/// recorded, content streams through `on_token` word by word.
pub struct StubProvider {
    responder: Box<Responder>,
    pub calls: Mutex<Vec<RecordedCall>>,
    delays: Mutex<FxHashMap<String, Duration>>,
    capabilities: ModelCapabilities,
    usage_per_call: Option<TokenUsage>,
}

impl StubProvider {
    pub fn returning(
        responder: impl Fn(&str, &[ChatMessage]) -> Result<ChatResponse, ProviderError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
            delays: Mutex::new(FxHashMap::default()),
            capabilities: ModelCapabilities::default(),
            usage_per_call: Some(TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
        }
    }

    /// Fixed text for every call.
    pub fn text(content: &str) -> Self {
        let content = content.to_string();
        Self::returning(move |_, _| Ok(ChatResponse::text(content.clone())))
    }

    /// Pop responses in call order; panics past the end of the script.
    pub fn sequence(responses: Vec<ChatResponse>) -> Self {
        let queue = Mutex::new(VecDeque::from(responses));
        Self::returning(move |model, _| {
            queue
                .lock()
                .unwrap()
                .pop_front()
                .map(Ok)
                .unwrap_or_else(|| panic!("stub script exhausted (model {model})"))
        })
    }

    /// Fail every call for the given model, answer text otherwise.
    pub fn failing_model(bad_model: &str, fallback: &str) -> Self {
        let bad_model = bad_model.to_string();
        let fallback = fallback.to_string();
        Self::returning(move |model, _| {
            if model == bad_model {
                Err(ProviderError::Request {
                    model: model.to_string(),
                    message: "boom".to_string(),
                })
            } else {
                Ok(ChatResponse::text(fallback.clone()))
            }
        })
    }

    /// Sleep before answering calls for the given model.
    pub fn with_delay(self, model: &str, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(model.to_string(), delay);
        self
    }

    pub fn with_capabilities(mut self, capabilities: ModelCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn without_usage(mut self) -> Self {
        self.usage_per_call = None;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for StubProvider {
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        let delay = self.delays.lock().unwrap().get(model).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(cancel) = &options.cancel {
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
        }

        self.calls.lock().unwrap().push(RecordedCall {
            model: model.to_string(),
            messages: messages.to_vec(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            tool_names: options.tools.iter().map(|tool| tool.name.clone()).collect(),
        });

        let mut response = (self.responder)(model, messages)?;
        if response.usage.is_none() {
            response.usage = self.usage_per_call;
        }
        if let (Some(on_token), Some(content)) = (&options.on_token, &response.content) {
            // Stream word by word to exercise ordering.
            for word in content.split_inclusive(' ') {
                on_token(word);
            }
        }
        Ok(response)
    }

    fn model_capabilities(&self, _model: &str) -> ModelCapabilities {
        self.capabilities.clone()
    }
}

/// Convenience: an executor over an `Arc`'d stub.
pub fn executor(stub: StubProvider) -> (canvasflow::scheduler::WorkflowExecutor, Arc<StubProvider>) {
    let stub = Arc::new(stub);
    let provider: Arc<dyn ChatProvider> = stub.clone();
    (
        canvasflow::scheduler::WorkflowExecutor::new(provider),
        stub,
    )
}
