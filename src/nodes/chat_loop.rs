//! Shared chat/tool loop used by agent nodes, parallel branches, and
//! merge calls.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::context::ExecutionContext;
use crate::events::{ToolCallEvent, ToolCallPhase};
use crate::hitl::{self, HitlOutcome, HitlRequest};
use crate::message::{Attachment, AttachmentKind, ChatMessage, ContentPart};
use crate::provider::{ChatOptions, Modality, ModelCapabilities, TokenSink};
use crate::registry::{ToolError, ToolHandler};
use crate::workflow::ToolIterationPolicy;

use super::{NodeError, NodeExecution};

/// Where streamed tokens of a loop go.
#[derive(Clone, Debug)]
pub(crate) enum StreamTarget {
    /// Main agent stream: `on_token` / `on_reasoning`.
    Node,
    /// A parallel branch: `on_branch_token` / `on_branch_reasoning`.
    Branch { branch_id: String, label: String },
    /// The fan-in merge call: branch stream `__merge__` plus `on_token`.
    Merge,
    /// No streaming (router, condition checks).
    Silent,
}

pub(crate) const MERGE_BRANCH_ID: &str = "__merge__";
pub(crate) const MERGE_BRANCH_LABEL: &str = "Merge";

pub(crate) struct ChatLoopSpec {
    pub model: String,
    pub system_prompt: Option<String>,
    /// History snapshot the conversation continues from.
    pub seed_history: Vec<ChatMessage>,
    pub user_text: String,
    pub attachments: Vec<Attachment>,
    pub tools: Vec<Arc<dyn ToolHandler>>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub max_iterations: u32,
    pub on_limit: ToolIterationPolicy,
    pub stream: StreamTarget,
}

pub(crate) struct ChatLoopOutcome {
    pub content: String,
    /// Messages appended beyond the seed history (user turn, assistant
    /// turns, tool results), for the scheduler to integrate.
    pub new_messages: Vec<ChatMessage>,
    pub iterations: u32,
}

/// Build the user message, folding in attachments subject to the model's
/// input modalities: images only when supported, files always.
pub(crate) fn build_user_message(
    text: &str,
    attachments: &[Attachment],
    capabilities: &ModelCapabilities,
) -> ChatMessage {
    let included: Vec<&Attachment> = attachments
        .iter()
        .filter(|attachment| match attachment.kind {
            AttachmentKind::Image => capabilities.supports_input(Modality::Image),
            AttachmentKind::File => true,
        })
        .collect();
    if included.is_empty() {
        return ChatMessage::user(text);
    }
    let mut parts = vec![ContentPart::Text {
        text: text.to_string(),
    }];
    parts.extend(included.iter().map(|attachment| attachment.to_part()));
    ChatMessage::user_parts(parts)
}

/// Token/reasoning sinks for the given stream target.
pub(crate) fn token_sinks(
    ctx: &ExecutionContext,
    stream: &StreamTarget,
) -> (Option<TokenSink>, Option<TokenSink>) {
    let hooks = ctx.hooks().clone();
    let node_id = ctx.node_id.clone();
    match stream {
        StreamTarget::Node => {
            let token_hooks = hooks.clone();
            let token_node = node_id.clone();
            let on_token: TokenSink = Arc::new(move |text| token_hooks.token(&token_node, text));
            let on_reasoning: TokenSink = Arc::new(move |text| hooks.reasoning(&node_id, text));
            (Some(on_token), Some(on_reasoning))
        }
        StreamTarget::Branch { branch_id, label } => {
            let token_hooks = hooks.clone();
            let token_ids = (node_id.clone(), branch_id.clone(), label.clone());
            let on_token: TokenSink = Arc::new(move |text| {
                token_hooks.branch_token(&token_ids.0, &token_ids.1, &token_ids.2, text)
            });
            let ids = (node_id, branch_id.clone(), label.clone());
            let on_reasoning: TokenSink =
                Arc::new(move |text| hooks.branch_reasoning(&ids.0, &ids.1, &ids.2, text));
            (Some(on_token), Some(on_reasoning))
        }
        StreamTarget::Merge => {
            let token_hooks = hooks.clone();
            let token_node = node_id.clone();
            let on_token: TokenSink = Arc::new(move |text| {
                token_hooks.branch_token(&token_node, MERGE_BRANCH_ID, MERGE_BRANCH_LABEL, text);
                token_hooks.token(&token_node, text);
            });
            let on_reasoning: TokenSink = Arc::new(move |text| hooks.reasoning(&node_id, text));
            (Some(on_token), Some(on_reasoning))
        }
        StreamTarget::Silent => (None, None),
    }
}

/// Run the chat call, looping through tool rounds up to the iteration cap.
///
/// Tool handler failures are stringified into the tool-result message and
/// the loop continues; only provider failures, cancellation, and the
/// configured cap policy abort it.
pub(crate) async fn run_chat_loop(
    ctx: &ExecutionContext,
    spec: ChatLoopSpec,
) -> Result<ChatLoopOutcome, NodeError> {
    let capabilities = ctx.provider().model_capabilities(&spec.model);
    let user_message = build_user_message(&spec.user_text, &spec.attachments, &capabilities);

    let mut working: Vec<ChatMessage> = Vec::with_capacity(spec.seed_history.len() + 2);
    if let Some(system) = &spec.system_prompt {
        working.push(ChatMessage::system(system.clone()));
    }
    working.extend(spec.seed_history.iter().cloned());

    let mut new_messages: Vec<ChatMessage> = Vec::new();
    // Identical trailing user turn: reuse it instead of duplicating.
    let duplicate_user = spec
        .seed_history
        .last()
        .is_some_and(|last| last.has_role(ChatMessage::USER) && last.content == user_message.content);
    if !duplicate_user {
        working.push(user_message.clone());
        new_messages.push(user_message);
    }

    let handlers_by_name: FxHashMap<String, Arc<dyn ToolHandler>> = spec
        .tools
        .iter()
        .map(|handler| (handler.spec().name, Arc::clone(handler)))
        .collect();
    let tool_specs: Vec<_> = spec.tools.iter().map(|handler| handler.spec()).collect();

    let (on_token, on_reasoning) = token_sinks(ctx, &spec.stream);
    let mut iterations: u32 = 0;
    let mut last_content = String::new();

    loop {
        ctx.ensure_active()?;

        let response = ctx
            .provider()
            .chat(
                &spec.model,
                &working,
                ChatOptions {
                    temperature: spec.temperature,
                    max_tokens: spec.max_tokens,
                    tools: tool_specs.clone(),
                    tool_choice: None,
                    on_token: on_token.clone(),
                    on_reasoning: on_reasoning.clone(),
                    cancel: Some(ctx.cancel().clone()),
                },
            )
            .await?;

        if let Some(usage) = &response.usage {
            ctx.record_usage(usage);
        }
        if let Some(content) = &response.content {
            last_content = content.clone();
        }

        if response.tool_calls.is_empty() {
            let content = response.content.unwrap_or_default();
            if !content.is_empty() {
                let assistant = ChatMessage::assistant(content.clone());
                working.push(assistant.clone());
                new_messages.push(assistant);
            }
            return Ok(ChatLoopOutcome {
                content,
                new_messages,
                iterations,
            });
        }

        iterations += 1;
        debug!(node = %ctx.node_id, iteration = iterations, calls = response.tool_calls.len(), "tool round");

        let assistant_text = response.content.clone().unwrap_or_else(|| {
            let names: Vec<&str> = response
                .tool_calls
                .iter()
                .map(|call| call.name.as_str())
                .collect();
            format!("[Calling tools: {}]", names.join(", "))
        });
        let assistant = ChatMessage::assistant(assistant_text);
        working.push(assistant.clone());
        new_messages.push(assistant);

        for call in &response.tool_calls {
            ctx.hooks().tool_call(ToolCallEvent {
                node_id: ctx.node_id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                phase: ToolCallPhase::Started,
                result: None,
            });

            let result = match handlers_by_name.get(&call.name) {
                Some(handler) => handler.invoke(call.arguments.clone()).await,
                None => match ctx.tool_fallback() {
                    Some(fallback) => fallback.call(&call.name, &call.arguments).await,
                    None => Err(ToolError::Unknown(call.name.clone())),
                },
            };

            let (phase, text) = match result {
                Ok(text) => (ToolCallPhase::Finished, text),
                Err(err) => (ToolCallPhase::Failed, format!("Error: {err}")),
            };
            ctx.hooks().tool_call(ToolCallEvent {
                node_id: ctx.node_id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                phase,
                result: Some(text.clone()),
            });

            let tool_result = ChatMessage::system(format!("[Tool Result: {}] {}", call.name, text));
            working.push(tool_result.clone());
            new_messages.push(tool_result);
        }

        if iterations >= spec.max_iterations {
            match limit_disposition(ctx, &spec, &last_content).await? {
                LimitStep::AnotherRound => {
                    iterations = 0;
                }
                LimitStep::Warn => {
                    let warning =
                        format!("Warning: Maximum tool iterations ({}) reached.", spec.max_iterations);
                    let content = if last_content.is_empty() {
                        warning
                    } else {
                        format!("{warning}\n\n{last_content}")
                    };
                    return Ok(ChatLoopOutcome {
                        content,
                        new_messages,
                        iterations,
                    });
                }
            }
        }
    }
}

enum LimitStep {
    AnotherRound,
    Warn,
}

async fn limit_disposition(
    ctx: &ExecutionContext,
    spec: &ChatLoopSpec,
    last_content: &str,
) -> Result<LimitStep, NodeError> {
    match spec.on_limit {
        ToolIterationPolicy::Warning => Ok(LimitStep::Warn),
        ToolIterationPolicy::Error => Err(NodeError::MaxToolIterationsReached {
            limit: spec.max_iterations,
        }),
        ToolIterationPolicy::Hitl => {
            let Some(handler) = ctx.hitl() else {
                // No reviewer wired up: degrade to the warning path.
                return Ok(LimitStep::Warn);
            };
            let label = ctx
                .get_node(&ctx.node_id)
                .map(|node| node.label().to_string())
                .unwrap_or_else(|| ctx.node_id.clone());
            let request = HitlRequest::new(
                ctx.node_id.clone(),
                label,
                "tool-iterations",
                format!(
                    "Agent hit the tool iteration limit ({}). Approve another round?",
                    spec.max_iterations
                ),
                last_content.to_string(),
                ctx.hitl_timeout(),
            );
            ctx.hooks().hitl_requested(&request);
            match hitl::await_decision(&handler, request, ctx.cancel()).await {
                HitlOutcome::Approved => Ok(LimitStep::AnotherRound),
                HitlOutcome::Rejected { reason } => Err(NodeError::HitlRejected { reason }),
                HitlOutcome::TimedOut => Err(NodeError::HitlTimedOut),
                HitlOutcome::Cancelled => Err(NodeError::Cancelled),
            }
        }
    }
}

/// Shortcut for handlers that just emit on a handle with no transitions
/// rewritten.
pub(crate) fn emit_on_handle(ctx: &ExecutionContext, output: String, handle: &str) -> NodeExecution {
    let next = ctx
        .targets(handle)
        .into_iter()
        .map(super::Transition::to)
        .collect();
    NodeExecution::new(output).with_next(next)
}
