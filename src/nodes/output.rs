//! Output node: terminal formatting of collected outputs.

use chrono::Utc;
use serde_json::{json, Value};

use crate::context::ExecutionContext;
use crate::message::ChatMessage;
use crate::provider::ChatOptions;
use crate::workflow::{OutputData, OutputFormat, OutputMode};

use super::chat_loop::{token_sinks, StreamTarget};
use super::{NodeError, NodeExecution};

const DEFAULT_SYNTHESIS_PROMPT: &str = "Combine the following inputs into a cohesive document.";

pub(crate) async fn execute(
    ctx: &ExecutionContext,
    data: &OutputData,
) -> Result<NodeExecution, NodeError> {
    let sources = resolve_sources(ctx, data);

    let content = match data.mode() {
        OutputMode::Combine => combine(ctx, data, &sources),
        OutputMode::Synthesis => synthesize(ctx, data, &sources).await?,
        OutputMode::Template => interpolate(ctx, data),
    };

    let formatted = format_output(ctx, data, content);
    // Terminal: no successors.
    Ok(NodeExecution::new(formatted))
}

/// `(label, output)` pairs in source order; an empty selection falls back
/// to the executed node chain, skipping pass-through start nodes and
/// other formatters.
fn resolve_sources(ctx: &ExecutionContext, data: &OutputData) -> Vec<(String, String)> {
    let outputs = ctx.outputs();
    let ids: Vec<String> = match &data.sources {
        Some(sources) if !sources.is_empty() => sources.clone(),
        _ => {
            // Chain fallback: each executed node once, pass-through start
            // nodes and other formatters excluded.
            let mut seen = std::collections::HashSet::new();
            ctx.node_chain()
                .into_iter()
                .filter(|id| {
                    id != &ctx.node_id
                        && !ctx
                            .get_node(id)
                            .is_some_and(|node| node.is_start() || node.is_output())
                        && seen.insert(id.clone())
                })
                .collect()
        }
    };

    ids.iter()
        .filter_map(|id| {
            let output = outputs.get(id)?;
            let label = ctx
                .get_node(id)
                .map(|node| node.label().to_string())
                .unwrap_or_else(|| id.clone());
            Some((label, output.clone()))
        })
        .collect()
}

fn combine(ctx: &ExecutionContext, data: &OutputData, sources: &[(String, String)]) -> String {
    let mut body: Vec<String> = sources
        .iter()
        .filter(|(_, output)| !output.is_empty())
        .map(|(_, output)| output.clone())
        .collect();
    // Nothing resolved (e.g. reached through an error handle): emit the
    // input carried on the edge.
    if body.is_empty() && !ctx.input.is_empty() {
        body.push(ctx.input.clone());
    }

    let mut sections: Vec<String> = Vec::new();
    if let Some(intro) = &data.intro_text {
        if !intro.is_empty() {
            sections.push(intro.clone());
        }
    }
    sections.append(&mut body);
    if let Some(outro) = &data.outro_text {
        if !outro.is_empty() {
            sections.push(outro.clone());
        }
    }
    sections.join("\n\n")
}

async fn synthesize(
    ctx: &ExecutionContext,
    data: &OutputData,
    sources: &[(String, String)],
) -> Result<String, NodeError> {
    let synthesis = data.synthesis.clone().unwrap_or_default();
    let model = ctx.resolve_model(synthesis.model.as_deref())?;
    let prompt = synthesis
        .prompt
        .unwrap_or_else(|| DEFAULT_SYNTHESIS_PROMPT.to_string());

    let mut labeled = String::new();
    for (label, output) in sources {
        labeled.push_str(&format!("## {label}\n{output}\n\n"));
    }

    let (on_token, on_reasoning) = token_sinks(ctx, &StreamTarget::Node);
    let response = ctx
        .provider()
        .chat(
            &model,
            &[
                ChatMessage::system(prompt),
                ChatMessage::user(labeled.trim_end().to_string()),
            ],
            ChatOptions {
                on_token,
                on_reasoning,
                cancel: Some(ctx.cancel().clone()),
                ..Default::default()
            },
        )
        .await?;
    if let Some(usage) = &response.usage {
        ctx.record_usage(usage);
    }
    Ok(response.content.unwrap_or_default())
}

/// Legacy template mode: `{{nodeId}}` placeholders from recorded outputs.
fn interpolate(ctx: &ExecutionContext, data: &OutputData) -> String {
    let Some(template) = &data.template else {
        return ctx.input.clone();
    };
    let mut rendered = template.clone();
    for (id, output) in ctx.outputs() {
        rendered = rendered.replace(&format!("{{{{{id}}}}}"), &output);
    }
    rendered
}

fn format_output(ctx: &ExecutionContext, data: &OutputData, content: String) -> String {
    let chain = ctx.node_chain();
    match data.format() {
        OutputFormat::Text => {
            if data.include_metadata() {
                format!("[Executed: {}]\n\n{content}", chain.join(" → "))
            } else {
                content
            }
        }
        OutputFormat::Json => {
            let value: Value = serde_json::from_str(&content)
                .unwrap_or_else(|_| json!({ "result": content.clone() }));
            let wrapped = if data.include_metadata() {
                let result = match &value {
                    Value::Object(map) if map.len() == 1 && map.contains_key("result") => {
                        map["result"].clone()
                    }
                    other => other.clone(),
                };
                json!({
                    "result": result,
                    "metadata": {
                        "nodeChain": chain,
                        "timestamp": Utc::now().to_rfc3339(),
                    }
                })
            } else {
                value
            };
            serde_json::to_string_pretty(&wrapped).unwrap_or(content)
        }
        OutputFormat::Markdown => {
            if data.include_metadata() {
                format!(
                    "---\nexecuted: {}\ntimestamp: {}\n---\n\n{content}",
                    chain.join(" → "),
                    Utc::now().to_rfc3339()
                )
            } else {
                content
            }
        }
    }
}
