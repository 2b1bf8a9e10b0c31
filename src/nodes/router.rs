//! Router node: LLM-driven conditional dispatch.
//!
//! Routes are derived from the node's outgoing edges (reserved handles
//! excluded) and offered to the model as a single forced `select_route`
//! function whose `route_id` argument is enum-constrained. Parsing falls
//! back to a bare 1-based index in the content, then to the configured
//! fallback behavior.

use serde_json::{json, Value};
use tracing::debug;

use crate::context::ExecutionContext;
use crate::message::ChatMessage;
use crate::provider::{ChatOptions, ToolChoice, ToolSpec};
use crate::workflow::{handles, RouterData, RouterFallback};

use super::{NodeError, NodeExecution, Transition};

const SELECT_ROUTE: &str = "select_route";
const ROUTING_MAX_TOKENS: u32 = 100;

struct Route {
    id: String,
    node_id: String,
    name: String,
    description: String,
}

pub(crate) async fn execute(
    ctx: &ExecutionContext,
    data: &RouterData,
) -> Result<NodeExecution, NodeError> {
    let routes = collect_routes(ctx);
    if routes.is_empty() {
        return Err(NodeError::InvalidConfig(
            "router has no outgoing routes".to_string(),
        ));
    }

    // One route needs no model opinion.
    if routes.len() == 1 {
        let route = &routes[0];
        return Ok(selection(ctx, route, None, false));
    }

    let model = ctx.resolve_model(data.model.as_deref())?;
    let parsed = match call_router(ctx, data, &model, &routes).await {
        Ok(parsed) => parsed,
        Err(err) if !err.is_cancellation() => {
            debug!(node = %ctx.node_id, error = %err, "routing call failed, applying fallback");
            None
        }
        Err(err) => return Err(err),
    };

    match parsed {
        Some((index, reasoning)) => Ok(selection(ctx, &routes[index], reasoning, false)),
        None => match data.fallback_behavior.unwrap_or_default() {
            RouterFallback::First => Ok(selection(ctx, &routes[0], None, true)),
            RouterFallback::Error => Err(NodeError::InvalidConfig(
                "router could not determine a route".to_string(),
            )),
            RouterFallback::None => Ok(NodeExecution::new(ctx.input.clone()).with_metadata(json!({
                "selectedRouteId": Value::Null,
                "selectedNodeId": Value::Null,
                "reasoning": Value::Null,
                "fallbackUsed": false,
            }))),
        },
    }
}

fn collect_routes(ctx: &ExecutionContext) -> Vec<Route> {
    ctx.outgoing_edges(&ctx.node_id, None)
        .into_iter()
        .filter(|edge| !handles::RESERVED.contains(&edge.handle()))
        .enumerate()
        .map(|(index, edge)| {
            let target = ctx.get_node(&edge.target);
            let id = edge
                .source_handle
                .clone()
                .unwrap_or_else(|| format!("route-{index}"));
            let name = target
                .and_then(|node| node.body.label().map(str::to_string))
                .or_else(|| edge.label.clone())
                .unwrap_or_else(|| format!("Route {}", index + 1));
            let description = target
                .and_then(|node| node.description().map(str::to_string))
                .unwrap_or_default();
            Route {
                id,
                node_id: edge.target.clone(),
                name,
                description,
            }
        })
        .collect()
}

/// Issue the routing call and parse its decision; `None` means the model
/// answered but no valid route could be recovered.
async fn call_router(
    ctx: &ExecutionContext,
    data: &RouterData,
    model: &str,
    routes: &[Route],
) -> Result<Option<(usize, Option<String>)>, NodeError> {
    let mut system = String::from(
        "You are a routing controller. Select the route that best matches the input.\nRoutes:\n",
    );
    for route in routes {
        system.push_str(&format!(
            "- id: {}; name: {}; description: {}\n",
            route.id, route.name, route.description
        ));
    }
    if let Some(rules) = &data.prompt {
        system.push_str(&format!("\nRouting rules:\n{rules}\n"));
    }
    system.push_str("\nCall the select_route function with the chosen route_id.");

    let ids: Vec<&str> = routes.iter().map(|route| route.id.as_str()).collect();
    let tool = ToolSpec::new(SELECT_ROUTE)
        .describe("Select the route to dispatch the input to")
        .with_parameters(json!({
            "type": "object",
            "properties": {
                "route_id": { "type": "string", "enum": ids },
                "reasoning": { "type": "string" },
            },
            "required": ["route_id"],
        }));

    let response = ctx
        .provider()
        .chat(
            model,
            &[ChatMessage::system(system), ChatMessage::user(ctx.input.clone())],
            ChatOptions {
                temperature: Some(0.0),
                max_tokens: Some(ROUTING_MAX_TOKENS),
                tools: vec![tool],
                tool_choice: Some(ToolChoice::Required(SELECT_ROUTE.to_string())),
                cancel: Some(ctx.cancel().clone()),
                ..Default::default()
            },
        )
        .await?;

    if let Some(usage) = &response.usage {
        ctx.record_usage(usage);
    }

    for call in &response.tool_calls {
        if call.name != SELECT_ROUTE {
            continue;
        }
        let arguments = parse_arguments(&call.arguments);
        let route_id = arguments
            .as_ref()
            .and_then(|args| args.get("route_id"))
            .and_then(Value::as_str);
        if let Some(route_id) = route_id {
            if let Some(index) = routes.iter().position(|route| route.id == route_id) {
                let reasoning = arguments
                    .as_ref()
                    .and_then(|args| args.get("reasoning"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                return Ok(Some((index, reasoning)));
            }
        }
    }

    // Last resort: a bare 1-based index in the content.
    if let Some(content) = &response.content {
        if let Ok(position) = content.trim().parse::<usize>() {
            if (1..=routes.len()).contains(&position) {
                return Ok(Some((position - 1, None)));
            }
        }
    }

    Ok(None)
}

/// Tool arguments arrive as an object or a JSON-encoded string.
fn parse_arguments(arguments: &Value) -> Option<Value> {
    match arguments {
        Value::Object(_) => Some(arguments.clone()),
        Value::String(raw) => serde_json::from_str(raw).ok(),
        _ => None,
    }
}

/// The input passes through unchanged to the selected target.
fn selection(
    ctx: &ExecutionContext,
    route: &Route,
    reasoning: Option<String>,
    fallback_used: bool,
) -> NodeExecution {
    NodeExecution::new(ctx.input.clone())
        .with_next(vec![Transition::to(route.node_id.clone())])
        .with_metadata(json!({
            "selectedRouteId": route.id,
            "selectedNodeId": route.node_id,
            "reasoning": reasoning,
            "fallbackUsed": fallback_used,
        }))
}
