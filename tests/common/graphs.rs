//! Workflow builders shared by the integration tests.

use canvasflow::workflow::{
    AgentData, Edge, Node, OutputData, ParallelData, RouterData, SubflowData, ToolData,
    WhileLoopData, Workflow,
};
use serde_json::Value;

use super::provider::MODEL;

pub fn agent(id: &str, prompt: &str) -> Node {
    Node::agent(
        id,
        AgentData {
            model: Some(MODEL.to_string()),
            prompt: Some(prompt.to_string()),
            ..Default::default()
        },
    )
}

pub fn agent_with(id: &str, configure: impl FnOnce(&mut AgentData)) -> Node {
    let mut data = AgentData {
        model: Some(MODEL.to_string()),
        prompt: Some("test prompt".to_string()),
        ..Default::default()
    };
    configure(&mut data);
    Node::agent(id, data)
}

pub fn labeled_agent(id: &str, label: &str, description: &str) -> Node {
    Node::agent(
        id,
        AgentData {
            label: Some(label.to_string()),
            description: Some(description.to_string()),
            model: Some(MODEL.to_string()),
            prompt: Some(format!("{label} prompt")),
            ..Default::default()
        },
    )
}

pub fn router(id: &str, configure: impl FnOnce(&mut RouterData)) -> Node {
    let mut data = RouterData {
        model: Some(MODEL.to_string()),
        ..Default::default()
    };
    configure(&mut data);
    Node::router(id, data)
}

pub fn parallel(id: &str, configure: impl FnOnce(&mut ParallelData)) -> Node {
    let mut data = ParallelData {
        model: Some(MODEL.to_string()),
        ..Default::default()
    };
    configure(&mut data);
    Node::parallel(id, data)
}

pub fn while_loop(id: &str, configure: impl FnOnce(&mut WhileLoopData)) -> Node {
    let mut data = WhileLoopData {
        condition_prompt: Some("is more work needed?".to_string()),
        condition_model: Some(MODEL.to_string()),
        ..Default::default()
    };
    configure(&mut data);
    Node::while_loop(id, data)
}

pub fn subflow(id: &str, subflow_id: &str, mappings: &[(&str, Value)]) -> Node {
    let mut data = SubflowData {
        subflow_id: Some(subflow_id.to_string()),
        ..Default::default()
    };
    for (key, value) in mappings {
        data.input_mappings.insert((*key).to_string(), value.clone());
    }
    Node::subflow(id, data)
}

pub fn tool_node(id: &str, tool_id: &str) -> Node {
    Node::tool(
        id,
        ToolData {
            tool_id: Some(tool_id.to_string()),
            ..Default::default()
        },
    )
}

pub fn out(id: &str) -> Node {
    Node::output(id, OutputData::default())
}

pub fn out_with(id: &str, configure: impl FnOnce(&mut OutputData)) -> Node {
    let mut data = OutputData::default();
    configure(&mut data);
    Node::output(id, data)
}

pub fn edge(id: &str, source: &str, target: &str) -> Edge {
    Edge::new(id, source, target)
}

pub fn edge_on(id: &str, source: &str, handle: &str, target: &str) -> Edge {
    Edge::new(id, source, target).on_handle(handle)
}

/// Start → agent → output.
pub fn linear(agent_prompt: &str) -> Workflow {
    Workflow::new(
        [Node::start("start"), agent("a", agent_prompt), out("out")],
        [edge("e1", "start", "a"), edge("e2", "a", "out")],
    )
}
