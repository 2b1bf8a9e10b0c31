//! The workflow container and its graph lookups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{handles, Edge, Node};

/// Version stamped onto exports.
pub const EXPORT_VERSION: &str = "1.0";

/// A complete workflow graph as persisted by the editor.
///
/// # Examples
///
/// ```
/// use canvasflow::workflow::{Edge, Node, Workflow};
/// use canvasflow::workflow::{AgentData, OutputData};
///
/// let workflow = Workflow::new([
///     Node::start("start"),
///     Node::agent("a", AgentData::default()),
///     Node::output("out", OutputData::default()),
/// ], [
///     Edge::new("e1", "start", "a"),
///     Edge::new("e2", "a", "out"),
/// ]);
/// assert_eq!(workflow.start_node().unwrap().id, "start");
/// assert_eq!(workflow.targets_on("a", "output"), vec!["out"]);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Workflow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Workflow {
    #[must_use]
    pub fn new(
        nodes: impl IntoIterator<Item = Node>,
        edges: impl IntoIterator<Item = Edge>,
    ) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
            edges: edges.into_iter().collect(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// All start nodes (validation enforces exactly one).
    pub fn start_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|node| node.is_start())
    }

    /// The unique start node, if the workflow has exactly one.
    #[must_use]
    pub fn start_node(&self) -> Option<&Node> {
        let mut starts = self.start_nodes();
        let first = starts.next()?;
        if starts.next().is_some() {
            return None;
        }
        Some(first)
    }

    /// Outgoing edges of a node in declaration order.
    pub fn outgoing(&self, node_id: &str) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |edge| edge.source == node_id)
    }

    /// Incoming edges of a node.
    pub fn incoming(&self, node_id: &str) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |edge| edge.target == node_id)
    }

    /// Outgoing edges attached to the given handle.
    #[must_use]
    pub fn outgoing_on(&self, node_id: &str, handle: &str) -> Vec<&Edge> {
        self.outgoing(node_id)
            .filter(|edge| edge.matches_handle(handle))
            .collect()
    }

    /// Target node ids reachable from a handle, in edge order.
    #[must_use]
    pub fn targets_on(&self, node_id: &str, handle: &str) -> Vec<String> {
        self.outgoing_on(node_id, handle)
            .into_iter()
            .map(|edge| edge.target.clone())
            .collect()
    }

    /// Whether the node has at least one edge on the given handle.
    #[must_use]
    pub fn has_handle(&self, node_id: &str, handle: &str) -> bool {
        self.outgoing(node_id)
            .any(|edge| edge.matches_handle(handle))
    }

    /// Targets of the reserved error handle, used by the scheduler for
    /// local failure routing.
    #[must_use]
    pub fn error_targets(&self, node_id: &str) -> Vec<String> {
        self.targets_on(node_id, handles::ERROR)
    }

    /// Stamp this workflow for export.
    #[must_use]
    pub fn export(&self) -> WorkflowExport {
        WorkflowExport {
            version: EXPORT_VERSION.to_string(),
            exported_at: Utc::now(),
            workflow: self.clone(),
        }
    }
}

/// An exported workflow with version and timestamp envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExport {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    #[serde(flatten)]
    pub workflow: Workflow,
}
