//! Node model: a closed tagged variant over the nine node kinds.
//!
//! The editor persists nodes as `{ id, kind, data }` where the `data`
//! record's schema depends on `kind`. Deserialization maps the kind string
//! onto [`NodeBody`] so dispatch is a `match`, not a string lookup; unknown
//! kinds are rejected, unknown fields inside `data` are preserved.

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// A single node of a workflow graph.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    /// Unique identifier within the workflow.
    pub id: String,
    /// Kind-specific payload.
    pub body: NodeBody,
    /// Unknown top-level fields (editor position, UI state) carried
    /// through round-trips untouched.
    pub extra: Map<String, Value>,
}

impl Node {
    #[must_use]
    pub fn new(id: impl Into<String>, body: NodeBody) -> Self {
        Self {
            id: id.into(),
            body,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn start(id: impl Into<String>) -> Self {
        Self::new(id, NodeBody::Start(StartData::default()))
    }

    #[must_use]
    pub fn agent(id: impl Into<String>, data: AgentData) -> Self {
        Self::new(id, NodeBody::Agent(data))
    }

    #[must_use]
    pub fn router(id: impl Into<String>, data: RouterData) -> Self {
        Self::new(id, NodeBody::Router(data))
    }

    #[must_use]
    pub fn parallel(id: impl Into<String>, data: ParallelData) -> Self {
        Self::new(id, NodeBody::Parallel(data))
    }

    #[must_use]
    pub fn while_loop(id: impl Into<String>, data: WhileLoopData) -> Self {
        Self::new(id, NodeBody::WhileLoop(data))
    }

    #[must_use]
    pub fn subflow(id: impl Into<String>, data: SubflowData) -> Self {
        Self::new(id, NodeBody::Subflow(data))
    }

    #[must_use]
    pub fn memory(id: impl Into<String>, data: MemoryData) -> Self {
        Self::new(id, NodeBody::Memory(data))
    }

    #[must_use]
    pub fn tool(id: impl Into<String>, data: ToolData) -> Self {
        Self::new(id, NodeBody::Tool(data))
    }

    #[must_use]
    pub fn output(id: impl Into<String>, data: OutputData) -> Self {
        Self::new(id, NodeBody::Output(data))
    }

    /// The persisted kind tag for this node.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.body.kind()
    }

    /// Display label, falling back to the node id.
    #[must_use]
    pub fn label(&self) -> &str {
        self.body.label().unwrap_or(&self.id)
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.body.description()
    }

    #[must_use]
    pub fn is_start(&self) -> bool {
        matches!(self.body, NodeBody::Start(_))
    }

    #[must_use]
    pub fn is_output(&self) -> bool {
        matches!(self.body, NodeBody::Output(_))
    }
}

/// Kind-specific node payload.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeBody {
    Start(StartData),
    Agent(AgentData),
    Router(RouterData),
    Parallel(ParallelData),
    WhileLoop(WhileLoopData),
    Subflow(SubflowData),
    Memory(MemoryData),
    Tool(ToolData),
    Output(OutputData),
}

impl NodeBody {
    /// The persisted kind tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            NodeBody::Start(_) => "start",
            NodeBody::Agent(_) => "agent",
            NodeBody::Router(_) => "router",
            NodeBody::Parallel(_) => "parallel",
            NodeBody::WhileLoop(_) => "whileLoop",
            NodeBody::Subflow(_) => "subflow",
            NodeBody::Memory(_) => "memory",
            NodeBody::Tool(_) => "tool",
            NodeBody::Output(_) => "output",
        }
    }

    /// Decode a kind tag plus raw data record into a typed body.
    pub fn from_kind_data(kind: &str, data: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            "start" => NodeBody::Start(serde_json::from_value(data)?),
            "agent" => NodeBody::Agent(serde_json::from_value(data)?),
            "router" => NodeBody::Router(serde_json::from_value(data)?),
            "parallel" => NodeBody::Parallel(serde_json::from_value(data)?),
            "whileLoop" => NodeBody::WhileLoop(serde_json::from_value(data)?),
            "subflow" => NodeBody::Subflow(serde_json::from_value(data)?),
            "memory" => NodeBody::Memory(serde_json::from_value(data)?),
            "tool" => NodeBody::Tool(serde_json::from_value(data)?),
            "output" => NodeBody::Output(serde_json::from_value(data)?),
            other => {
                return Err(<serde_json::Error as serde::de::Error>::custom(format!(
                    "unknown node kind '{other}'"
                )));
            }
        })
    }

    /// Serialize the data record back to a JSON value.
    pub fn data_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            NodeBody::Start(d) => serde_json::to_value(d),
            NodeBody::Agent(d) => serde_json::to_value(d),
            NodeBody::Router(d) => serde_json::to_value(d),
            NodeBody::Parallel(d) => serde_json::to_value(d),
            NodeBody::WhileLoop(d) => serde_json::to_value(d),
            NodeBody::Subflow(d) => serde_json::to_value(d),
            NodeBody::Memory(d) => serde_json::to_value(d),
            NodeBody::Tool(d) => serde_json::to_value(d),
            NodeBody::Output(d) => serde_json::to_value(d),
        }
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        match self {
            NodeBody::Start(d) => d.label.as_deref(),
            NodeBody::Agent(d) => d.label.as_deref(),
            NodeBody::Router(d) => d.label.as_deref(),
            NodeBody::Parallel(d) => d.label.as_deref(),
            NodeBody::WhileLoop(d) => d.label.as_deref(),
            NodeBody::Subflow(d) => d.label.as_deref(),
            NodeBody::Memory(d) => d.label.as_deref(),
            NodeBody::Tool(d) => d.label.as_deref(),
            NodeBody::Output(d) => d.label.as_deref(),
        }
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        match self {
            NodeBody::Start(d) => d.description.as_deref(),
            NodeBody::Agent(d) => d.description.as_deref(),
            NodeBody::Router(d) => d.description.as_deref(),
            NodeBody::Parallel(d) => d.description.as_deref(),
            NodeBody::WhileLoop(d) => d.description.as_deref(),
            NodeBody::Subflow(d) => d.description.as_deref(),
            NodeBody::Memory(d) => d.description.as_deref(),
            NodeBody::Tool(d) => d.description.as_deref(),
            NodeBody::Output(d) => d.description.as_deref(),
        }
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::Error;
        let data = self.body.data_value().map_err(S::Error::custom)?;
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("kind", self.body.kind())?;
        map.serialize_entry("data", &data)?;
        for (key, value) in &self.extra {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        #[derive(Deserialize)]
        struct Repr {
            id: String,
            kind: String,
            #[serde(default)]
            data: Value,
            #[serde(flatten)]
            extra: Map<String, Value>,
        }

        let repr = Repr::deserialize(deserializer)?;
        let data = match repr.data {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let body = NodeBody::from_kind_data(&repr.kind, data).map_err(D::Error::custom)?;
        Ok(Node {
            id: repr.id,
            body,
            extra: repr.extra,
        })
    }
}

// ---------------------------------------------------------------------------
// Per-kind data records
// ---------------------------------------------------------------------------

/// Start node payload. Pass-through; carries only presentation fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartData {
    pub label: Option<String>,
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Agent node payload: one LLM call with an optional tool loop.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentData {
    pub label: Option<String>,
    pub description: Option<String>,
    pub model: Option<String>,
    /// System prompt for the call.
    pub prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Tool names this agent may use; empty/absent means every registered
    /// tool.
    pub tools: Option<Vec<String>>,
    pub max_tool_iterations: Option<u32>,
    pub on_max_tool_iterations: Option<ToolIterationPolicy>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What to do when an agent's tool loop hits its iteration cap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolIterationPolicy {
    #[default]
    Warning,
    Error,
    Hitl,
}

/// Router node payload: LLM-selected conditional dispatch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterData {
    pub label: Option<String>,
    pub description: Option<String>,
    pub model: Option<String>,
    /// Extra routing rules appended to the routing system prompt.
    pub prompt: Option<String>,
    pub fallback_behavior: Option<RouterFallback>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Recovery policy when the router cannot parse a valid route.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterFallback {
    #[default]
    First,
    Error,
    None,
}

/// One concurrent branch of a parallel node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BranchSpec {
    pub id: String,
    pub label: String,
    pub model: Option<String>,
    pub prompt: Option<String>,
    pub tools: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parallel node payload: fan-out to branches, optional fan-in merge.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParallelData {
    pub label: Option<String>,
    pub description: Option<String>,
    pub branches: Vec<BranchSpec>,
    pub merge_enabled: Option<bool>,
    /// Per-branch liveness bound in milliseconds.
    pub branch_timeout: Option<u64>,
    /// Model for the merge call (and branch default).
    pub model: Option<String>,
    /// System prompt for the merge call; absent means plain concatenation.
    pub prompt: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ParallelData {
    pub const DEFAULT_BRANCH_TIMEOUT_MS: u64 = 300_000;

    #[must_use]
    pub fn merge_enabled(&self) -> bool {
        self.merge_enabled.unwrap_or(true)
    }

    #[must_use]
    pub fn branch_timeout_ms(&self) -> u64 {
        self.branch_timeout.unwrap_or(Self::DEFAULT_BRANCH_TIMEOUT_MS)
    }
}

/// While-loop node payload: conditional iteration over a body subgraph.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WhileLoopData {
    pub label: Option<String>,
    pub description: Option<String>,
    pub condition_prompt: Option<String>,
    pub condition_model: Option<String>,
    pub max_iterations: Option<u32>,
    pub on_max_iterations: Option<IterationPolicy>,
    /// Name of a host-registered evaluator that replaces the LLM check.
    pub custom_evaluator: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WhileLoopData {
    pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

    #[must_use]
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations.unwrap_or(Self::DEFAULT_MAX_ITERATIONS)
    }
}

/// What to do when a while-loop exhausts its iteration budget.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationPolicy {
    #[default]
    Warning,
    Error,
}

/// Subflow node payload: invocation of a registered sub-workflow.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubflowData {
    pub label: Option<String>,
    pub description: Option<String>,
    pub subflow_id: Option<String>,
    /// Subflow input id → literal value or `{{expression}}` string.
    pub input_mappings: Map<String, Value>,
    pub share_session: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SubflowData {
    #[must_use]
    pub fn share_session(&self) -> bool {
        self.share_session.unwrap_or(true)
    }
}

/// Memory node payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryData {
    pub label: Option<String>,
    pub description: Option<String>,
    pub operation: Option<MemoryOp>,
    /// Maximum entries returned by a retrieve.
    pub limit: Option<usize>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MemoryData {
    pub const DEFAULT_LIMIT: usize = 5;

    #[must_use]
    pub fn operation(&self) -> MemoryOp {
        self.operation.unwrap_or_default()
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryOp {
    #[default]
    Store,
    Retrieve,
}

/// Tool node payload: a direct registry invocation outside any LLM loop.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolData {
    pub label: Option<String>,
    pub description: Option<String>,
    pub tool_id: Option<String>,
    /// Static configuration merged into the invocation arguments.
    pub config: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Output node payload: terminal formatting of collected outputs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputData {
    pub label: Option<String>,
    pub description: Option<String>,
    pub mode: Option<OutputMode>,
    /// Node ids (plain or composite `parallel:branch`) to collect, in
    /// order. Empty means the executed node chain.
    pub sources: Option<Vec<String>>,
    pub intro_text: Option<String>,
    pub outro_text: Option<String>,
    pub synthesis: Option<SynthesisSpec>,
    /// Legacy `{{nodeId}}` template.
    pub template: Option<String>,
    pub format: Option<OutputFormat>,
    pub include_metadata: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OutputData {
    #[must_use]
    pub fn mode(&self) -> OutputMode {
        self.mode.unwrap_or_default()
    }

    #[must_use]
    pub fn format(&self) -> OutputFormat {
        self.format.unwrap_or_default()
    }

    #[must_use]
    pub fn include_metadata(&self) -> bool {
        self.include_metadata.unwrap_or(false)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Combine,
    Synthesis,
    Template,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Markdown,
}

/// Synthesis-mode configuration of an output node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SynthesisSpec {
    pub model: Option<String>,
    pub prompt: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_round_trip_preserves_unknown_fields() {
        let raw = json!({
            "id": "a1",
            "kind": "agent",
            "data": {
                "model": "test/model",
                "prompt": "Echo: ",
                "uiColor": "#ff00ff"
            },
            "position": { "x": 10, "y": 20 }
        });
        let node: Node = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(node.kind(), "agent");
        let NodeBody::Agent(data) = &node.body else {
            panic!("expected agent body");
        };
        assert_eq!(data.model.as_deref(), Some("test/model"));
        assert_eq!(data.extra["uiColor"], json!("#ff00ff"));

        let back = serde_json::to_value(&node).unwrap();
        assert_eq!(back["data"]["uiColor"], json!("#ff00ff"));
        assert_eq!(back["position"], raw["position"]);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let raw = json!({ "id": "x", "kind": "teleport", "data": {} });
        assert!(serde_json::from_value::<Node>(raw).is_err());
    }

    #[test]
    fn missing_data_defaults_to_empty_record() {
        let raw = json!({ "id": "s", "kind": "start" });
        let node: Node = serde_json::from_value(raw).unwrap();
        assert!(node.is_start());
    }

    #[test]
    fn while_loop_camel_case_kind_tag() {
        let node = Node::while_loop("w", WhileLoopData::default());
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["kind"], json!("whileLoop"));
    }

    #[test]
    fn parallel_defaults() {
        let data = ParallelData::default();
        assert!(data.merge_enabled());
        assert_eq!(data.branch_timeout_ms(), 300_000);
    }
}
