//! Pre-flight static validation of workflow graphs.
//!
//! Error-severity issues block execution; warnings are logged and the run
//! proceeds. Cycles are legal (loops rely on runtime caps), so no
//! acyclicity check exists here.

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::registry::SubflowRegistry;
use crate::workflow::{handles, Node, NodeBody, Workflow};

/// Machine-readable issue codes, serialized in SCREAMING_SNAKE_CASE.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    MissingStartNode,
    MultipleStartNodes,
    MissingModel,
    EmptyPrompt,
    DisconnectedNode,
    DeadEndNode,
    MissingRequiredPort,
    MissingEdgeLabel,
    DuplicateSourceHandle,
    MissingConditionPrompt,
    InvalidMaxIterations,
    MissingSubflowId,
    SubflowNotFound,
    MissingInputMapping,
    NoSubflowOutputs,
    MissingToolId,
    OutputNotTerminal,
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::MissingStartNode => "MISSING_START_NODE",
            Self::MultipleStartNodes => "MULTIPLE_START_NODES",
            Self::MissingModel => "MISSING_MODEL",
            Self::EmptyPrompt => "EMPTY_PROMPT",
            Self::DisconnectedNode => "DISCONNECTED_NODE",
            Self::DeadEndNode => "DEAD_END_NODE",
            Self::MissingRequiredPort => "MISSING_REQUIRED_PORT",
            Self::MissingEdgeLabel => "MISSING_EDGE_LABEL",
            Self::DuplicateSourceHandle => "DUPLICATE_SOURCE_HANDLE",
            Self::MissingConditionPrompt => "MISSING_CONDITION_PROMPT",
            Self::InvalidMaxIterations => "INVALID_MAX_ITERATIONS",
            Self::MissingSubflowId => "MISSING_SUBFLOW_ID",
            Self::SubflowNotFound => "SUBFLOW_NOT_FOUND",
            Self::MissingInputMapping => "MISSING_INPUT_MAPPING",
            Self::NoSubflowOutputs => "NO_SUBFLOW_OUTPUTS",
            Self::MissingToolId => "MISSING_TOOL_ID",
            Self::OutputNotTerminal => "OUTPUT_NOT_TERMINAL",
        };
        f.write_str(code)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One finding of the validator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub code: ValidationCode,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    fn error(code: ValidationCode, node_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Error,
            node_id: node_id.map(str::to_string),
            message: message.into(),
        }
    }

    fn warning(code: ValidationCode, node_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Warning,
            node_id: node_id.map(str::to_string),
            message: message.into(),
        }
    }
}

/// Whether any issue blocks execution.
#[must_use]
pub fn has_errors(issues: &[ValidationIssue]) -> bool {
    issues.iter().any(|issue| issue.severity == Severity::Error)
}

/// Validate a workflow against the static invariants.
#[must_use]
pub fn validate(
    workflow: &Workflow,
    subflows: Option<&SubflowRegistry>,
    default_model: Option<&str>,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    check_start(workflow, &mut issues);
    check_connectivity(workflow, &mut issues);
    for node in &workflow.nodes {
        check_node(workflow, node, subflows, default_model, &mut issues);
    }

    issues
}

fn check_start(workflow: &Workflow, issues: &mut Vec<ValidationIssue>) {
    let starts: Vec<&Node> = workflow.start_nodes().collect();
    match starts.len() {
        0 => issues.push(ValidationIssue::error(
            ValidationCode::MissingStartNode,
            None,
            "workflow has no start node",
        )),
        1 => {
            let start = starts[0];
            if workflow.outgoing(&start.id).next().is_none() {
                issues.push(ValidationIssue::error(
                    ValidationCode::DeadEndNode,
                    Some(start.id.as_str()),
                    "start node has no outgoing edges",
                ));
            }
            if workflow.incoming(&start.id).next().is_some() {
                issues.push(ValidationIssue::warning(
                    ValidationCode::DisconnectedNode,
                    Some(start.id.as_str()),
                    "start node must not have incoming edges",
                ));
            }
        }
        count => issues.push(ValidationIssue::error(
            ValidationCode::MultipleStartNodes,
            None,
            format!("workflow has {count} start nodes, expected exactly one"),
        )),
    }
}

fn check_connectivity(workflow: &Workflow, issues: &mut Vec<ValidationIssue>) {
    for node in &workflow.nodes {
        if node.is_start() {
            continue;
        }
        if workflow.incoming(&node.id).next().is_none() {
            issues.push(ValidationIssue::warning(
                ValidationCode::DisconnectedNode,
                Some(node.id.as_str()),
                format!("node '{}' has no incoming edges and will never run", node.id),
            ));
        }
        if !node.is_output() && workflow.outgoing(&node.id).next().is_none() {
            issues.push(ValidationIssue::warning(
                ValidationCode::DeadEndNode,
                Some(node.id.as_str()),
                format!("node '{}' has no outgoing edges", node.id),
            ));
        }
    }
}

fn check_node(
    workflow: &Workflow,
    node: &Node,
    subflows: Option<&SubflowRegistry>,
    default_model: Option<&str>,
    issues: &mut Vec<ValidationIssue>,
) {
    match &node.body {
        NodeBody::Start(_) | NodeBody::Memory(_) => {}
        NodeBody::Agent(data) => {
            if data.model.is_none() && default_model.is_none() {
                issues.push(ValidationIssue::error(
                    ValidationCode::MissingModel,
                    Some(node.id.as_str()),
                    "agent node has no model and no default model is configured",
                ));
            }
            if data.prompt.as_deref().is_none_or(str::is_empty) {
                issues.push(ValidationIssue::warning(
                    ValidationCode::EmptyPrompt,
                    Some(node.id.as_str()),
                    "agent node has no system prompt",
                ));
            }
        }
        NodeBody::Router(_) => check_router(workflow, node, issues),
        NodeBody::Parallel(data) => {
            if data.branches.is_empty() {
                issues.push(ValidationIssue::error(
                    ValidationCode::MissingRequiredPort,
                    Some(node.id.as_str()),
                    "parallel node has no branches",
                ));
            }
            if data.merge_enabled() {
                if !workflow.has_handle(&node.id, handles::MERGED) {
                    issues.push(ValidationIssue::warning(
                        ValidationCode::MissingRequiredPort,
                        Some(node.id.as_str()),
                        "parallel node in merge mode has no edge on the merged handle",
                    ));
                }
            } else {
                for branch in &data.branches {
                    if !workflow.has_handle(&node.id, &branch.id) {
                        issues.push(ValidationIssue::warning(
                            ValidationCode::MissingRequiredPort,
                            Some(node.id.as_str()),
                            format!("branch '{}' has no edge on its handle", branch.id),
                        ));
                    }
                }
            }
        }
        NodeBody::WhileLoop(data) => {
            if data.condition_prompt.as_deref().is_none_or(str::is_empty)
                && data.custom_evaluator.is_none()
            {
                issues.push(ValidationIssue::error(
                    ValidationCode::MissingConditionPrompt,
                    Some(node.id.as_str()),
                    "while-loop has neither a condition prompt nor a custom evaluator",
                ));
            }
            if data.max_iterations == Some(0) {
                issues.push(ValidationIssue::error(
                    ValidationCode::InvalidMaxIterations,
                    Some(node.id.as_str()),
                    "while-loop maxIterations must be greater than zero",
                ));
            }
            for handle in [handles::BODY, handles::DONE] {
                if !workflow.has_handle(&node.id, handle) {
                    issues.push(ValidationIssue::warning(
                        ValidationCode::MissingRequiredPort,
                        Some(node.id.as_str()),
                        format!("while-loop has no edge on the {handle} handle"),
                    ));
                }
            }
            if workflow.outgoing_on(&node.id, handles::BODY).len() > 1 {
                issues.push(ValidationIssue::warning(
                    ValidationCode::DuplicateSourceHandle,
                    Some(node.id.as_str()),
                    "while-loop has multiple edges on the body handle; only the first is used",
                ));
            }
        }
        NodeBody::Subflow(data) => check_subflow(node, data, subflows, issues),
        NodeBody::Tool(data) => {
            if data.tool_id.as_deref().is_none_or(str::is_empty) {
                issues.push(ValidationIssue::error(
                    ValidationCode::MissingToolId,
                    Some(node.id.as_str()),
                    "tool node has no toolId",
                ));
            }
        }
        NodeBody::Output(_) => {
            if workflow.outgoing(&node.id).next().is_some() {
                issues.push(ValidationIssue::warning(
                    ValidationCode::OutputNotTerminal,
                    Some(node.id.as_str()),
                    "output node is terminal; its outgoing edges are ignored",
                ));
            }
        }
    }
}

fn check_router(workflow: &Workflow, node: &Node, issues: &mut Vec<ValidationIssue>) {
    let routes: Vec<_> = workflow
        .outgoing(&node.id)
        .filter(|edge| !handles::RESERVED.contains(&edge.handle()))
        .collect();
    if routes.is_empty() {
        issues.push(ValidationIssue::error(
            ValidationCode::DeadEndNode,
            Some(node.id.as_str()),
            "router has no outgoing routes on non-reserved handles",
        ));
        return;
    }

    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let mut handle_counts: FxHashMap<&str, usize> = FxHashMap::default();
    for edge in &routes {
        *handle_counts.entry(edge.handle()).or_insert(0) += 1;
        let target_label = workflow
            .node(&edge.target)
            .and_then(|target| target.body.label());
        if target_label.is_none() && edge.label.is_none() {
            let key = edge.id.as_str();
            if seen.insert(key) {
                issues.push(ValidationIssue::warning(
                    ValidationCode::MissingEdgeLabel,
                    Some(node.id.as_str()),
                    format!(
                        "route to '{}' has neither a target label nor an edge label",
                        edge.target
                    ),
                ));
            }
        }
    }
    for (handle, count) in handle_counts {
        if count > 1 {
            issues.push(ValidationIssue::warning(
                ValidationCode::DuplicateSourceHandle,
                Some(node.id.as_str()),
                format!("router handle '{handle}' is used by {count} edges"),
            ));
        }
    }
}

fn check_subflow(
    node: &Node,
    data: &crate::workflow::SubflowData,
    subflows: Option<&SubflowRegistry>,
    issues: &mut Vec<ValidationIssue>,
) {
    let Some(subflow_id) = data.subflow_id.as_deref().filter(|id| !id.is_empty()) else {
        issues.push(ValidationIssue::error(
            ValidationCode::MissingSubflowId,
            Some(node.id.as_str()),
            "subflow node has no subflowId",
        ));
        return;
    };
    let Some(registry) = subflows else {
        return;
    };
    let Some(definition) = registry.get(subflow_id) else {
        issues.push(ValidationIssue::error(
            ValidationCode::SubflowNotFound,
            Some(node.id.as_str()),
            format!("subflow '{subflow_id}' is not registered"),
        ));
        return;
    };
    for input in &definition.inputs {
        if input.required
            && input.default.is_none()
            && !data.input_mappings.contains_key(&input.id)
        {
            issues.push(ValidationIssue::error(
                ValidationCode::MissingInputMapping,
                Some(node.id.as_str()),
                format!("required subflow input '{}' has no mapping", input.id),
            ));
        }
    }
    if definition.outputs.is_empty() {
        issues.push(ValidationIssue::warning(
            ValidationCode::NoSubflowOutputs,
            Some(node.id.as_str()),
            format!("subflow '{subflow_id}' declares no outputs"),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{AgentData, Edge, OutputData, RouterData, WhileLoopData};

    fn linear() -> Workflow {
        Workflow::new(
            [
                Node::start("start"),
                Node::agent(
                    "a",
                    AgentData {
                        model: Some("test/model".into()),
                        prompt: Some("do things".into()),
                        ..Default::default()
                    },
                ),
                Node::output("out", OutputData::default()),
            ],
            [
                Edge::new("e1", "start", "a"),
                Edge::new("e2", "a", "out"),
            ],
        )
    }

    #[test]
    fn clean_workflow_has_no_issues() {
        assert!(validate(&linear(), None, None).is_empty());
    }

    #[test]
    fn missing_and_multiple_starts() {
        let mut wf = linear();
        wf.nodes.retain(|node| !node.is_start());
        let issues = validate(&wf, None, None);
        assert!(issues
            .iter()
            .any(|issue| issue.code == ValidationCode::MissingStartNode));

        let mut wf = linear();
        wf.nodes.push(Node::start("start2"));
        let issues = validate(&wf, None, None);
        assert!(issues
            .iter()
            .any(|issue| issue.code == ValidationCode::MultipleStartNodes));
    }

    #[test]
    fn agent_without_model_errors_unless_default_provided() {
        let mut wf = linear();
        if let NodeBody::Agent(data) = &mut wf.nodes[1].body {
            data.model = None;
        }
        assert!(has_errors(&validate(&wf, None, None)));
        assert!(!has_errors(&validate(&wf, None, Some("fallback/model"))));
    }

    #[test]
    fn router_without_routes_is_an_error() {
        let wf = Workflow::new(
            [
                Node::start("start"),
                Node::router("r", RouterData::default()),
                Node::output("out", OutputData::default()),
            ],
            [
                Edge::new("e1", "start", "r"),
                Edge::new("e2", "r", "out").on_handle(handles::ERROR),
            ],
        );
        let issues = validate(&wf, None, Some("m"));
        assert!(issues
            .iter()
            .any(|issue| issue.code == ValidationCode::DeadEndNode && issue.severity == Severity::Error));
    }

    #[test]
    fn while_loop_port_warnings() {
        let wf = Workflow::new(
            [
                Node::start("start"),
                Node::while_loop(
                    "w",
                    WhileLoopData {
                        condition_prompt: Some("keep going?".into()),
                        ..Default::default()
                    },
                ),
                Node::output("out", OutputData::default()),
            ],
            [
                Edge::new("e1", "start", "w"),
                Edge::new("e2", "w", "out").on_handle(handles::DONE),
            ],
        );
        let issues = validate(&wf, None, Some("m"));
        assert!(issues.iter().any(|issue| {
            issue.code == ValidationCode::MissingRequiredPort && issue.severity == Severity::Warning
        }));
        assert!(!has_errors(&issues));
    }

    #[test]
    fn zero_max_iterations_is_invalid() {
        let wf = Workflow::new(
            [
                Node::start("start"),
                Node::while_loop(
                    "w",
                    WhileLoopData {
                        condition_prompt: Some("go?".into()),
                        max_iterations: Some(0),
                        ..Default::default()
                    },
                ),
            ],
            [Edge::new("e1", "start", "w")],
        );
        let issues = validate(&wf, None, Some("m"));
        assert!(issues
            .iter()
            .any(|issue| issue.code == ValidationCode::InvalidMaxIterations));
    }

    #[test]
    fn output_with_outgoing_edge_warns() {
        let mut wf = linear();
        wf.edges.push(Edge::new("e3", "out", "a"));
        let issues = validate(&wf, None, None);
        assert!(issues
            .iter()
            .any(|issue| issue.code == ValidationCode::OutputNotTerminal));
    }
}
