//! Edges: handle-tagged connections carrying string outputs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::handles;

/// A directed edge between two nodes.
///
/// Multiple edges may share a source; `source_handle` disambiguates which
/// output port they attach to (`body` vs `done`, a branch id, a route id,
/// `error`, `rejected`). An absent handle means the default `output` port.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Edge {
    pub id: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Edge {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            ..Default::default()
        }
    }

    /// Attach this edge to a named source handle.
    #[must_use]
    pub fn on_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The effective source handle; `None` collapses to the default
    /// `output` port.
    #[must_use]
    pub fn handle(&self) -> &str {
        self.source_handle.as_deref().unwrap_or(handles::OUTPUT)
    }

    /// Whether this edge attaches to the given handle. Reserved handles
    /// (`error`, `rejected`) never match implicitly.
    #[must_use]
    pub fn matches_handle(&self, handle: &str) -> bool {
        match &self.source_handle {
            Some(explicit) => explicit == handle,
            None => handle == handles::OUTPUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_handle_is_the_default_output_port() {
        let edge = Edge::new("e1", "a", "b");
        assert!(edge.matches_handle(handles::OUTPUT));
        assert!(!edge.matches_handle(handles::ERROR));
        assert_eq!(edge.handle(), "output");
    }

    #[test]
    fn explicit_handle_only_matches_itself() {
        let edge = Edge::new("e1", "a", "b").on_handle("done");
        assert!(edge.matches_handle("done"));
        assert!(!edge.matches_handle(handles::OUTPUT));
    }

    #[test]
    fn serialization_skips_absent_options() {
        let edge = Edge::new("e1", "a", "b");
        let json = serde_json::to_value(&edge).unwrap();
        assert!(json.get("sourceHandle").is_none());
        assert_eq!(json["source"], "a");
    }
}
