//! Subflow registry: reusable named workflows with typed ports.

use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflow::Workflow;

/// Port type of a subflow input or output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    String,
    Number,
    Object,
    Array,
    #[default]
    Any,
}

/// A declared input or output of a subflow.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PortSpec {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub port_type: PortType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl PortSpec {
    #[must_use]
    pub fn required(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            required: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn optional(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            required: false,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// A registered reusable workflow.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub inputs: Vec<PortSpec>,
    #[serde(default)]
    pub outputs: Vec<PortSpec>,
    pub workflow: Workflow,
}

impl SubflowDefinition {
    /// The first declared input feeds the embedded workflow's start node.
    #[must_use]
    pub fn primary_input(&self) -> Option<&PortSpec> {
        self.inputs.first()
    }
}

/// Name → definition map shared across runs.
#[derive(Default)]
pub struct SubflowRegistry {
    definitions: RwLock<FxHashMap<String, Arc<SubflowDefinition>>>,
}

impl SubflowRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, definition: SubflowDefinition) {
        self.definitions
            .write()
            .unwrap()
            .insert(definition.id.clone(), Arc::new(definition));
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<SubflowDefinition>> {
        self.definitions.read().unwrap().get(id).cloned()
    }

    #[must_use]
    pub fn has(&self, id: &str) -> bool {
        self.definitions.read().unwrap().contains_key(id)
    }

    /// Registered definitions sorted by id.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<SubflowDefinition>> {
        let definitions = self.definitions.read().unwrap();
        let mut entries: Vec<_> = definitions.values().cloned().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let registry = SubflowRegistry::new();
        registry.register(SubflowDefinition {
            id: "summarize".into(),
            name: "Summarizer".into(),
            description: None,
            inputs: vec![PortSpec::required("text", "Text")],
            outputs: vec![PortSpec::optional("summary", "Summary")],
            workflow: Workflow::default(),
        });
        assert!(registry.has("summarize"));
        let def = registry.get("summarize").unwrap();
        assert_eq!(def.primary_input().unwrap().id, "text");
        assert_eq!(registry.list().len(), 1);
    }
}
