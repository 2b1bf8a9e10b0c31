//! Tool registry: name → handler map for LLM tool calls and tool nodes.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use thiserror::Error;

use crate::provider::ToolSpec;

/// An executable tool exposed to models and tool nodes.
///
/// The [`ToolSpec`] advertises the JSON-Schema parameters; `invoke`
/// receives the parsed arguments the model produced.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn invoke(&self, arguments: Value) -> Result<String, ToolError>;
}

/// Host-provided fallback invoked for tool calls naming no registered
/// handler.
#[async_trait]
pub trait ToolCallFallback: Send + Sync {
    async fn call(&self, name: &str, arguments: &Value) -> Result<String, ToolError>;
}

/// Errors raised by tool handlers.
///
/// Inside an agent's tool loop these are recoverable: the stringified
/// error becomes the tool-result message and the loop continues. A tool
/// node treats them as node failure instead.
#[derive(Debug, Error, Diagnostic)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    #[diagnostic(
        code(canvasflow::tools::unknown),
        help("Register the tool before running, or configure a tool-call fallback.")
    )]
    Unknown(String),

    #[error("invalid arguments for tool '{name}': {message}")]
    #[diagnostic(code(canvasflow::tools::arguments))]
    Arguments { name: String, message: String },

    #[error("tool '{name}' failed: {message}")]
    #[diagnostic(code(canvasflow::tools::execution))]
    Execution { name: String, message: String },
}

impl ToolError {
    pub fn execution(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Execution {
            name: name.into(),
            message: message.to_string(),
        }
    }
}

/// Name-keyed collection of tool handlers.
#[derive(Default)]
pub struct ToolRegistry {
    handlers: RwLock<FxHashMap<String, Arc<dyn ToolHandler>>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its spec name, replacing any previous
    /// registration.
    pub fn register(&self, handler: Arc<dyn ToolHandler>) {
        let name = handler.spec().name;
        self.handlers.write().unwrap().insert(name, handler);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.read().unwrap().get(name).cloned()
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.handlers.read().unwrap().contains_key(name)
    }

    /// Registered tool names, sorted for deterministic prompts.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Handlers for the given names, preserving request order and
    /// skipping unknown entries.
    #[must_use]
    pub fn resolve(&self, names: &[String]) -> Vec<Arc<dyn ToolHandler>> {
        let handlers = self.handlers.read().unwrap();
        names
            .iter()
            .filter_map(|name| handlers.get(name).cloned())
            .collect()
    }

    /// Every registered handler, ordered by name.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<dyn ToolHandler>> {
        let handlers = self.handlers.read().unwrap();
        let mut entries: Vec<_> = handlers.iter().collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        entries.into_iter().map(|(_, h)| Arc::clone(h)).collect()
    }

    /// Direct invocation used by tool nodes: the raw input string and
    /// optional static config are folded into an arguments object.
    pub async fn execute(
        &self,
        id: &str,
        input: &str,
        config: Option<&Value>,
    ) -> Result<String, ToolError> {
        let handler = self.get(id).ok_or_else(|| ToolError::Unknown(id.to_string()))?;
        let mut arguments = json!({ "input": input });
        if let Some(Value::Object(config)) = config {
            let args = arguments.as_object_mut().unwrap();
            for (key, value) in config {
                args.insert(key.clone(), value.clone());
            }
        }
        handler.invoke(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl ToolHandler for Upper {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new("upper").describe("Uppercase the input")
        }

        async fn invoke(&self, arguments: Value) -> Result<String, ToolError> {
            let input = arguments["input"].as_str().unwrap_or_default();
            Ok(input.to_uppercase())
        }
    }

    #[tokio::test]
    async fn execute_folds_input_and_config() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Upper));
        let out = registry.execute("upper", "hello", None).await.unwrap();
        assert_eq!(out, "HELLO");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let registry = ToolRegistry::new();
        let err = registry.execute("missing", "x", None).await.unwrap_err();
        assert!(matches!(err, ToolError::Unknown(_)));
    }

    #[test]
    fn resolve_keeps_request_order() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Upper));
        let resolved = registry.resolve(&["nope".into(), "upper".into()]);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].spec().name, "upper");
    }
}
