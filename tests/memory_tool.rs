mod common;

use std::sync::Arc;

use async_trait::async_trait;
use canvasflow::memory::{InMemoryStore, MemoryAdapter, MemoryQuery};
use canvasflow::provider::ToolSpec;
use canvasflow::registry::{ToolError, ToolHandler, ToolRegistry};
use canvasflow::scheduler::{ExecutionError, ExecutionOptions};
use canvasflow::workflow::{MemoryData, MemoryOp, Node, Workflow};
use common::*;
use serde_json::Value;

fn memory_node(id: &str, operation: MemoryOp) -> Node {
    Node::memory(
        id,
        MemoryData {
            operation: Some(operation),
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn store_then_retrieve_round_trips_within_a_session() {
    let workflow = Workflow::new(
        [
            Node::start("start"),
            memory_node("remember", MemoryOp::Store),
            memory_node("recall", MemoryOp::Retrieve),
            out("out"),
        ],
        [
            edge("e1", "start", "remember"),
            edge("e2", "remember", "recall"),
            edge("e3", "recall", "out"),
        ],
    );

    let store = Arc::new(InMemoryStore::new());
    let (executor, _stub) = executor(StubProvider::text("unused"));
    let executor = executor.with_memory(store.clone());

    let report = executor
        .run(&workflow, "the sky is teal today", ExecutionOptions::default())
        .await
        .unwrap();

    // Store passes through; retrieve finds the stored entry.
    assert_eq!(report.outputs["remember"], "the sky is teal today");
    assert_eq!(report.outputs["recall"], "the sky is teal today");
    assert_eq!(store.len(), 1);

    let entries = store
        .query(MemoryQuery {
            session_id: Some(report.session_id.clone()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].metadata.node_id.as_deref(), Some("remember"));
    assert_eq!(entries[0].metadata.source, "workflow");
}

#[tokio::test]
async fn retrieve_scoped_to_a_foreign_session_finds_nothing() {
    let workflow = Workflow::new(
        [
            Node::start("start"),
            memory_node("recall", MemoryOp::Retrieve),
            out("out"),
        ],
        [
            edge("e1", "start", "recall"),
            edge("e2", "recall", "out"),
        ],
    );

    let store = Arc::new(InMemoryStore::new());
    let (executor, _stub) = executor(StubProvider::text("unused"));
    let executor = executor.with_memory(store);

    // Fresh session, empty store: retrieve yields the empty string.
    let report = executor
        .run(&workflow, "anything", ExecutionOptions::default())
        .await
        .unwrap();
    assert_eq!(report.outputs["recall"], "");
}

#[tokio::test]
async fn memory_node_without_adapter_is_a_node_failure() {
    let workflow = Workflow::new(
        [
            Node::start("start"),
            memory_node("remember", MemoryOp::Store),
        ],
        [edge("e1", "start", "remember")],
    );
    let (executor, _stub) = executor(StubProvider::text("unused"));
    let err = executor
        .run(&workflow, "x", ExecutionOptions::default())
        .await
        .unwrap_err();
    assert!(
        matches!(err, ExecutionError::NodeFailed { ref node_id, .. } if node_id == "remember")
    );
}

struct Shout;

#[async_trait]
impl ToolHandler for Shout {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("shout").describe("Uppercase the input")
    }

    async fn invoke(&self, arguments: Value) -> Result<String, ToolError> {
        Ok(arguments["input"].as_str().unwrap_or_default().to_uppercase())
    }
}

struct Broken;

#[async_trait]
impl ToolHandler for Broken {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("broken").describe("Always fails")
    }

    async fn invoke(&self, _arguments: Value) -> Result<String, ToolError> {
        Err(ToolError::execution("broken", "no such backend"))
    }
}

fn tools() -> Arc<ToolRegistry> {
    let registry = ToolRegistry::new();
    registry.register(Arc::new(Shout));
    registry.register(Arc::new(Broken));
    Arc::new(registry)
}

#[tokio::test]
async fn tool_node_executes_the_registry_handler() {
    let workflow = Workflow::new(
        [Node::start("start"), tool_node("t", "shout"), out("out")],
        [edge("e1", "start", "t"), edge("e2", "t", "out")],
    );
    let (executor, stub) = executor(StubProvider::text("unused"));
    let executor = executor.with_tools(tools());

    let report = executor
        .run(&workflow, "make it loud", ExecutionOptions::default())
        .await
        .unwrap();

    assert_eq!(report.outputs["t"], "MAKE IT LOUD");
    // No LLM involvement at all.
    assert_eq!(stub.call_count(), 0);
}

#[tokio::test]
async fn failing_tool_node_routes_the_error_handle() {
    let workflow = Workflow::new(
        [
            Node::start("start"),
            tool_node("t", "broken"),
            out("rescue"),
        ],
        [
            edge("e1", "start", "t"),
            edge_on("e2", "t", "error", "rescue"),
        ],
    );
    let (executor, _stub) = executor(StubProvider::text("unused"));
    let executor = executor.with_tools(tools());

    let report = executor
        .run(&workflow, "x", ExecutionOptions::default())
        .await
        .unwrap();

    assert_eq!(
        report.node_statuses["t"],
        canvasflow::scheduler::NodeStatus::Error
    );
    assert!(report.output.contains("no such backend"));
}
