//! # Canvasflow: Graph-driven LLM Workflow Engine
//!
//! Canvasflow executes directed workflow graphs whose nodes are LLM calls,
//! conditional routers, parallel fan-out/fan-in, iterative loops, embedded
//! sub-workflows, memory operations, tool invocations, and output
//! formatters. Edges carry string outputs between nodes, tagged by source
//! handle.
//!
//! ## Core Concepts
//!
//! - **Workflow**: Declarative graph of typed nodes and handle-tagged edges
//! - **Scheduler**: FIFO frontier with circuit breakers, error routing, and
//!   recursive subgraph execution
//! - **Provider**: Pluggable chat interface with token streaming and
//!   tool-call reporting
//! - **Context**: Read-only façade handed to node handlers, carrying input,
//!   history, callbacks, cancellation, and subsystem handles
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use canvasflow::provider::ChatProvider;
//! use canvasflow::scheduler::{ExecutionOptions, WorkflowExecutor};
//! use canvasflow::workflow::Workflow;
//!
//! # async fn example(provider: Arc<dyn ChatProvider>, workflow: Workflow) -> Result<(), Box<dyn std::error::Error>> {
//! let executor = WorkflowExecutor::new(provider);
//! let report = executor
//!     .run(&workflow, "summarize this", ExecutionOptions::default())
//!     .await?;
//! println!("{}", report.output);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`workflow`] - Graph data model and JSON surface
//! - [`validation`] - Pre-flight static checks
//! - [`scheduler`] - Run loop, options, reports, and error taxonomy
//! - [`nodes`] - One handler per node kind
//! - [`context`] - Execution context passed to handlers
//! - [`provider`] - LLM provider interface
//! - [`registry`] - Tool and subflow registries
//! - [`memory`] - Long-term memory adapter interface
//! - [`hitl`] - Human-in-the-loop gate
//! - [`events`] - Streaming callbacks and event fan-out
//! - [`tokens`] / [`compaction`] - Token accounting and history compaction

pub mod compaction;
pub mod context;
pub mod events;
pub mod hitl;
pub mod memory;
pub mod message;
pub mod nodes;
pub mod provider;
pub mod registry;
pub mod scheduler;
pub mod telemetry;
pub mod tokens;
pub mod utils;
pub mod validation;
pub mod workflow;
