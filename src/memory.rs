//! Long-term memory adapter interface.
//!
//! Memory nodes store and retrieve entries keyed by session and filters.
//! The concrete backend (vector store, database) lives with the host;
//! [`InMemoryStore`] is the reference implementation used in tests and
//! small embeddings.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A stored memory entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub content: String,
    pub metadata: MemoryMetadata,
}

/// Entry provenance and scoping metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMetadata {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Query against the store; absent fields do not constrain.
#[derive(Clone, Debug, Default)]
pub struct MemoryQuery {
    pub text: Option<String>,
    pub limit: Option<usize>,
    pub session_id: Option<String>,
    pub filter: Option<Map<String, Value>>,
}

/// Errors raised by memory backends.
#[derive(Debug, Error, Diagnostic)]
pub enum MemoryError {
    #[error("memory backend failure: {0}")]
    #[diagnostic(code(canvasflow::memory::backend))]
    Backend(String),
}

/// Pluggable memory backend.
///
/// Writes under a single session id must be atomic per entry; the adapter
/// is shared across the run and its sub-workflows.
#[async_trait]
pub trait MemoryAdapter: Send + Sync {
    async fn store(&self, entry: MemoryEntry) -> Result<(), MemoryError>;

    async fn query(&self, query: MemoryQuery) -> Result<Vec<MemoryEntry>, MemoryError>;
}

/// Reference backend: a substring-scored vector of entries.
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<Vec<MemoryEntry>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MemoryAdapter for InMemoryStore {
    async fn store(&self, entry: MemoryEntry) -> Result<(), MemoryError> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    async fn query(&self, query: MemoryQuery) -> Result<Vec<MemoryEntry>, MemoryError> {
        let entries = self.entries.lock().unwrap();
        let needle = query.text.as_deref().map(str::to_lowercase);
        let mut hits: Vec<MemoryEntry> = entries
            .iter()
            .filter(|entry| {
                if let Some(session) = &query.session_id {
                    if entry.metadata.session_id.as_deref() != Some(session) {
                        return false;
                    }
                }
                if let Some(filter) = &query.filter {
                    for (key, expected) in filter {
                        if entry.metadata.extra.get(key) != Some(expected) {
                            return false;
                        }
                    }
                }
                match &needle {
                    Some(needle) if !needle.is_empty() => {
                        entry.content.to_lowercase().contains(needle)
                    }
                    _ => true,
                }
            })
            .cloned()
            .collect();
        // Most recent first.
        hits.sort_by(|a, b| b.metadata.timestamp.cmp(&a.metadata.timestamp));
        if let Some(limit) = query.limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }
}
