//! Core data models used throughout the question answering pipeline.
//!
//! These types represent the knowledge document, its chunks, the entries of
//! the vector index, conversation turns, and the results handed back to the
//! serving layer.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The knowledge document, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub raw_content: String,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>, raw_content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            raw_content: raw_content.into(),
        }
    }

    /// Path label stored in chunk metadata under `source`.
    pub fn source_label(&self) -> String {
        self.path.display().to_string()
    }

    /// SHA-256 of the raw content, recorded in the index metadata.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.raw_content.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A bounded excerpt of the document used as a retrieval unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub chunk_index: i64,
    pub content: String,
    pub metadata: BTreeMap<String, String>,
    /// Byte offset of `content` within the document text.
    pub source_offset: usize,
}

/// A chunk together with its embedding vector.
#[derive(Debug, Clone)]
pub struct VectorStoreEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A retrieved passage as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextItem {
    pub content: String,
    pub metadata: BTreeMap<String, String>,
}

impl From<&Chunk> for ContextItem {
    fn from(chunk: &Chunk) -> Self {
        Self {
            content: chunk.content.clone(),
            metadata: chunk.metadata.clone(),
        }
    }
}

/// Outcome of a single `query` call. Exactly one shape per call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    Answer {
        answer: String,
    },
    WithContexts {
        answer: String,
        contexts: Vec<ContextItem>,
    },
    Error {
        error: String,
    },
}

impl QueryResult {
    pub fn answer(&self) -> Option<&str> {
        match self {
            QueryResult::Answer { answer } | QueryResult::WithContexts { answer, .. } => {
                Some(answer)
            }
            QueryResult::Error { .. } => None,
        }
    }

    pub fn contexts(&self) -> Option<&[ContextItem]> {
        match self {
            QueryResult::WithContexts { contexts, .. } => Some(contexts),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            QueryResult::Error { error } => Some(error),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, QueryResult::Error { .. })
    }
}

/// Readiness flags reported to the serving layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub vector_store_loaded: bool,
    pub chain_built: bool,
}

/// How the active vector store came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexOrigin {
    Loaded,
    Built,
    Rebuilt,
}

/// Summary of the active vector index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub origin: IndexOrigin,
    pub entries: usize,
    pub dims: usize,
    pub model: String,
    pub document_path: String,
    pub document_hash: String,
    pub created_at: String,
}
