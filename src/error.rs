//! Error taxonomy for the pipeline.
//!
//! Startup failures ([`RagError::is_fatal`]) stop the service from serving
//! queries. Everything else is recoverable and is reported to callers as a
//! `QueryResult::Error` payload.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = RagError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("failed to read document {path}: {message}")]
    DocumentRead { path: PathBuf, message: String },

    #[error("document {path} is not valid UTF-8")]
    DocumentEncoding { path: PathBuf },

    #[error("no persisted index at {path}")]
    IndexNotFound { path: PathBuf },

    #[error("vector store error: {0}")]
    Store(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },

    #[error("index initialization failed: load error: {load}; rebuild error: {rebuild}")]
    Startup { load: String, rebuild: String },
}

impl RagError {
    /// Errors that prevent the pipeline from starting.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RagError::DocumentRead { .. } | RagError::DocumentEncoding { .. } | RagError::Startup { .. }
        )
    }

    pub(crate) fn store(err: impl std::fmt::Display) -> Self {
        RagError::Store(err.to_string())
    }
}

impl From<sqlx::Error> for RagError {
    fn from(err: sqlx::Error) -> Self {
        RagError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for RagError {
    fn from(err: serde_json::Error) -> Self {
        RagError::Store(format!("metadata serialization: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let startup = RagError::Startup {
            load: "corrupt".into(),
            rebuild: "unreachable".into(),
        };
        assert!(startup.is_fatal());
        assert!(RagError::DocumentEncoding {
            path: PathBuf::from("a.txt")
        }
        .is_fatal());
        assert!(!RagError::Generation("503".into()).is_fatal());
        assert!(!RagError::Timeout {
            stage: "generation",
            secs: 5
        }
        .is_fatal());
    }

    #[test]
    fn test_messages_are_human_readable() {
        let err = RagError::DimensionMismatch {
            expected: 1024,
            actual: 768,
        };
        assert_eq!(
            err.to_string(),
            "embedding dimension mismatch: expected 1024, got 768"
        );
    }
}
