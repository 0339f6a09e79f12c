//! Top-K retrieval over the vector store.

use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::models::Chunk;
use crate::store::VectorStore;

pub const DEFAULT_TOP_K: usize = 5;

/// Embeds a question and returns the `k` nearest chunks. No score
/// threshold is applied, so the result always has `min(k, len)` chunks.
#[derive(Clone)]
pub struct Retriever {
    provider: Arc<dyn EmbeddingProvider>,
    k: usize,
}

impl Retriever {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, k: usize) -> Self {
        Self {
            provider,
            k: k.max(1),
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub async fn retrieve(&self, store: &VectorStore, question: &str) -> Result<Vec<Chunk>> {
        if store.is_empty() {
            return Ok(Vec::new());
        }
        let query = self
            .provider
            .embed(question)
            .await
            .map_err(|e| RagError::Embedding(format!("{:#}", e)))?;
        store.search(&query, self.k)
    }
}
