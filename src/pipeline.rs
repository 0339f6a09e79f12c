//! The question answering pipeline.
//!
//! [`RagPipeline::open`] reads the knowledge document and brings up the
//! vector index:
//!
//! ```text
//! persist dir non-empty? ──yes──► load ──ok──► ready (loaded)
//!        │                          │
//!        no                        err
//!        ▼                          ▼
//!      build ──ok──► ready       rebuild ──ok──► ready (rebuilt)
//!        │                          │
//!       err ──► startup error      err ──► startup error
//! ```
//!
//! Each [`query`](RagPipeline::query) then runs retrieve → assemble →
//! generate → parse → record under the configured timeout. Query failures
//! never escape: they are returned as [`QueryResult::Error`].

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::RwLock;

use crate::chunk::Chunker;
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::{GenerationClient, SamplingConfig};
use crate::history::ConversationHistory;
use crate::models::{
    Chunk, ContextItem, ConversationTurn, Document, HealthStatus, IndexOrigin, IndexStats,
    QueryResult,
};
use crate::prompt::PromptAssembler;
use crate::retriever::Retriever;
use crate::store::VectorStore;

/// Prefix of every query error message.
pub const QUERY_ERROR_PREFIX: &str = "查询过程中出错: ";

struct ActiveIndex {
    store: VectorStore,
    document: Document,
    origin: IndexOrigin,
}

pub struct RagPipeline {
    config: Config,
    chunker: Chunker,
    provider: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationClient>,
    retriever: Retriever,
    assembler: PromptAssembler,
    sampling: SamplingConfig,
    index: RwLock<ActiveIndex>,
    history: Mutex<ConversationHistory>,
}

impl RagPipeline {
    /// Read the document, then load or build the index.
    ///
    /// # Errors
    ///
    /// Only fatal errors are returned: an unreadable or non-UTF-8 document,
    /// or an index that could neither be loaded nor rebuilt.
    pub async fn open(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationClient>,
    ) -> Result<Self> {
        let document = read_document(&config.document.path)?;
        let chunker = Chunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap)
            .with_separators(config.chunking.separators.clone());

        let persist_dir = config.index.persist_dir.clone();
        let batch_size = config.embedding.batch_size;

        let (store, origin) = if VectorStore::is_persisted(&persist_dir) {
            match VectorStore::load(&persist_dir, provider.dims()).await {
                Ok(store) => {
                    warn_if_stale(&store, &document);
                    (store, IndexOrigin::Loaded)
                }
                Err(load_err) => {
                    tracing::warn!(error = %load_err, "failed to load vector index, rebuilding");
                    let chunks = chunker.split_document(&document);
                    match VectorStore::build(
                        chunks,
                        provider.as_ref(),
                        &persist_dir,
                        &document,
                        batch_size,
                    )
                    .await
                    {
                        Ok(store) => (store, IndexOrigin::Rebuilt),
                        Err(rebuild_err) => {
                            return Err(RagError::Startup {
                                load: load_err.to_string(),
                                rebuild: rebuild_err.to_string(),
                            })
                        }
                    }
                }
            }
        } else {
            tracing::info!(dir = %persist_dir.display(), "no persisted index, building");
            let chunks = chunker.split_document(&document);
            let store = VectorStore::build(
                chunks,
                provider.as_ref(),
                &persist_dir,
                &document,
                batch_size,
            )
            .await
            .map_err(|build_err| RagError::Startup {
                load: RagError::IndexNotFound {
                    path: persist_dir.clone(),
                }
                .to_string(),
                rebuild: build_err.to_string(),
            })?;
            (store, IndexOrigin::Built)
        };

        tracing::info!(
            origin = ?origin,
            entries = store.len(),
            generator = generator.model_name(),
            "pipeline ready"
        );

        Ok(Self {
            retriever: Retriever::new(Arc::clone(&provider), config.retrieval.top_k),
            assembler: PromptAssembler::new(config.generation.system_prompt.clone()),
            sampling: SamplingConfig::from(&config.generation),
            history: Mutex::new(ConversationHistory::new(config.history.max_turns)),
            index: RwLock::new(ActiveIndex {
                store,
                document,
                origin,
            }),
            chunker,
            provider,
            generator,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Answer `question` from the indexed document.
    ///
    /// With `include_context` the answer is accompanied by the retrieved
    /// passages. Never fails; errors come back as [`QueryResult::Error`].
    pub async fn query(&self, question: &str, include_context: bool) -> QueryResult {
        let secs = self.config.retrieval.query_timeout_secs;
        let outcome = tokio::time::timeout(
            Duration::from_secs(secs),
            self.run_query(question, include_context),
        )
        .await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => error_result(err),
            Err(_) => error_result(RagError::Timeout {
                stage: "query",
                secs,
            }),
        }
    }

    async fn run_query(&self, question: &str, include_context: bool) -> Result<QueryResult> {
        let contexts = self.retrieve(question).await?;
        let prompt = self.assembler.assemble(&contexts, question);
        let raw = self
            .generator
            .generate(&prompt, &self.sampling)
            .await
            .map_err(generation_error)?;
        let answer = parse_answer(&raw);
        self.record(question, &answer);

        if !include_context {
            return Ok(QueryResult::Answer { answer });
        }

        let returned = if self.config.retrieval.reuse_contexts {
            contexts
        } else {
            self.retrieve(question).await?
        };

        Ok(QueryResult::WithContexts {
            answer,
            contexts: returned.iter().map(ContextItem::from).collect(),
        })
    }

    async fn retrieve(&self, question: &str) -> Result<Vec<Chunk>> {
        let index = self.index.read().await;
        self.retriever.retrieve(&index.store, question).await
    }

    fn record(&self, question: &str, answer: &str) {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .append(question, answer);
    }

    /// Snapshot of the conversation, oldest turn first.
    pub fn history(&self) -> Vec<ConversationTurn> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).all()
    }

    pub fn clear_history(&self) -> &'static str {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clear()
    }

    /// Readiness flags. Both report `false` while a rebuild holds the index.
    pub fn health_status(&self) -> HealthStatus {
        let ready = self.index.try_read().is_ok();
        HealthStatus {
            vector_store_loaded: ready,
            chain_built: ready,
        }
    }

    pub async fn index_stats(&self) -> IndexStats {
        let index = self.index.read().await;
        index.store.stats(index.origin)
    }

    /// Re-read the document and rebuild the index from scratch.
    ///
    /// Queries wait until the rebuild finishes. On failure the previous
    /// index stays active and the error is returned.
    pub async fn rebuild_index(&self) -> Result<IndexStats> {
        let mut index = self.index.write().await;
        let document = read_document(&self.config.document.path)?;
        let chunks = self.chunker.split_document(&document);

        tracing::info!(chunks = chunks.len(), "rebuilding vector index");
        let store = VectorStore::build(
            chunks,
            self.provider.as_ref(),
            &self.config.index.persist_dir,
            &document,
            self.config.embedding.batch_size,
        )
        .await?;

        *index = ActiveIndex {
            store,
            document,
            origin: IndexOrigin::Rebuilt,
        };
        Ok(index.store.stats(index.origin))
    }

    /// Source text of the active index.
    pub async fn document_text(&self) -> String {
        self.index.read().await.document.raw_content.clone()
    }
}

fn read_document(path: &Path) -> Result<Document> {
    let bytes = std::fs::read(path).map_err(|e| RagError::DocumentRead {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let text = String::from_utf8(bytes).map_err(|_| RagError::DocumentEncoding {
        path: path.to_path_buf(),
    })?;
    Ok(Document::new(path, text))
}

fn warn_if_stale(store: &VectorStore, document: &Document) {
    if store.meta().document_hash != document.content_hash() {
        tracing::warn!(
            document = %document.source_label(),
            "document changed since the index was built; run `rag-qa index rebuild` to refresh"
        );
    }
}

fn generation_error(err: anyhow::Error) -> RagError {
    match err.downcast::<RagError>() {
        Ok(rag) => rag,
        Err(other) => RagError::Generation(format!("{:#}", other)),
    }
}

/// Model output is used as plain text.
fn parse_answer(raw: &str) -> String {
    raw.trim().to_string()
}

fn error_result(err: RagError) -> QueryResult {
    tracing::error!(error = %err, "query failed");
    QueryResult::Error {
        error: format!("{}{}", QUERY_ERROR_PREFIX, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_answer_trims() {
        assert_eq!(parse_answer("\n  狗喜欢跑步。 \n"), "狗喜欢跑步。");
    }

    #[test]
    fn test_error_result_prefix() {
        let result = error_result(RagError::Generation("503".into()));
        assert_eq!(
            result.error(),
            Some("查询过程中出错: generation failed: 503")
        );
    }

    #[test]
    fn test_generation_error_keeps_typed_errors() {
        let err = anyhow::Error::from(RagError::MalformedResponse("no content".into()));
        assert!(matches!(
            generation_error(err),
            RagError::MalformedResponse(_)
        ));
        let err = anyhow::anyhow!("connection refused");
        assert!(matches!(generation_error(err), RagError::Generation(_)));
    }

    #[test]
    fn test_read_document_rejects_invalid_utf8() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bad.txt");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        let err = read_document(&path).unwrap_err();
        assert!(matches!(err, RagError::DocumentEncoding { .. }));
        assert!(err.is_fatal());

        let err = read_document(&tmp.path().join("missing.txt")).unwrap_err();
        assert!(matches!(err, RagError::DocumentRead { .. }));
    }
}
