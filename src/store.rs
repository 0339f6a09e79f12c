//! In-memory vector index persisted to SQLite.
//!
//! All entries live in memory for brute-force cosine search. The persist
//! directory holds a single `index.sqlite` with an `index_meta` key/value
//! table and an `entries` table (see [`crate::migrate`]). Loading validates
//! the metadata against the stored rows and against the active embedding
//! provider; any inconsistency is reported as an error so the caller can
//! rebuild.

use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::path::Path;

use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::migrate::{run_migrations, SCHEMA_VERSION};
use crate::models::{Chunk, Document, IndexOrigin, IndexStats, VectorStoreEntry};

const META_SCHEMA_VERSION: &str = "schema_version";
const META_MODEL: &str = "model";
const META_DIMS: &str = "dims";
const META_DOCUMENT_PATH: &str = "document_path";
const META_DOCUMENT_HASH: &str = "document_hash";
const META_ENTRY_COUNT: &str = "entry_count";
const META_CREATED_AT: &str = "created_at";

/// Index-level metadata recorded alongside the entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMeta {
    pub model: String,
    pub dims: usize,
    pub document_path: String,
    pub document_hash: String,
    pub created_at: String,
}

#[derive(Debug)]
pub struct VectorStore {
    entries: Vec<VectorStoreEntry>,
    meta: IndexMeta,
}

impl VectorStore {
    /// True when `dir` exists and contains at least one entry.
    pub fn is_persisted(dir: &Path) -> bool {
        std::fs::read_dir(dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    /// Load a persisted index, checking it against `expected_dims`.
    ///
    /// Returns [`RagError::IndexNotFound`] when nothing is persisted.
    pub async fn load(dir: &Path, expected_dims: usize) -> Result<Self> {
        if !Self::is_persisted(dir) {
            return Err(RagError::IndexNotFound {
                path: dir.to_path_buf(),
            });
        }

        let pool = db::connect(dir, false).await?;
        let result = read_index(&pool, expected_dims).await;
        pool.close().await;
        let store = result?;

        tracing::info!(
            dir = %dir.display(),
            entries = store.entries.len(),
            dims = store.meta.dims,
            model = %store.meta.model,
            "loaded vector index"
        );
        Ok(store)
    }

    /// Embed `chunks` in batches and persist them to a fresh index in `dir`.
    ///
    /// Any previous `index.sqlite` in `dir` is replaced.
    pub async fn build(
        chunks: Vec<Chunk>,
        provider: &dyn EmbeddingProvider,
        dir: &Path,
        document: &Document,
        batch_size: usize,
    ) -> Result<Self> {
        let dims = provider.dims();
        let total = chunks.len();
        let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(total);

        for batch in chunks.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = provider
                .embed_texts(&texts)
                .await
                .map_err(|e| RagError::Embedding(format!("{:#}", e)))?;

            if vectors.len() != batch.len() {
                return Err(RagError::Embedding(format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            for vec in &vectors {
                if vec.len() != dims {
                    return Err(RagError::DimensionMismatch {
                        expected: dims,
                        actual: vec.len(),
                    });
                }
            }
            embeddings.extend(vectors);
            tracing::debug!(embedded = embeddings.len(), total, "embedded batch");
        }

        let entries: Vec<VectorStoreEntry> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| VectorStoreEntry { chunk, embedding })
            .collect();

        let store = Self {
            entries,
            meta: IndexMeta {
                model: provider.model_name().to_string(),
                dims,
                document_path: document.source_label(),
                document_hash: document.content_hash(),
                created_at: chrono::Utc::now().to_rfc3339(),
            },
        };

        db::remove_index_files(dir)?;
        let pool = db::connect(dir, true).await?;
        let result = store.write_index(&pool).await;
        pool.close().await;
        result?;

        tracing::info!(
            dir = %dir.display(),
            entries = store.entries.len(),
            dims,
            "persisted vector index"
        );
        Ok(store)
    }

    /// The `k` entries most similar to `query`, best first.
    ///
    /// Ties keep the original chunk order. Returns clones of the chunks.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Chunk>> {
        if query.len() != self.meta.dims {
            return Err(RagError::DimensionMismatch {
                expected: self.meta.dims,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let score = cosine_similarity(query, &e.embedding);
                // NaN (corrupt vectors) ranks last
                (i, if score.is_nan() { f32::NEG_INFINITY } else { score })
            })
            .collect();

        // sort_by is stable, so equal scores stay in position order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        if let Some((_, best)) = scored.first() {
            tracing::debug!(hits = scored.len(), best_score = *best, "vector search");
        }

        Ok(scored
            .into_iter()
            .map(|(i, _)| self.entries[i].chunk.clone())
            .collect())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.meta.dims
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn stats(&self, origin: IndexOrigin) -> IndexStats {
        IndexStats {
            origin,
            entries: self.entries.len(),
            dims: self.meta.dims,
            model: self.meta.model.clone(),
            document_path: self.meta.document_path.clone(),
            document_hash: self.meta.document_hash.clone(),
            created_at: self.meta.created_at.clone(),
        }
    }

    async fn write_index(&self, pool: &SqlitePool) -> Result<()> {
        run_migrations(pool).await?;

        let mut tx = pool.begin().await?;

        for (position, entry) in self.entries.iter().enumerate() {
            let metadata_json = serde_json::to_string(&entry.chunk.metadata)?;
            sqlx::query(
                r#"
                INSERT INTO entries (position, id, content, metadata_json, source_offset, chunk_index, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(position as i64)
            .bind(&entry.chunk.id)
            .bind(&entry.chunk.content)
            .bind(&metadata_json)
            .bind(entry.chunk.source_offset as i64)
            .bind(entry.chunk.chunk_index)
            .bind(vec_to_blob(&entry.embedding))
            .execute(&mut *tx)
            .await?;
        }

        let meta = [
            (META_SCHEMA_VERSION, SCHEMA_VERSION.to_string()),
            (META_MODEL, self.meta.model.clone()),
            (META_DIMS, self.meta.dims.to_string()),
            (META_DOCUMENT_PATH, self.meta.document_path.clone()),
            (META_DOCUMENT_HASH, self.meta.document_hash.clone()),
            (META_ENTRY_COUNT, self.entries.len().to_string()),
            (META_CREATED_AT, self.meta.created_at.clone()),
        ];
        for (key, value) in meta {
            sqlx::query("INSERT INTO index_meta (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

async fn read_index(pool: &SqlitePool, expected_dims: usize) -> Result<VectorStore> {
    let rows = sqlx::query("SELECT key, value FROM index_meta")
        .fetch_all(pool)
        .await?;
    let meta_map: BTreeMap<String, String> = rows
        .into_iter()
        .map(|row| (row.get::<String, _>("key"), row.get::<String, _>("value")))
        .collect();

    let get = |key: &str| {
        meta_map
            .get(key)
            .cloned()
            .ok_or_else(|| RagError::Store(format!("index metadata is missing '{}'", key)))
    };
    let parse = |key: &str| -> Result<usize> {
        get(key)?
            .parse::<usize>()
            .map_err(|e| RagError::Store(format!("invalid '{}' in index metadata: {}", key, e)))
    };

    let version = get(META_SCHEMA_VERSION)?;
    if version != SCHEMA_VERSION {
        return Err(RagError::Store(format!(
            "unsupported index schema version {}",
            version
        )));
    }

    let dims = parse(META_DIMS)?;
    if dims != expected_dims {
        return Err(RagError::DimensionMismatch {
            expected: expected_dims,
            actual: dims,
        });
    }
    let entry_count = parse(META_ENTRY_COUNT)?;

    let meta = IndexMeta {
        model: get(META_MODEL)?,
        dims,
        document_path: get(META_DOCUMENT_PATH)?,
        document_hash: get(META_DOCUMENT_HASH)?,
        created_at: get(META_CREATED_AT)?,
    };

    let rows = sqlx::query(
        r#"
        SELECT id, content, metadata_json, source_offset, chunk_index, embedding
        FROM entries
        ORDER BY position
        "#,
    )
    .fetch_all(pool)
    .await?;

    if rows.len() != entry_count {
        return Err(RagError::Store(format!(
            "index metadata records {} entries but {} are stored",
            entry_count,
            rows.len()
        )));
    }

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let blob: Vec<u8> = row.get("embedding");
        let embedding = blob_to_vec(&blob);
        if embedding.len() != dims || blob.len() % 4 != 0 {
            return Err(RagError::DimensionMismatch {
                expected: dims,
                actual: blob.len() / 4,
            });
        }

        let metadata_json: String = row.get("metadata_json");
        let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_json)?;
        let source_offset: i64 = row.get("source_offset");

        entries.push(VectorStoreEntry {
            chunk: Chunk {
                id: row.get("id"),
                chunk_index: row.get("chunk_index"),
                content: row.get("content"),
                metadata,
                source_offset: usize::try_from(source_offset).map_err(RagError::store)?,
            },
            embedding,
        });
    }

    Ok(VectorStore { entries, meta })
}
