//! In-process embeddings via fastembed.
//!
//! Models are downloaded from Hugging Face on first use and cached; after
//! that, embedding runs offline. The ONNX session is created once and
//! shared behind a mutex, with inference moved off the async runtime.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;

/// Model names accepted by `provider = "local"`, with their fastembed
/// variant and output dimension.
const LOCAL_MODELS: &[(&str, EmbeddingModel, usize)] = &[
    ("bge-small-zh-v1.5", EmbeddingModel::BGESmallZHV15, 512),
    ("bge-large-zh-v1.5", EmbeddingModel::BGELargeZHV15, 1024),
    ("bge-small-en-v1.5", EmbeddingModel::BGESmallENV15, 384),
    ("bge-large-en-v1.5", EmbeddingModel::BGELargeENV15, 1024),
    ("multilingual-e5-small", EmbeddingModel::MultilingualE5Small, 384),
    ("multilingual-e5-large", EmbeddingModel::MultilingualE5Large, 1024),
];

pub struct LocalProvider {
    name: String,
    dims: usize,
    batch_size: usize,
    session: Arc<Mutex<TextEmbedding>>,
}

impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let name = config
            .model
            .clone()
            .unwrap_or_else(|| "bge-small-zh-v1.5".to_string());
        let Some((_, variant, native_dims)) = LOCAL_MODELS.iter().find(|(n, _, _)| *n == name)
        else {
            let supported: Vec<&str> = LOCAL_MODELS.iter().map(|(n, _, _)| *n).collect();
            bail!(
                "local embedding model '{}' is not supported (choose one of: {})",
                name,
                supported.join(", ")
            );
        };

        tracing::info!(model = %name, "loading local embedding model");
        let session =
            TextEmbedding::try_new(InitOptions::new(variant.clone()).with_show_download_progress(true))
                .map_err(|e| anyhow!("could not load local model '{}': {}", name, e))?;

        Ok(Self {
            dims: config.dims.unwrap_or(*native_dims),
            batch_size: config.batch_size,
            session: Arc::new(Mutex::new(session)),
            name,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let session = Arc::clone(&self.session);
        let batch_size = self.batch_size;
        let owned = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut session = session.lock().unwrap_or_else(|e| e.into_inner());
            session
                .embed(owned, Some(batch_size))
                .map_err(|e| anyhow!("local embedding failed: {}", e))
        })
        .await?
    }
}
