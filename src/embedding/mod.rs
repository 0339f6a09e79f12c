//! Text embedding backends and vector helpers.
//!
//! [`EmbeddingProvider`] is the seam used by the store and the retriever.
//! Backends:
//!
//! | `[embedding].provider` | Type | Endpoint |
//! |------------------------|------|----------|
//! | `"openai"` | [`OpenAIProvider`] | `POST {url}/embeddings` on any OpenAI-compatible server |
//! | `"ollama"` | [`OllamaProvider`] | `POST {url}/api/embed` |
//! | `"local"` | `LocalProvider` | in-process fastembed (feature `local-embeddings`) |
//!
//! HTTP backends retry 429, 5xx, and network errors with exponential
//! backoff; other 4xx responses fail immediately.
//!
//! Vectors are stored in SQLite as little-endian `f32` blobs
//! ([`vec_to_blob`] / [`blob_to_vec`]) and ranked with
//! [`cosine_similarity`].

#[cfg(feature = "local-embeddings")]
mod local;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::config::EmbeddingConfig;
use crate::http_client::{build_client, post_json_with_retry};

#[cfg(feature = "local-embeddings")]
pub use local::LocalProvider;

/// Maps text to fixed-dimension vectors.
///
/// Every vector returned by one provider has length [`dims`](EmbeddingProvider::dims).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier recorded in the index metadata.
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;

    /// One vector per input text, in input order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text, typically a question.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_texts(&[text.to_string()])
            .await?
            .pop()
            .context("embedding endpoint returned no vectors")
    }
}

// ============ OpenAI-compatible ============

/// Embeddings from an OpenAI-compatible `/embeddings` endpoint.
///
/// The base URL defaults to `https://api.openai.com/v1` but normally points
/// at the same server as generation (see `BASE_URL`). The API key is read
/// from the environment variable named by `embedding.api_key_env`
/// (default `API_KEY`); self-hosted endpoints may run without one.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    endpoint: String,
    api_key: Option<String>,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// # Errors
    ///
    /// Fails if `dims` is not configured and the model is not in the
    /// built-in dimension table.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| "bge-large-zh-v1.5".to_string());
        let Some(dims) = config.dims.or_else(|| known_openai_dims(&model)) else {
            bail!("embedding.dims must be set for model '{}'", model);
        };
        let base = config
            .url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
            .trim_end_matches('/');
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(
                env = %config.api_key_env,
                "embedding API key not set; sending unauthenticated requests"
            );
        }

        Ok(Self {
            endpoint: format!("{}/embeddings", base),
            model,
            dims,
            api_key,
            max_retries: config.max_retries,
            client: build_client(config.timeout_secs)?,
        })
    }
}

fn known_openai_dims(model: &str) -> Option<usize> {
    let dims = match model {
        "bge-large-zh-v1.5" | "bge-m3" => 1024,
        "bge-small-zh-v1.5" => 512,
        "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
        "text-embedding-3-large" => 3072,
        _ => return None,
    };
    Some(dims)
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = serde_json::json!({ "model": &self.model, "input": texts });
        let response = post_json_with_retry(
            &self.client,
            &self.endpoint,
            self.api_key.as_deref(),
            &request,
            self.max_retries,
            "Embedding",
        )
        .await?;
        parse_openai_response(response)
    }
}

#[derive(Deserialize)]
struct OpenAiEmbeddings {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Vectors from an OpenAI embeddings response, restored to input order via
/// each item's `index`. Items without an index keep their position.
pub(crate) fn parse_openai_response(response: serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let parsed: OpenAiEmbeddings =
        serde_json::from_value(response).context("unexpected embeddings response shape")?;

    let mut items: Vec<(usize, Vec<f32>)> = parsed
        .data
        .into_iter()
        .enumerate()
        .map(|(position, item)| (item.index.unwrap_or(position), item.embedding))
        .collect();
    items.sort_by_key(|(index, _)| *index);

    Ok(items.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Embeddings from an Ollama server (`http://localhost:11434` by default).
///
/// The model must already be pulled, e.g. `ollama pull bge-m3`.
pub struct OllamaProvider {
    model: String,
    dims: usize,
    endpoint: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| "bge-m3".to_string());
        let Some(dims) = config.dims.or_else(|| known_ollama_dims(&model)) else {
            bail!("embedding.dims must be set for Ollama model '{}'", model);
        };
        let base = config
            .url
            .as_deref()
            .unwrap_or("http://localhost:11434")
            .trim_end_matches('/');

        Ok(Self {
            endpoint: format!("{}/api/embed", base),
            model,
            dims,
            max_retries: config.max_retries,
            client: build_client(config.timeout_secs)?,
        })
    }
}

fn known_ollama_dims(model: &str) -> Option<usize> {
    let dims = match model {
        "bge-m3" | "bge-large" | "mxbai-embed-large" => 1024,
        "nomic-embed-text" => 768,
        "all-minilm" => 384,
        _ => return None,
    };
    Some(dims)
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = serde_json::json!({ "model": &self.model, "input": texts });
        let response = post_json_with_retry(
            &self.client,
            &self.endpoint,
            None,
            &request,
            self.max_retries,
            "Ollama",
        )
        .await?;
        parse_ollama_response(response)
    }
}

#[derive(Deserialize)]
struct OllamaEmbeddings {
    embeddings: Vec<Vec<f32>>,
}

pub(crate) fn parse_ollama_response(response: serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let parsed: OllamaEmbeddings =
        serde_json::from_value(response).context("unexpected Ollama embed response shape")?;
    Ok(parsed.embeddings)
}

/// Instantiate the backend named by `config.provider`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider.as_str() {
        "openai" => Arc::new(OpenAIProvider::new(config)?),
        "ollama" => Arc::new(OllamaProvider::new(config)?),
        #[cfg(feature = "local-embeddings")]
        "local" => Arc::new(LocalProvider::new(config)?),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("the local embedding provider needs `--features local-embeddings`"),
        other => bail!("unknown embedding provider '{}'", other),
    };
    tracing::info!(
        provider = %config.provider,
        model = provider.model_name(),
        dims = provider.dims(),
        "embedding provider ready"
    );
    Ok(provider)
}

// ============ Vector helpers ============

/// Serialize a vector as consecutive little-endian `f32`s (4 bytes each).
///
/// ```rust
/// use rag_qa::embedding::{blob_to_vec, vec_to_blob};
///
/// let blob = vec_to_blob(&[0.5, -1.0]);
/// assert_eq!(blob.len(), 8);
/// assert_eq!(blob_to_vec(&blob), vec![0.5, -1.0]);
/// ```
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`]. Trailing bytes that do not form a whole
/// `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|bytes| {
            let mut word = [0u8; 4];
            word.copy_from_slice(bytes);
            f32::from_le_bytes(word)
        })
        .collect()
}

/// Cosine of the angle between `a` and `b`, in `[-1, 1]`.
///
/// Mismatched lengths, empty input, and zero vectors all score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, sq_a, sq_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, sq_a, sq_b), (x, y)| {
            (dot + x * y, sq_a + x * x, sq_b + y * y)
        });

    let norm = (sq_a * sq_b).sqrt();
    if norm <= f32::EPSILON {
        0.0
    } else {
        dot / norm
    }
}
