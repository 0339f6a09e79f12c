//! TOML configuration with environment overrides.
//!
//! Every section is optional; a missing config file yields the defaults.
//! After the file is parsed, a small set of environment variables (loaded
//! from `.env` by the binary) override the endpoint and path settings.
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `BASE_URL` | `generation.base_url` (and `embedding.url` when unset) |
//! | `API_KEY` | `generation.api_key` |
//! | `RAG_EMBEDDING_MODEL` | `embedding.model` |
//! | `RAG_EMBEDDING_URL` | `embedding.url` |
//! | `RAG_DOCUMENT_PATH` | `document.path` |
//! | `RAG_PERSIST_DIR` | `index.persist_dir` |
//! | `RAG_BIND` | `server.bind` |

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chunk::{default_separators, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::history::DEFAULT_MAX_TURNS;
use crate::prompt::DEFAULT_SYSTEM_PROMPT;
use crate::retriever::DEFAULT_TOP_K;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub document: DocumentConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentConfig {
    #[serde(default = "default_document_path")]
    pub path: PathBuf,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            path: default_document_path(),
        }
    }
}

fn default_document_path() -> PathBuf {
    PathBuf::from("./document/knowledge.txt")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_persist_dir")]
    pub persist_dir: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            persist_dir: default_persist_dir(),
        }
    }
}

fn default_persist_dir() -> PathBuf {
    PathBuf::from("./index_data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_separators")]
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            separators: default_separators(),
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Return the contexts used for generation instead of retrieving again.
    #[serde(default)]
    pub reuse_contexts: bool,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            reuse_contexts: false,
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}
fn default_query_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_embedding_key_env(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_embedding_key_env() -> String {
    "API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub enable_thinking: bool,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            model: default_generation_model(),
            temperature: default_temperature(),
            max_tokens: None,
            enable_thinking: false,
            system_prompt: default_system_prompt(),
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_generation_model() -> String {
    "qwen3-0.6b".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}
fn default_generation_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
        }
    }
}

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

impl Config {
    /// Apply environment overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using `lookup` to resolve variables.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("BASE_URL") {
            // Embeddings are served from the same endpoint unless configured
            if self.embedding.url.is_none() && self.embedding.provider == "openai" {
                self.embedding.url = Some(v.clone());
            }
            self.generation.base_url = v;
        }
        if let Some(v) = get("API_KEY") {
            self.generation.api_key = Some(v);
        }
        if let Some(v) = get("RAG_EMBEDDING_MODEL") {
            self.embedding.model = Some(v);
        }
        if let Some(v) = get("RAG_EMBEDDING_URL") {
            self.embedding.url = Some(v);
        }
        if let Some(v) = get("RAG_DOCUMENT_PATH") {
            self.document.path = PathBuf::from(v);
        }
        if let Some(v) = get("RAG_PERSIST_DIR") {
            self.index.persist_dir = PathBuf::from(v);
        }
        if let Some(v) = get("RAG_BIND") {
            self.server.bind = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            anyhow::bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            anyhow::bail!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }
        if self.retrieval.top_k == 0 {
            anyhow::bail!("retrieval.top_k must be >= 1");
        }
        if self.history.max_turns < 2 || self.history.max_turns % 2 != 0 {
            anyhow::bail!("history.max_turns must be an even number >= 2");
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
        }
        if !self.generation.system_prompt.contains("{context}") {
            anyhow::bail!("generation.system_prompt must contain a {{context}} placeholder");
        }
        if self.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
        if self.embedding.dims == Some(0) {
            anyhow::bail!("embedding.dims must be > 0 when set");
        }

        match self.embedding.provider.as_str() {
            "openai" | "ollama" | "local" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be openai, ollama, or local.",
                other
            ),
        }

        Ok(())
    }
}

/// Read the config file (if present), apply environment overrides, and
/// validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = read_config_file(path)?;
    config.apply_env();
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    toml::from_str(&content).with_context(|| "Failed to parse config file")
}
