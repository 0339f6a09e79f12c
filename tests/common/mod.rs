//! Deterministic test doubles and helpers shared by the integration tests.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use rag_qa::config::Config;
use rag_qa::embedding::EmbeddingProvider;
use rag_qa::generation::{GenerationClient, SamplingConfig};
use rag_qa::pipeline::RagPipeline;
use rag_qa::prompt::Prompt;

pub const CHAR_DIMS: usize = 4096;

/// Bag-of-characters embedding: each char increments bucket
/// `codepoint % dims`. Texts sharing more characters score higher.
pub struct CharEmbedder {
    dims: usize,
    pub batches: AtomicUsize,
    pub texts: AtomicUsize,
    pub fail: AtomicBool,
    /// Milliseconds to sleep before each batch.
    pub delay_ms: AtomicU64,
}

impl CharEmbedder {
    pub fn new() -> Arc<Self> {
        Self::with_dims(CHAR_DIMS)
    }

    pub fn with_dims(dims: usize) -> Arc<Self> {
        Arc::new(Self {
            dims,
            batches: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        let embedder = Self::new();
        embedder.fail.store(true, Ordering::SeqCst);
        embedder
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for c in text.chars().filter(|c| !c.is_whitespace()) {
            v[c as usize % self.dims] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for CharEmbedder {
    fn model_name(&self) -> &str {
        "char-bag"
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("Embedding API error 503 Service Unavailable: overloaded");
        }
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

type Reply = dyn Fn(&Prompt) -> Result<String> + Send + Sync;

/// Generation double driven by a closure over the rendered prompt.
pub struct ScriptedGenerator {
    reply: Box<Reply>,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new<F>(reply: F) -> Arc<Self>
    where
        F: Fn(&Prompt) -> Result<String> + Send + Sync + 'static,
    {
        Arc::new(Self {
            reply: Box::new(reply),
            delay: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: Box::new(|_| Ok("late".to_string())),
            delay: Some(delay),
            calls: AtomicUsize::new(0),
        })
    }

    /// Answers with the first retrieved passage, padded with whitespace, or
    /// with the insufficient-context phrase when nothing was retrieved.
    pub fn first_passage() -> Arc<Self> {
        Self::new(|prompt| {
            let context = prompt.system.rsplit(": \n").next().unwrap_or_default();
            let first = context.split("\n\n").next().unwrap_or_default();
            if first.trim().is_empty() {
                Ok("上下文信息不充分，无法回答".to_string())
            } else {
                Ok(format!("  {}\n", first))
            }
        })
    }

    pub fn failing() -> Arc<Self> {
        Self::new(|_| anyhow::bail!("Generation API error 500 Internal Server Error: boom"))
    }

    /// Fails the first call, then echoes the question.
    pub fn fail_once() -> Arc<Self> {
        let failed = AtomicBool::new(false);
        Self::new(move |prompt| {
            if !failed.swap(true, Ordering::SeqCst) {
                anyhow::bail!("Generation API error 503 Service Unavailable: warming up");
            }
            Ok(format!("re: {}", prompt.user))
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationClient for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &Prompt, _sampling: &SamplingConfig) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.reply)(prompt)
    }
}

// ─── Config helpers ─────────────────────────────────────────────────

pub const CAT_DOG: &str = "猫喜欢睡觉。狗喜欢跑步。";

pub fn write_document(tmp: &TempDir, text: &str) -> PathBuf {
    let path = tmp.path().join("knowledge.txt");
    std::fs::write(&path, text).unwrap();
    path
}

pub fn persist_dir(tmp: &TempDir) -> PathBuf {
    tmp.path().join("index_data")
}

/// Small chunks so short test documents split into several passages.
pub fn test_config(tmp: &TempDir, document: &Path) -> Config {
    let config_content = format!(
        r#"
[document]
path = "{}"

[index]
persist_dir = "{}"

[chunking]
chunk_size = 10
chunk_overlap = 2

[embedding]
batch_size = 4

[retrieval]
query_timeout_secs = 10

[server]
bind = "127.0.0.1:0"
"#,
        document.display(),
        persist_dir(tmp).display()
    );
    let config: Config = toml::from_str(&config_content).unwrap();
    config.validate().unwrap();
    config
}

pub async fn open_pipeline(
    config: Config,
    embedder: Arc<CharEmbedder>,
    generator: Arc<ScriptedGenerator>,
) -> RagPipeline {
    RagPipeline::open(config, embedder, generator)
        .await
        .expect("pipeline should open")
}

// ─── Server helpers ─────────────────────────────────────────────────

pub fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/api/health", port);
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}
