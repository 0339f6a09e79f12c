//! # RAG QA
//!
//! Retrieval-augmented question answering over a single knowledge document.
//!
//! The document is split into overlapping chunks, embedded, and persisted as
//! a vector index. Each question is embedded, the nearest chunks are
//! substituted into a grounding prompt, and a chat model answers from that
//! context only. A bounded conversation history is kept per process.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Document │──▶│ Chunk+Embed │──▶│ VectorStore  │
//! │  (.txt)  │   │             │   │ index.sqlite │
//! └──────────┘   └─────────────┘   └──────┬───────┘
//!                                         │ top-K
//!                ┌──────────┐   ┌─────────▼──────┐   ┌────────────┐
//!   question ───▶│ Retriever│──▶│ PromptAssembler│──▶│ Generation │──▶ answer
//!                └──────────┘   └────────────────┘   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rag-qa index status                 # load or build the index
//! rag-qa ask "狗喜欢做什么？" --context
//! rag-qa serve                        # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`chunk`] | Recursive separator chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Persisted vector index and cosine search |
//! | [`retriever`] | Top-K retrieval |
//! | [`prompt`] | Grounding prompt assembly |
//! | [`generation`] | Chat completion client |
//! | [`history`] | Bounded conversation history |
//! | [`pipeline`] | Startup and query orchestration |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`logging`] | Tracing subscriber setup |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod history;
mod http_client;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod retriever;
pub mod server;
pub mod store;
