//! # askbot
//!
//! A guarded retrieval-augmented question answering service over a
//! pre-embedded document corpus.
//!
//! The retrieval engine itself (scoring, embedding gateway, top-k
//! retrieval, context assembly, safety gate) lives in [`askbot_core`].
//! This crate supplies the SQLite store, HTTP providers, the answer
//! pipeline, and the CLI and HTTP surfaces.
//!
//! ## Architecture
//!
//! ```text
//!  HTTP / CLI ──▶ ChatService ──▶ SafetyGate ──▶ Retriever ──▶ DocumentStore
//!                     │                              │            (SQLite)
//!                     │                              ▼
//!                     │                       EmbeddingGateway ──▶ provider
//!                     ▼
//!               AnswerSynthesizer ──▶ chat completion API
//!                     │
//!                     ▼
//!               audit log + analytics
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite [`DocumentStore`](askbot_core::store::DocumentStore) |
//! | [`endpoint`] | OpenAI / Azure endpoint addressing |
//! | [`embedding`] | HTTP embedding provider |
//! | [`synthesizer`] | Chat completion answer synthesis |
//! | [`chat`] | The guarded answer pipeline |
//! | [`audit`] | Background chat history persistence |
//! | [`analytics`] | In-memory usage counters |
//! | [`engine`] | Component wiring |
//! | [`server`] | HTTP API |
//! | [`ask`], [`status`] | CLI commands |

pub mod analytics;
pub mod ask;
pub mod audit;
pub mod chat;
pub mod config;
pub mod db;
pub mod embedding;
pub mod endpoint;
pub mod engine;
pub mod logging;
pub mod migrate;
pub mod server;
pub mod sqlite_store;
pub mod status;
pub mod synthesizer;

pub use askbot_core;
