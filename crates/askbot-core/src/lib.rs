//! # askbot core
//!
//! Runtime-agnostic retrieval logic for askbot: chunk models, cosine
//! scoring, the memoizing embedding gateway, the document store trait,
//! top-k retrieval, context assembly, and the query safety gate.
//!
//! This crate contains no tokio, sqlx, HTTP client, or filesystem
//! dependencies. Network-facing implementations of [`store::DocumentStore`]
//! and [`embedding::EmbeddingProvider`] live in the `askbot` app crate.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Chunk, scored chunk, source and result types |
//! | [`embedding`] | Provider trait and vector utilities |
//! | [`gateway`] | Memoizing embedding gateway |
//! | [`store`] | Document store trait, in-memory store, candidate fetching |
//! | [`retrieval`] | Top-k retriever and query cache |
//! | [`context`] | Prompt context assembly |
//! | [`safety`] | Rate limiting, content screening, redaction |
//! | [`error`] | Error taxonomy |

pub mod context;
pub mod embedding;
pub mod error;
pub mod gateway;
pub mod models;
pub mod retrieval;
pub mod safety;
pub mod store;
