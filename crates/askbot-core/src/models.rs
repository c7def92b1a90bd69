//! Core data models for the retrieval pipeline.
//!
//! [`DocumentChunk`]s are written once by the ingestion job and are
//! read-only here. [`ScoredChunk`], [`SourceRef`] and [`RetrievalResult`]
//! are transient per-query values.

use serde::{Deserialize, Serialize};

/// An immutable unit of retrievable text with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Corpus-unique identifier (chunk-qualified when a source was split).
    pub id: String,
    /// Originating document, used for citation.
    pub source: String,
    pub text: String,
    /// Precomputed embedding. Every chunk in a corpus shares one dimensionality.
    pub embedding: Vec<f32>,
    pub chunk_index: i64,
    pub total_chunks: i64,
}

/// A [`DocumentChunk`] with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    /// Cosine similarity, finite and within `[-1.0, 1.0]`.
    pub score: f64,
}

/// A citation returned to the user alongside the answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub title: String,
    pub snippet: String,
    pub url: Option<String>,
    pub score: Option<f64>,
}

impl SourceRef {
    /// Shape a citation from a scored chunk.
    ///
    /// The snippet is the first `snippet_chars` characters of the chunk
    /// text, followed by `...` when the text was longer.
    pub fn from_scored(scored: &ScoredChunk, snippet_chars: usize) -> Self {
        let text = &scored.chunk.text;
        let snippet = if text.chars().count() > snippet_chars {
            let mut s: String = text.chars().take(snippet_chars).collect();
            s.push_str("...");
            s
        } else {
            text.clone()
        };
        Self {
            title: scored.chunk.source.clone(),
            snippet,
            url: None,
            score: Some(scored.score),
        }
    }
}

/// Outcome class of one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStatus {
    Success,
    NoResults,
    Error,
}

/// Answer plus citations for one query.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub status: RetrievalStatus,
}
