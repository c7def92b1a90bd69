//! Error taxonomy shared by the retrieval engine and its callers.
//!
//! | Error | Meaning | HTTP |
//! |-------|---------|------|
//! | [`RetrievalError::InvalidArgument`] | bad `k`, empty query | 400 |
//! | [`RetrievalError::RateLimited`] | sliding window exceeded | 429 |
//! | [`RetrievalError::UnsafeContent`] | PII or illegal request | 400 |
//! | [`RetrievalError::Provider`] | embedding provider down | 503 |
//! | [`RetrievalError::StoreUnavailable`] | document store down | 503 |
//!
//! "No results" is not an error: it is a
//! [`RetrievalStatus`](crate::models::RetrievalStatus).

use thiserror::Error;

/// Failure of the embedding gateway or its provider.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("embedding input must not be empty")]
    EmptyInput,
    #[error("embedding provider error: {0}")]
    Provider(String),
}

/// Failure reported by a [`DocumentStore`](crate::store::DocumentStore).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// The store could not be reached or a query failed outright.
    #[error("document store unavailable: {0}")]
    Unavailable(String),
    /// The store has no native vector search.
    #[error("vector search is not supported by this store")]
    Unsupported,
    /// A single record could not be decoded. Callers skip it.
    #[error("malformed document {id}: {reason}")]
    Malformed { id: String, reason: String },
}

/// Errors surfaced to the caller of the query pipeline.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RetrievalError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    RateLimited(String),
    #[error("{0}")]
    UnsafeContent(String),
    #[error("embedding provider unavailable: {0}")]
    Provider(String),
    #[error("document store unavailable: {0}")]
    StoreUnavailable(String),
}

impl RetrievalError {
    /// HTTP status code equivalent for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            RetrievalError::InvalidArgument(_) | RetrievalError::UnsafeContent(_) => 400,
            RetrievalError::RateLimited(_) => 429,
            RetrievalError::Provider(_) | RetrievalError::StoreUnavailable(_) => 503,
        }
    }

    /// Machine-readable error code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RetrievalError::InvalidArgument(_) => "bad_request",
            RetrievalError::RateLimited(_) => "rate_limited",
            RetrievalError::UnsafeContent(_) => "unsafe_content",
            RetrievalError::Provider(_) | RetrievalError::StoreUnavailable(_) => {
                "service_unavailable"
            }
        }
    }

    /// True for upstream infrastructure failures the client may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RetrievalError::Provider(_) | RetrievalError::StoreUnavailable(_)
        )
    }
}

impl From<GatewayError> for RetrievalError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::EmptyInput => RetrievalError::InvalidArgument(err.to_string()),
            GatewayError::Provider(msg) => RetrievalError::Provider(msg),
        }
    }
}

impl From<StoreError> for RetrievalError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => RetrievalError::StoreUnavailable(msg),
            other => RetrievalError::StoreUnavailable(other.to_string()),
        }
    }
}
