//! Embedding provider implementations.
//!
//! - **[`DisabledProvider`]**: fails every call; used when embeddings are not configured.
//! - **[`HttpEmbeddingProvider`]**: calls an OpenAI or Azure OpenAI
//!   embeddings endpoint, one text per request.
//!
//! Providers never retry. A transport error, timeout, non-2xx status or
//! malformed body is reported once as [`GatewayError::Provider`]; retry
//! policy belongs to the caller.
//!
//! Use [`create_provider`] to build the configured provider.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use askbot_core::embedding::EmbeddingProvider;
use askbot_core::error::GatewayError;

use crate::config::EmbeddingConfig;
use crate::endpoint::{http_client, ApiEndpoint};

/// A no-op embedding provider that always returns errors.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, GatewayError> {
        Err(GatewayError::Provider(
            "embedding provider is disabled".to_string(),
        ))
    }
}

/// Embedding provider over an OpenAI-compatible HTTP API.
///
/// API keys come from `OPENAI_API_KEY` (openai) or
/// `AZURE_OPENAI_EMBEDDINGS_API_KEY` (azure).
pub struct HttpEmbeddingProvider {
    endpoint: ApiEndpoint,
    model: String,
    /// Expected vector length, if configured.
    dims: Option<usize>,
    client: reqwest::Client,
}

impl HttpEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for {} provider", config.provider))?;
        let key_var = match config.provider.as_str() {
            "azure" => "AZURE_OPENAI_EMBEDDINGS_API_KEY",
            _ => "OPENAI_API_KEY",
        };
        let endpoint = ApiEndpoint::from_parts(
            &config.provider,
            config.url.as_deref(),
            &config.api_version,
            key_var,
        )?;

        Ok(Self {
            endpoint,
            model,
            dims: config.dims,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let request = self
            .client
            .post(self.endpoint.url(&self.model, "embeddings"))
            .header("Content-Type", "application/json")
            .json(&body);

        let response = self
            .endpoint
            .authorize(request)
            .send()
            .await
            .map_err(|e| GatewayError::Provider(format!("embedding request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Provider(format!(
                "embedding API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Provider(format!("invalid embedding response: {}", e)))?;
        let vector = parse_embedding_response(&json)?;

        if let Some(dims) = self.dims {
            if vector.len() != dims {
                return Err(GatewayError::Provider(format!(
                    "embedding has {} dimensions, expected {}",
                    vector.len(),
                    dims
                )));
            }
        }
        Ok(vector)
    }
}

/// Extract `data[0].embedding` from an embeddings API response.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f32>, GatewayError> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            GatewayError::Provider("invalid embedding response: missing data[0].embedding".to_string())
        })?;

    embedding
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                GatewayError::Provider("invalid embedding response: non-numeric value".to_string())
            })
        })
        .collect()
}

/// Build the provider named by `config.provider`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" | "azure" => Ok(Arc::new(HttpEmbeddingProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
