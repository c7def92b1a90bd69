//! OpenAI-compatible HTTP endpoints shared by the embedding provider and
//! the answer synthesizer.
//!
//! Two flavours are supported:
//!
//! - **OpenAI**: `POST {base}/{operation}` with `Authorization: Bearer`.
//!   The model goes in the request body.
//! - **Azure OpenAI**: `POST {base}/openai/deployments/{model}/{operation}?api-version=…`
//!   with an `api-key` header. The model names the deployment.

use anyhow::{bail, Result};
use std::time::Duration;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Where and how to authenticate an OpenAI-style request.
#[derive(Debug, Clone)]
pub enum ApiEndpoint {
    OpenAi {
        base_url: String,
        api_key: String,
    },
    Azure {
        base_url: String,
        api_key: String,
        api_version: String,
    },
}

impl ApiEndpoint {
    /// Resolve an endpoint from config fields, reading the key from `key_var`.
    pub fn from_parts(
        provider: &str,
        url: Option<&str>,
        api_version: &str,
        key_var: &str,
    ) -> Result<Self> {
        let api_key = match std::env::var(key_var) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("{} environment variable not set", key_var),
        };
        match provider {
            "openai" => Ok(ApiEndpoint::OpenAi {
                base_url: url.unwrap_or(OPENAI_BASE_URL).trim_end_matches('/').to_string(),
                api_key,
            }),
            "azure" => {
                let Some(url) = url else {
                    bail!("an endpoint url is required for the azure provider");
                };
                Ok(ApiEndpoint::Azure {
                    base_url: url.trim_end_matches('/').to_string(),
                    api_key,
                    api_version: api_version.to_string(),
                })
            }
            other => bail!("Unknown provider: {}", other),
        }
    }

    /// Full request URL for `operation` (e.g. `embeddings`, `chat/completions`).
    pub fn url(&self, model: &str, operation: &str) -> String {
        match self {
            ApiEndpoint::OpenAi { base_url, .. } => format!("{}/{}", base_url, operation),
            ApiEndpoint::Azure {
                base_url,
                api_version,
                ..
            } => format!(
                "{}/openai/deployments/{}/{}?api-version={}",
                base_url, model, operation, api_version
            ),
        }
    }

    /// Attach the auth header for this flavour.
    pub fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            ApiEndpoint::OpenAi { api_key, .. } => {
                request.header("Authorization", format!("Bearer {}", api_key))
            }
            ApiEndpoint::Azure { api_key, .. } => request.header("api-key", api_key),
        }
    }
}

/// HTTP client with a whole-request timeout.
pub fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}
