use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use askbot_core::retrieval::{RetrievalParams, VectorIndexMode, MAX_K};
use askbot_core::safety::RateLimits;
use askbot_core::store::candidates::CandidateOptions;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub synthesizer: SynthesizerConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL. OpenAI defaults to the public API; Azure requires it.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_embedding_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_version: default_api_version(),
            timeout_secs: default_timeout_secs(),
            cache_capacity: default_embedding_cache_capacity(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_version() -> String {
    "2024-02-01".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_embedding_cache_capacity() -> usize {
    1000
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: i64,
    #[serde(default = "default_max_k")]
    pub max_k: i64,
    #[serde(default = "default_scan_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_docs")]
    pub max_docs: usize,
    #[serde(default = "default_query_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// `auto`, `on` or `off`.
    #[serde(default = "default_vector_index")]
    pub vector_index: String,
    #[serde(default = "default_true")]
    pub topic_prefetch: bool,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            max_k: default_max_k(),
            batch_size: default_scan_batch_size(),
            max_docs: default_max_docs(),
            cache_capacity: default_query_cache_capacity(),
            cache_ttl_secs: default_cache_ttl_secs(),
            vector_index: default_vector_index(),
            topic_prefetch: true,
            snippet_chars: default_snippet_chars(),
        }
    }
}

fn default_k() -> i64 {
    5
}
fn default_max_k() -> i64 {
    MAX_K
}
fn default_scan_batch_size() -> usize {
    150
}
fn default_max_docs() -> usize {
    1500
}
fn default_query_cache_capacity() -> usize {
    20
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_vector_index() -> String {
    "auto".to_string()
}
fn default_true() -> bool {
    true
}
fn default_snippet_chars() -> usize {
    200
}

impl RetrievalConfig {
    pub fn vector_index_mode(&self) -> Result<VectorIndexMode> {
        match self.vector_index.as_str() {
            "auto" => Ok(VectorIndexMode::Auto),
            "on" => Ok(VectorIndexMode::On),
            "off" => Ok(VectorIndexMode::Off),
            other => anyhow::bail!(
                "Unknown retrieval.vector_index: '{}'. Must be auto, on, or off.",
                other
            ),
        }
    }

    pub fn params(&self) -> Result<RetrievalParams> {
        Ok(RetrievalParams {
            candidates: CandidateOptions {
                max_docs: self.max_docs,
                batch_size: self.batch_size,
                topic_prefetch: self.topic_prefetch,
            },
            vector_index: self.vector_index_mode()?,
            cache_capacity: self.cache_capacity,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SafetyConfig {
    #[serde(default = "default_anonymous_per_minute")]
    pub anonymous_per_minute: usize,
    #[serde(default = "default_user_per_minute")]
    pub user_per_minute: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            anonymous_per_minute: default_anonymous_per_minute(),
            user_per_minute: default_user_per_minute(),
        }
    }
}

fn default_anonymous_per_minute() -> usize {
    10
}
fn default_user_per_minute() -> usize {
    20
}

impl SafetyConfig {
    pub fn limits(&self) -> RateLimits {
        RateLimits {
            anonymous_per_minute: self.anonymous_per_minute,
            user_per_minute: self.user_per_minute,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SynthesizerConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            api_version: default_api_version(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    800
}

impl SynthesizerConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Treat `x-user-id` as an authenticated user. Only enable behind an
    /// auth proxy that sets the header and strips it from client requests.
    #[serde(default)]
    pub trust_user_header: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_timeout_secs(),
            trust_user_header: false,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a TOML config string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate retrieval
    let r = &config.retrieval;
    if r.max_k < 1 || r.max_k > MAX_K {
        anyhow::bail!("retrieval.max_k must be in [1, {}]", MAX_K);
    }
    if r.default_k < 1 || r.default_k > r.max_k {
        anyhow::bail!("retrieval.default_k must be in [1, retrieval.max_k]");
    }
    if r.batch_size == 0 {
        anyhow::bail!("retrieval.batch_size must be > 0");
    }
    if r.max_docs < r.batch_size {
        anyhow::bail!("retrieval.max_docs must be >= retrieval.batch_size");
    }
    r.vector_index_mode()?;

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "azure" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or azure.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.provider == "azure" && config.embedding.url.is_none() {
        anyhow::bail!("embedding.url is required for the azure provider");
    }
    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0 when set");
    }

    // Validate synthesizer
    match config.synthesizer.provider.as_str() {
        "disabled" | "openai" | "azure" => {}
        other => anyhow::bail!(
            "Unknown synthesizer provider: '{}'. Must be disabled, openai, or azure.",
            other
        ),
    }
    if config.synthesizer.is_enabled() && config.synthesizer.model.is_none() {
        anyhow::bail!(
            "synthesizer.model must be specified when provider is '{}'",
            config.synthesizer.provider
        );
    }
    if config.synthesizer.provider == "azure" && config.synthesizer.url.is_none() {
        anyhow::bail!("synthesizer.url is required for the azure provider");
    }

    Ok(config)
}
