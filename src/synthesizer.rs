//! Answer synthesis over retrieved context.
//!
//! [`AnswerSynthesizer`] is the seam to the language model. The HTTP
//! implementation speaks the OpenAI / Azure OpenAI chat-completions API;
//! [`DisabledSynthesizer`] fails every call, which the chat pipeline turns
//! into its canned apology answer.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::SynthesizerConfig;
use crate::endpoint::{http_client, ApiEndpoint};

pub const SYSTEM_PROMPT: &str = "You are a warm and cheerful assistant who explains things in simple, everyday language so everyone can understand, even people who may not be familiar with elections or technical terms.

How you communicate:
- Keep answers short, clear, and friendly.
- Avoid complicated words or long sentences.
- Always stay patient, positive, and supportive.

Rules:
- Use only the information provided in the context to answer questions.
- If the context does not contain the answer, politely say you don't know and let the user know you're happy to help with another question.

Goal:
Make every user feel welcome, comfortable, and understood.";

/// The question-plus-context prompt sent as the user message.
pub fn user_prompt(context: &str, query: &str) -> String {
    format!(
        "Context:\n{}\n\nQuestion: {}\n\nAnswer precisely based on the context:",
        context, query
    )
}

/// Generates an answer from a system prompt and a user prompt.
#[async_trait]
pub trait AnswerSynthesizer: Send + Sync {
    fn model_name(&self) -> &str;

    async fn synthesize(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

pub struct DisabledSynthesizer;

#[async_trait]
impl AnswerSynthesizer for DisabledSynthesizer {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn synthesize(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String> {
        bail!("answer synthesizer is disabled")
    }
}

/// Chat-completions client.
///
/// API keys come from `OPENAI_API_KEY` (openai) or `AZURE_OPENAI_API_KEY` (azure).
pub struct ChatCompletionSynthesizer {
    endpoint: ApiEndpoint,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl ChatCompletionSynthesizer {
    pub fn new(config: &SynthesizerConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            anyhow::anyhow!("synthesizer.model required for {} provider", config.provider)
        })?;
        let key_var = match config.provider.as_str() {
            "azure" => "AZURE_OPENAI_API_KEY",
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
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl AnswerSynthesizer for ChatCompletionSynthesizer {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn synthesize(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let request = self
            .client
            .post(self.endpoint.url(&self.model, "chat/completions"))
            .header("Content-Type", "application/json")
            .json(&body);

        let response = self.endpoint.authorize(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("chat completion API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_completion(&json)
    }
}

/// Extract `choices[0].message.content`.
fn parse_completion(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid chat completion response: missing content"))
}

pub fn create_synthesizer(config: &SynthesizerConfig) -> Result<Arc<dyn AnswerSynthesizer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledSynthesizer)),
        "openai" | "azure" => Ok(Arc::new(ChatCompletionSynthesizer::new(config)?)),
        other => bail!("Unknown synthesizer provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_prompt_layout() {
        assert_eq!(
            user_prompt("[source: a chunk: 1 score:0.9000]\nPolls open at 7.", "When?"),
            "Context:\n[source: a chunk: 1 score:0.9000]\nPolls open at 7.\n\nQuestion: When?\n\nAnswer precisely based on the context:"
        );
    }

    #[test]
    fn test_parse_completion() {
        let json = serde_json::json!({
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": "At 7am." } }]
        });
        assert_eq!(parse_completion(&json).unwrap(), "At 7am.");
        assert!(parse_completion(&serde_json::json!({ "choices": [] })).is_err());
    }
}
