//! Answer generation.
//!
//! The [`Generator`] trait turns a fully assembled prompt into text. The
//! only shipped implementation is [`GeminiGenerator`], which calls
//! `POST /v1/models/{model}:generateContent` and concatenates the text parts
//! of the first candidate.
//!
//! Non-success responses surface as [`GenerationError::Status`] with the
//! status code and body so the caller can show them; 429 and 5xx are
//! retried first.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::{Config, Credentials};
use crate::error::{Error, GenerationError, Result};
use crate::retry::{retry, RetryPolicy};

/// Maximum characters of an error body kept in [`GenerationError::Status`].
const MAX_ERROR_BODY_CHARS: usize = 500;

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> std::result::Result<String, GenerationError>;
}

/// Build the prompt sent to the generator.
///
/// The instruction is fixed; `context` is the retrieved text and `question`
/// the user's question, verbatim.
pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "Answer the following question using the internal documents below:\n\n{}\n\nQ: {}",
        context, question
    )
}

/// Google Gemini `generateContent` client.
pub struct GeminiGenerator {
    model: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl GeminiGenerator {
    pub fn new(
        model: impl Into<String>,
        api_key: impl Into<String>,
        client: reqwest::Client,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            client,
            retry,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn request(&self, body: &Value) -> std::result::Result<String, GenerationError> {
        let response = self
            .client
            .post(format!(
                "{}/v1/models/{}:generateContent",
                self.base_url, self.model
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            .map_err(|e| GenerationError::Transient(format!("Gemini request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;
        parse_gemini_response(&json)
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(&self, prompt: &str) -> std::result::Result<String, GenerationError> {
        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });
        retry(&self.retry, "gemini.generate", || self.request(&body)).await
    }
}

/// Concatenate `candidates[0].content.parts[*].text`.
fn parse_gemini_response(json: &Value) -> std::result::Result<String, GenerationError> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| GenerationError::Malformed("response has no candidate text".to_string()))?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    Ok(text)
}

/// Create the generator selected by `config.generation.provider`.
pub fn create_generator(config: &Config, credentials: &Credentials) -> Result<Arc<dyn Generator>> {
    match config.generation.provider.as_str() {
        "gemini" => {
            let api_key = credentials.gemini_api_key.clone().ok_or_else(|| {
                Error::Configuration("GEMINI_API_KEY environment variable not set".to_string())
            })?;
            let generator = GeminiGenerator::new(
                config.generation.model.clone(),
                api_key,
                config.network.http_client()?,
                RetryPolicy::from(&config.retry),
            )
            .with_base_url(config.generation.url.clone());
            Ok(Arc::new(generator))
        }
        other => Err(Error::Configuration(format!(
            "unknown generation provider: {}",
            other
        ))),
    }
}
