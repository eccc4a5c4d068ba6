//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and two HTTP-backed implementations:
//! - **[`OpenAiEmbedder`]** — calls the OpenAI embeddings API.
//! - **[`OllamaEmbedder`]** — calls a local Ollama instance's `/api/embed` endpoint.
//!
//! Both batch texts into a single request and retry transient failures
//! (network errors, timeouts, HTTP 429 and 5xx) with the policy from
//! [`retry`](crate::retry). Other 4xx responses (bad key, exhausted quota)
//! fail immediately.
//!
//! Also provides [`cosine_similarity`], used by the in-memory vector store.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{Config, Credentials};
use crate::error::{EmbedError, Error, Result};
use crate::retry::{describe_failure, is_transient_status, retry, RetryPolicy};

/// Maps text to fixed-dimension vectors.
///
/// Implementations must return exactly one vector per input text, in input
/// order, each of length [`dims`](Embedder::dims).
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts.
    async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbedError>;

    /// Embed a single text (e.g. a question).
    async fn embed_one(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Malformed("empty embedding response".to_string()))
    }
}

// ============ OpenAI ============

/// Embedder backed by `POST /v1/embeddings`.
pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

/// Error code OpenAI returns (with HTTP 429) once the account quota is used up.
const OPENAI_QUOTA_EXHAUSTED: &str = "insufficient_quota";

impl OpenAiEmbedder {
    pub fn new(
        model: impl Into<String>,
        dims: usize,
        api_key: impl Into<String>,
        client: reqwest::Client,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            model: model.into(),
            dims,
            api_key: api_key.into(),
            base_url: "https://api.openai.com".to_string(),
            client,
            retry,
        }
    }

    /// Point the client at another OpenAI-compatible server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn request(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::Transient(format!("OpenAI request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let json: Value = response
                .json()
                .await
                .map_err(|e| EmbedError::Malformed(e.to_string()))?;
            return parse_openai_response(&json);
        }

        let detail = format!("OpenAI API error {}", describe_failure(response).await);
        // An exhausted quota also comes back as 429 but will not recover.
        if is_transient_status(status) && !detail.contains(OPENAI_QUOTA_EXHAUSTED) {
            Err(EmbedError::Transient(detail))
        } else {
            Err(EmbedError::Permanent(detail))
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = retry(&self.retry, "openai.embeddings", || self.request(texts)).await?;
        check_count(texts.len(), vectors)
    }
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts the `data[].embedding` arrays, ordered by their `index` field.
fn parse_openai_response(json: &Value) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbedError::Malformed("missing data array".to_string()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| EmbedError::Malformed("missing embedding".to_string()))?;
        indexed.push((index, parse_vector(embedding)?));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Embedder backed by a local Ollama instance (`POST /api/embed`).
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl OllamaEmbedder {
    pub fn new(
        model: impl Into<String>,
        dims: usize,
        url: impl Into<String>,
        client: reqwest::Client,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            model: model.into(),
            dims,
            url: url.into().trim_end_matches('/').to_string(),
            client,
            retry,
        }
    }

    async fn request(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                EmbedError::Transient(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if status.is_success() {
            let json: Value = response
                .json()
                .await
                .map_err(|e| EmbedError::Malformed(e.to_string()))?;
            return parse_ollama_response(&json);
        }

        let detail = format!("Ollama API error {}", describe_failure(response).await);
        if is_transient_status(status) {
            Err(EmbedError::Transient(detail))
        } else {
            Err(EmbedError::Permanent(detail))
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = retry(&self.retry, "ollama.embed", || self.request(texts)).await?;
        check_count(texts.len(), vectors)
    }
}

fn parse_ollama_response(json: &Value) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbedError::Malformed("missing embeddings array".to_string()))?
        .iter()
        .map(parse_vector)
        .collect()
}

fn parse_vector(value: &Value) -> std::result::Result<Vec<f32>, EmbedError> {
    value
        .as_array()
        .ok_or_else(|| EmbedError::Malformed("embedding is not an array".to_string()))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbedError::Malformed("embedding value is not a number".to_string()))
        })
        .collect()
}

fn check_count(
    expected: usize,
    vectors: Vec<Vec<f32>>,
) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
    if vectors.len() != expected {
        return Err(EmbedError::Malformed(format!(
            "expected {} embeddings, got {}",
            expected,
            vectors.len()
        )));
    }
    Ok(vectors)
}

// ============ No-op ============

/// Embedder that returns zero vectors of a fixed dimension.
///
/// Stands in for a real provider where nothing is embedded, such as
/// `index --dry-run`, so no provider credentials are needed.
pub struct NoopEmbedder {
    dims: usize,
}

impl NoopEmbedder {
    pub fn with_dimension(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl Embedder for NoopEmbedder {
    fn model_name(&self) -> &str {
        "noop"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
        Ok(vec![vec![0.0; self.dims]; texts.len()])
    }
}

/// Create the [`Embedder`] selected by `config.embedding.provider`.
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"openai"` | [`OpenAiEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
pub fn create_embedder(config: &Config, credentials: &Credentials) -> Result<Arc<dyn Embedder>> {
    let embedding = &config.embedding;
    let model = embedding
        .model
        .clone()
        .ok_or_else(|| Error::Configuration("embedding.model is required".to_string()))?;
    let dims = embedding
        .dims
        .ok_or_else(|| Error::Configuration("embedding.dims is required".to_string()))?;
    let client = config.network.http_client()?;
    let policy = RetryPolicy::from(&config.retry);

    match embedding.provider.as_str() {
        "openai" => {
            let api_key = credentials.openai_api_key.clone().ok_or_else(|| {
                Error::Configuration("OPENAI_API_KEY environment variable not set".to_string())
            })?;
            let mut embedder = OpenAiEmbedder::new(model, dims, api_key, client, policy);
            if let Some(url) = &embedding.url {
                embedder = embedder.with_base_url(url.clone());
            }
            Ok(Arc::new(embedder))
        }
        "ollama" => {
            let url = embedding
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string());
            Ok(Arc::new(OllamaEmbedder::new(model, dims, url, client, policy)))
        }
        other => Err(Error::Configuration(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// Cosine of the angle between `a` and `b`, in `[-1.0, 1.0]`.
///
/// Mismatched lengths, empty input and zero vectors score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let (dot, aa, bb) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, aa, bb), (x, y)| {
            (dot + x * y, aa + x * x, bb + y * y)
        });
    let norm = (aa * bb).sqrt();
    if norm < f32::EPSILON {
        0.0
    } else {
        dot / norm
    }
}
