//! Configuration loading and validation.
//!
//! Settings come from a TOML file; secrets come from the environment and are
//! resolved once, at startup, into [`Credentials`]. Both steps fail with a
//! single [`Error::Configuration`] naming everything that is wrong, so a
//! misconfigured run never gets as far as touching a document.
//!
//! ```toml
//! [source]
//! provider = "drive"
//! folder = "your-drive-folder-id"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [vector_store]
//! provider = "pinecone"
//! index = "docqa"
//!
//! [generation]
//! provider = "gemini"
//! model = "gemini-1.5-pro"
//! ```

use serde::Deserialize;
use std::path::Path;

use crate::error::{Error, Result};

pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_PINECONE_API_KEY: &str = "PINECONE_API_KEY";
pub const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";
pub const ENV_DRIVE_ACCESS_TOKEN: &str = "GOOGLE_DRIVE_ACCESS_TOKEN";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// `"drive"` or `"filesystem"`.
    #[serde(default = "default_source_provider")]
    pub provider: String,
    /// Drive folder ID, or a directory path for the filesystem source.
    pub folder: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_drive_api_url")]
    pub api_url: String,
}

fn default_source_provider() -> String {
    "drive".to_string()
}
fn default_mime_type() -> String {
    "application/pdf".to_string()
}
fn default_drive_api_url() -> String {
    "https://www.googleapis.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"` or `"ollama"`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    /// `"pinecone"` or `"memory"`.
    #[serde(default = "default_store_provider")]
    pub provider: String,
    #[serde(default = "default_index_name")]
    pub index: String,
    /// Data-plane host. Resolved from the control plane when absent.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_control_url")]
    pub control_url: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default = "default_cloud")]
    pub cloud: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: default_store_provider(),
            index: default_index_name(),
            host: None,
            control_url: default_control_url(),
            namespace: String::new(),
            cloud: default_cloud(),
            region: default_region(),
            upsert_batch_size: default_upsert_batch_size(),
        }
    }
}

fn default_store_provider() -> String {
    "pinecone".to_string()
}
fn default_index_name() -> String {
    "docqa".to_string()
}
fn default_control_url() -> String {
    "https://api.pinecone.io".to_string()
}
fn default_cloud() -> String {
    "aws".to_string()
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_upsert_batch_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Upper bound on the context handed to the generator, in characters.
    #[serde(default = "default_context_budget")]
    pub context_budget_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            context_budget_chars: default_context_budget(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_context_budget() -> usize {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// Only `"gemini"` is supported.
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_generation_url")]
    pub url: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            url: default_generation_url(),
        }
    }
}

fn default_generation_provider() -> String {
    "gemini".to_string()
}
fn default_generation_model() -> String {
    "gemini-1.5-pro".to_string()
}
fn default_generation_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    /// Documents processed at once. `1` means strictly sequential.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    /// Per-request timeout applied by the HTTP clients.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Deadline for one capability call as seen by a pipeline, retries included.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    30
}
fn default_call_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    8000
}

impl NetworkConfig {
    /// Shared HTTP client with the configured per-request timeout.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(self.request_timeout_secs))
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {}", e)))
    }

    pub fn call_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CredentialScope {
    All,
    Source,
}

/// Secrets resolved from the environment for the selected providers.
///
/// Only the keys the configuration actually needs are required; the rest
/// stay `None`.
#[derive(Clone, Default)]
pub struct Credentials {
    pub openai_api_key: Option<String>,
    pub pinecone_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub drive_access_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Credentials")
            .field("openai_api_key", &mask(&self.openai_api_key))
            .field("pinecone_api_key", &mask(&self.pinecone_api_key))
            .field("gemini_api_key", &mask(&self.gemini_api_key))
            .field("drive_access_token", &mask(&self.drive_access_token))
            .finish()
    }
}

impl Credentials {
    /// Read the secrets `config` requires from the process environment.
    pub fn from_env(config: &Config) -> Result<Self> {
        Self::resolve(config, |key| std::env::var(key).ok())
    }

    /// Read only the document source's secret, for commands that never
    /// embed, store or generate (`sources`, `index --dry-run`).
    pub fn source_from_env(config: &Config) -> Result<Self> {
        Self::resolve_scoped(config, CredentialScope::Source, |key| std::env::var(key).ok())
    }

    /// Resolve secrets through `lookup`, reporting every missing key at once.
    pub fn resolve<F>(config: &Config, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::resolve_scoped(config, CredentialScope::All, lookup)
    }

    fn resolve_scoped<F>(config: &Config, scope: CredentialScope, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let all = scope == CredentialScope::All;
        let mut missing = Vec::new();
        let mut require = |needed: bool, key: &str| -> Option<String> {
            if !needed {
                return None;
            }
            match lookup(key).filter(|v| !v.trim().is_empty()) {
                Some(v) => Some(v),
                None => {
                    missing.push(key.to_string());
                    None
                }
            }
        };

        let creds = Credentials {
            openai_api_key: require(
                all && config.embedding.provider == "openai",
                ENV_OPENAI_API_KEY,
            ),
            pinecone_api_key: require(
                all && config.vector_store.provider == "pinecone",
                ENV_PINECONE_API_KEY,
            ),
            gemini_api_key: require(
                all && config.generation.provider == "gemini",
                ENV_GEMINI_API_KEY,
            ),
            drive_access_token: require(config.source.provider == "drive", ENV_DRIVE_ACCESS_TOKEN),
        };

        if !missing.is_empty() {
            return Err(Error::Configuration(format!(
                "missing environment variables: {}",
                missing.join(", ")
            )));
        }
        Ok(creds)
    }
}

/// Read, parse and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Configuration(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| Error::Configuration(format!("failed to parse config: {}", e)))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let mut problems = Vec::new();

    match config.source.provider.as_str() {
        "drive" | "filesystem" => {}
        other => problems.push(format!(
            "unknown source.provider '{}' (expected drive or filesystem)",
            other
        )),
    }
    if config.source.folder.trim().is_empty() {
        problems.push("source.folder must not be empty".to_string());
    }

    if config.chunking.chunk_size == 0 {
        problems.push("chunking.chunk_size must be > 0".to_string());
    } else if config.chunking.overlap >= config.chunking.chunk_size {
        problems.push("chunking.overlap must be smaller than chunking.chunk_size".to_string());
    }

    match config.embedding.provider.as_str() {
        "openai" | "ollama" => {}
        other => problems.push(format!(
            "unknown embedding.provider '{}' (expected openai or ollama)",
            other
        )),
    }
    if config.embedding.model.is_none() {
        problems.push("embedding.model is required".to_string());
    }
    if config.embedding.dims.unwrap_or(0) == 0 {
        problems.push("embedding.dims must be > 0".to_string());
    }
    if config.embedding.batch_size == 0 {
        problems.push("embedding.batch_size must be > 0".to_string());
    }

    match config.vector_store.provider.as_str() {
        "pinecone" | "memory" => {}
        other => problems.push(format!(
            "unknown vector_store.provider '{}' (expected pinecone or memory)",
            other
        )),
    }
    if config.vector_store.index.trim().is_empty() {
        problems.push("vector_store.index must not be empty".to_string());
    }
    if config.vector_store.upsert_batch_size == 0 {
        problems.push("vector_store.upsert_batch_size must be > 0".to_string());
    }

    if config.retrieval.top_k == 0 {
        problems.push("retrieval.top_k must be >= 1".to_string());
    }
    if config.retrieval.context_budget_chars == 0 {
        problems.push("retrieval.context_budget_chars must be > 0".to_string());
    }

    if config.generation.provider != "gemini" {
        problems.push(format!(
            "unknown generation.provider '{}' (expected gemini)",
            config.generation.provider
        ));
    }

    if config.indexing.concurrency == 0 {
        problems.push("indexing.concurrency must be >= 1".to_string());
    }
    if config.network.request_timeout_secs == 0 || config.network.call_timeout_secs == 0 {
        problems.push("network timeouts must be > 0".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::Configuration(problems.join("; ")))
    }
}
