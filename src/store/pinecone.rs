//! Pinecone REST backend for [`VectorStore`].
//!
//! Data-plane calls go to the index host:
//!
//! - `POST /vectors/upsert`, batched to at most `upsert_batch_size` vectors
//! - `POST /query`
//! - `POST /describe_index_stats`
//!
//! When no host is configured, [`PineconeStore::connect`] looks the index up
//! on the control plane (`GET /indexes/{name}`), creating it as a serverless
//! cosine index with the embedding dimension if it does not exist yet. An
//! existing index with another dimension or metric is rejected.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::VectorStoreConfig;
use crate::error::StoreError;
use crate::models::{EntryMetadata, IndexEntry, RetrievalMatch, StoreStats};
use crate::retry::{describe_failure, is_transient_status, retry, RetryPolicy};

use super::VectorStore;

const API_VERSION: &str = "2024-07";
const READY_POLL_ATTEMPTS: u32 = 60;
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Client for one Pinecone index (and one namespace within it).
pub struct PineconeStore {
    host: String,
    api_key: String,
    namespace: String,
    upsert_batch_size: usize,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl PineconeStore {
    /// Client for an index whose data-plane host is already known.
    pub fn new(
        host: impl Into<String>,
        api_key: impl Into<String>,
        client: reqwest::Client,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            host: normalize_host(&host.into()),
            api_key: api_key.into(),
            namespace: String::new(),
            upsert_batch_size: 100,
            client,
            retry,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_upsert_batch_size(mut self, size: usize) -> Self {
        self.upsert_batch_size = size.max(1);
        self
    }

    /// Resolve the index host (creating the index if needed) and return a
    /// client for it.
    pub async fn connect(
        config: &VectorStoreConfig,
        dims: usize,
        api_key: String,
        client: reqwest::Client,
        retry: RetryPolicy,
    ) -> Result<Self, StoreError> {
        let host = match &config.host {
            Some(host) => host.clone(),
            None => {
                let control = ControlPlane {
                    base_url: config.control_url.trim_end_matches('/').to_string(),
                    api_key: &api_key,
                    client: &client,
                    retry: &retry,
                };
                control.ensure_index(config, dims).await?
            }
        };
        Ok(Self::new(host, api_key, client, retry)
            .with_namespace(config.namespace.clone())
            .with_upsert_batch_size(config.upsert_batch_size))
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, StoreError> {
        let response = self
            .client
            .post(format!("{}{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| StoreError::Transient(format!("Pinecone request failed: {}", e)))?;
        read_json(response).await
    }

    fn namespace_body(&self, mut body: Value) -> Value {
        if !self.namespace.is_empty() {
            body["namespace"] = Value::String(self.namespace.clone());
        }
        body
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<(), StoreError> {
        for batch in entries.chunks(self.upsert_batch_size) {
            let vectors: Vec<Value> = batch
                .iter()
                .map(|e| {
                    json!({
                        "id": e.chunk_id,
                        "values": e.vector,
                        "metadata": { "text": e.metadata.text, "source": e.metadata.source },
                    })
                })
                .collect();
            let body = self.namespace_body(json!({ "vectors": vectors }));

            let response = retry(&self.retry, "pinecone.upsert", || {
                self.post("/vectors/upsert", &body)
            })
            .await?;
            let upserted = response
                .get("upsertedCount")
                .and_then(|c| c.as_u64())
                .unwrap_or(batch.len() as u64);
            debug!(upserted, "pinecone upsert batch");
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<RetrievalMatch>, StoreError> {
        let body = self.namespace_body(json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": include_metadata,
            "includeValues": false,
        }));
        let response = retry(&self.retry, "pinecone.query", || self.post("/query", &body)).await?;
        parse_query_response(&response)
    }

    async fn describe(&self) -> Result<StoreStats, StoreError> {
        let body = json!({});
        let response = retry(&self.retry, "pinecone.describe_index_stats", || {
            self.post("/describe_index_stats", &body)
        })
        .await?;
        Ok(parse_stats_response(&response, &self.namespace))
    }
}

struct ControlPlane<'a> {
    base_url: String,
    api_key: &'a str,
    client: &'a reqwest::Client,
    retry: &'a RetryPolicy,
}

impl ControlPlane<'_> {
    /// Return the host of the configured index, creating it if absent.
    async fn ensure_index(
        &self,
        config: &VectorStoreConfig,
        dims: usize,
    ) -> Result<String, StoreError> {
        let name = &config.index;
        let existing = retry(self.retry, "pinecone.describe_index", || {
            self.describe_index(name)
        })
        .await?;

        let mut description = match existing {
            Some(description) => {
                check_index_shape(name, &description, dims)?;
                description
            }
            None => {
                info!(index = %name, dims, "creating Pinecone index");
                let body = json!({
                    "name": name,
                    "dimension": dims,
                    "metric": "cosine",
                    "spec": { "serverless": { "cloud": config.cloud, "region": config.region } },
                });
                retry(self.retry, "pinecone.create_index", || self.create_index(&body)).await?
            }
        };

        let mut polls = 0;
        while !is_ready(&description) {
            polls += 1;
            if polls > READY_POLL_ATTEMPTS {
                return Err(StoreError::Transient(format!(
                    "index {} did not become ready",
                    name
                )));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
            description = retry(self.retry, "pinecone.describe_index", || {
                self.describe_index(name)
            })
            .await?
            .ok_or_else(|| {
                StoreError::Permanent(format!("index {} disappeared while waiting", name))
            })?;
        }

        description
            .get("host")
            .and_then(|h| h.as_str())
            .map(|h| h.to_string())
            .ok_or_else(|| StoreError::Malformed("index description has no host".to_string()))
    }

    async fn describe_index(&self, name: &str) -> Result<Option<Value>, StoreError> {
        let response = self
            .client
            .get(format!("{}/indexes/{}", self.base_url, name))
            .header("Api-Key", self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .send()
            .await
            .map_err(|e| StoreError::Transient(format!("Pinecone request failed: {}", e)))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_json(response).await.map(Some)
    }

    async fn create_index(&self, body: &Value) -> Result<Value, StoreError> {
        let response = self
            .client
            .post(format!("{}/indexes", self.base_url))
            .header("Api-Key", self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| StoreError::Transient(format!("Pinecone request failed: {}", e)))?;
        read_json(response).await
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, StoreError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| StoreError::Malformed(e.to_string()));
    }
    let detail = format!("Pinecone API error {}", describe_failure(response).await);
    if is_transient_status(status) {
        Err(StoreError::Transient(detail))
    } else {
        Err(StoreError::Permanent(detail))
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

fn is_ready(description: &Value) -> bool {
    description
        .pointer("/status/ready")
        .and_then(|r| r.as_bool())
        .unwrap_or(true)
}

fn check_index_shape(name: &str, description: &Value, dims: usize) -> Result<(), StoreError> {
    if let Some(actual) = description.get("dimension").and_then(|d| d.as_u64()) {
        if actual as usize != dims {
            return Err(StoreError::IndexMismatch(format!(
                "index {} has dimension {}, embedding model produces {}",
                name, actual, dims
            )));
        }
    }
    if let Some(metric) = description.get("metric").and_then(|m| m.as_str()) {
        if metric != "cosine" {
            return Err(StoreError::IndexMismatch(format!(
                "index {} uses metric {}, expected cosine",
                name, metric
            )));
        }
    }
    Ok(())
}

fn parse_query_response(json: &Value) -> Result<Vec<RetrievalMatch>, StoreError> {
    let matches = match json.get("matches") {
        Some(Value::Array(matches)) => matches,
        Some(_) => return Err(StoreError::Malformed("matches is not an array".to_string())),
        None => return Ok(Vec::new()),
    };

    matches
        .iter()
        .map(|m| {
            let chunk_id = m
                .get("id")
                .and_then(|id| id.as_str())
                .ok_or_else(|| StoreError::Malformed("match without id".to_string()))?
                .to_string();
            let score = m.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0) as f32;
            let metadata = m
                .get("metadata")
                .and_then(|md| serde_json::from_value::<EntryMetadata>(md.clone()).ok());
            Ok(RetrievalMatch {
                chunk_id,
                score,
                metadata,
            })
        })
        .collect()
}

fn parse_stats_response(json: &Value, namespace: &str) -> StoreStats {
    let dimension = json
        .get("dimension")
        .and_then(|d| d.as_u64())
        .map(|d| d as usize);
    let namespaced = json
        .get("namespaces")
        .and_then(|ns| ns.get(namespace))
        .and_then(|ns| ns.get("vectorCount"))
        .and_then(|c| c.as_u64());
    let entry_count = match namespaced {
        Some(count) => count,
        None if namespace.is_empty() => json
            .get("totalVectorCount")
            .and_then(|c| c.as_u64())
            .unwrap_or(0),
        None => 0,
    };
    StoreStats {
        dimension,
        entry_count: entry_count as usize,
    }
}
