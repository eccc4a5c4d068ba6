//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the narrow interface the pipelines use to
//! persist `(id, vector, metadata)` triples and answer nearest-neighbour
//! queries. Two backends ship with the crate:
//!
//! - [`memory::InMemoryVectorStore`]: brute-force cosine over a `HashMap`,
//!   used for tests, dry runs and single-process CLI sessions.
//! - [`pinecone::PineconeStore`]: the Pinecone REST data plane, with the
//!   index created on first use through the control plane.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod pinecone;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Config, Credentials};
use crate::error::{Error, Result, StoreError};
use crate::models::{IndexEntry, RetrievalMatch, StoreStats};
use crate::retry::RetryPolicy;

pub use memory::InMemoryVectorStore;
pub use pinecone::PineconeStore;

/// Persistent nearest-neighbour index over chunk embeddings.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorStore::upsert) | Insert or overwrite entries by chunk ID |
/// | [`query`](VectorStore::query) | Top-k entries by descending cosine similarity |
/// | [`describe`](VectorStore::describe) | Index dimension and entry count |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert entries, overwriting any existing entry with the same ID.
    async fn upsert(&self, entries: &[IndexEntry]) -> std::result::Result<(), StoreError>;

    /// Return at most `top_k` matches, best first. Metadata is only
    /// populated when `include_metadata` is set.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> std::result::Result<Vec<RetrievalMatch>, StoreError>;

    async fn describe(&self) -> std::result::Result<StoreStats, StoreError>;
}

/// Create the store selected by `config.vector_store.provider`.
///
/// | Config Value | Store |
/// |-------------|-------|
/// | `"memory"` | [`InMemoryVectorStore`] |
/// | `"pinecone"` | [`PineconeStore`], index ensured on connect |
pub async fn create_store(
    config: &Config,
    credentials: &Credentials,
) -> Result<Arc<dyn VectorStore>> {
    let dims = config
        .embedding
        .dims
        .ok_or_else(|| Error::Configuration("embedding.dims is required".to_string()))?;

    match config.vector_store.provider.as_str() {
        "memory" => Ok(Arc::new(InMemoryVectorStore::with_dimension(dims))),
        "pinecone" => {
            let api_key = credentials.pinecone_api_key.clone().ok_or_else(|| {
                Error::Configuration("PINECONE_API_KEY environment variable not set".to_string())
            })?;
            let client = config.network.http_client()?;
            let policy = RetryPolicy::from(&config.retry);
            let store = PineconeStore::connect(&config.vector_store, dims, api_key, client, policy)
                .await
                .map_err(|e| match e {
                    StoreError::IndexMismatch(detail) => Error::Configuration(detail),
                    other => Error::Store(other),
                })?;
            Ok(Arc::new(store))
        }
        other => Err(Error::Configuration(format!(
            "unknown vector store provider: {}",
            other
        ))),
    }
}
