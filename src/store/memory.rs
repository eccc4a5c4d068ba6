//! In-memory [`VectorStore`] implementation.
//!
//! Entries live in a `HashMap` behind `std::sync::RwLock`. Queries are
//! brute-force cosine similarity over every stored vector; ties are broken
//! by chunk ID so results are deterministic.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::StoreError;
use crate::models::{EntryMetadata, IndexEntry, RetrievalMatch, StoreStats};

use super::VectorStore;

struct StoredEntry {
    vector: Vec<f32>,
    metadata: EntryMetadata,
}

/// In-process store for tests, dry runs and single-session use.
pub struct InMemoryVectorStore {
    dimension: RwLock<Option<usize>>,
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl InMemoryVectorStore {
    /// A store whose dimension is fixed by the first upsert.
    pub fn new() -> Self {
        Self {
            dimension: RwLock::new(None),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// A store that only accepts vectors of length `dimension`.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: RwLock::new(Some(dimension)),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<(), StoreError> {
        let mut dimension = self
            .dimension
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let expected = match *dimension {
            Some(d) => d,
            None => match entries.first() {
                Some(first) => first.vector.len(),
                None => return Ok(()),
            },
        };
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != expected) {
            return Err(StoreError::IndexMismatch(format!(
                "entry {} has dimension {}, index has {}",
                bad.chunk_id,
                bad.vector.len(),
                expected
            )));
        }
        *dimension = Some(expected);

        let mut stored = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for entry in entries {
            stored.insert(
                entry.chunk_id.clone(),
                StoredEntry {
                    vector: entry.vector.clone(),
                    metadata: entry.metadata.clone(),
                },
            );
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<RetrievalMatch>, StoreError> {
        let dimension = *self.dimension.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(expected) = dimension.filter(|d| *d != vector.len()) {
            return Err(StoreError::IndexMismatch(format!(
                "query vector has dimension {}, index has {}",
                vector.len(),
                expected
            )));
        }

        let stored = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut matches: Vec<RetrievalMatch> = stored
            .iter()
            .map(|(id, entry)| RetrievalMatch {
                chunk_id: id.clone(),
                score: cosine_similarity(vector, &entry.vector),
                metadata: include_metadata.then(|| entry.metadata.clone()),
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn describe(&self) -> Result<StoreStats, StoreError> {
        let dimension = *self.dimension.read().unwrap_or_else(PoisonError::into_inner);
        Ok(StoreStats {
            dimension,
            entry_count: self.len(),
        })
    }
}
