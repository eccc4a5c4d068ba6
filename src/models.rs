//! Core data models used throughout docqa.
//!
//! These types represent the documents, chunks, index entries and answers
//! that flow through the indexing and query pipelines.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A document as listed by a document source, before download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub id: String,
    pub name: String,
    pub content_type: String,
}

/// A downloaded document. Dropped once indexed.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub display_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// A chunk of a document's text; the retrieval unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// `"{source_name}-{ordinal}"`, stable across re-indexing.
    pub id: String,
    pub document_id: String,
    pub ordinal: usize,
    pub text: String,
    pub source_name: String,
}

/// Metadata stored next to every vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub text: String,
    pub source: String,
}

/// The unit written to and read from the vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub metadata: EntryMetadata,
}

/// A nearest-neighbour hit.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalMatch {
    pub chunk_id: String,
    /// Cosine similarity; higher is closer.
    pub score: f32,
    /// Present when the query asked for metadata.
    pub metadata: Option<EntryMetadata>,
}

/// A generated (or fixed) answer with the sources it was grounded on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    pub text: String,
    pub cited_sources: BTreeSet<String>,
}

/// Shape of a vector index as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    /// Declared vector dimension, if the store fixes one.
    pub dimension: Option<usize>,
    pub entry_count: usize,
}
