//! Error types for docqa.
//!
//! Every capability has its own leaf error so the pipelines can decide, per
//! failure, whether to retry, skip the current document, or stop. Leaf
//! errors that cross the network report [`is_transient`](EmbedError::is_transient);
//! the [`retry`](crate::retry) module only ever retries those.

use std::time::Duration;

use thiserror::Error;

/// Top-level error for pipeline and configuration failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration. Fatal: nothing is started.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractError),

    #[error("chunking error: {0}")]
    Chunking(#[from] ChunkError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbedError),

    #[error("vector store error: {0}")]
    Store(#[from] StoreError),

    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("document source error: {0}")]
    Source(#[from] SourceError),

    /// A vector's length disagrees with the index dimension.
    #[error("embedding dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// An external call did not complete within its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },
}

impl Error {
    /// True for errors that must stop a whole run rather than one document.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::DimensionMismatch { .. })
    }
}

/// Text extraction errors. Never fatal: the document is skipped.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),

    #[error("text is not valid UTF-8: {0}")]
    Encoding(String),
}

/// Chunking errors.
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("invalid chunking parameters: {0}")]
    InvalidConfig(String),
}

/// Embedding capability errors.
#[derive(Error, Debug)]
pub enum EmbedError {
    /// Network failure, timeout, rate limit or server error.
    #[error("transient embedding failure: {0}")]
    Transient(String),

    /// Auth, quota or request errors that retrying cannot fix.
    #[error("embedding request rejected: {0}")]
    Permanent(String),

    /// The provider answered with something we cannot use.
    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

impl EmbedError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbedError::Transient(_))
    }
}

/// Vector store capability errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("transient vector store failure: {0}")]
    Transient(String),

    #[error("vector store request rejected: {0}")]
    Permanent(String),

    #[error("malformed vector store response: {0}")]
    Malformed(String),

    /// The index exists with a shape that does not match the configuration.
    #[error("vector index mismatch: {0}")]
    IndexMismatch(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Generation capability errors.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("transient generation failure: {0}")]
    Transient(String),

    /// Non-success HTTP status, with the response body for display.
    #[error("generation service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed generation response: {0}")]
    Malformed(String),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Transient(_) => true,
            GenerationError::Status { status, .. } => *status == 429 || *status >= 500,
            GenerationError::Malformed(_) => false,
        }
    }
}

/// Document source errors (listing and download).
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("transient document source failure: {0}")]
    Transient(String),

    #[error("document source request rejected: {0}")]
    Permanent(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }
}

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, Error>;
