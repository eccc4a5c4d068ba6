//! Indexing pipeline orchestration.
//!
//! Coordinates the ingestion flow: source listing → download → extraction →
//! chunking → embedding → vector store upsert.
//!
//! Every document moves through
//! `Pending → Extracted → Chunked → Embedded → Stored`. A failure at any
//! step is recorded as that document's [`DocumentOutcome`] and the run
//! continues with the next document. Only two conditions stop a run:
//!
//! - the source listing fails (nothing to index);
//! - an embedding's dimension disagrees with the index
//!   ([`Error::DimensionMismatch`]), since every later write would be wrong too.
//!
//! Documents are processed in listing order. With `indexing.concurrency > 1`
//! up to that many documents are in flight at once; outcomes are still
//! reported in listing order.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chunk::chunk_document;
use crate::config::{ChunkingConfig, Config};
use crate::embedding::Embedder;
use crate::error::{EmbedError, Error, ExtractError, Result};
use crate::extract::{DefaultExtractor, TextExtractor};
use crate::models::{Chunk, Document, DocumentRef, EntryMetadata, IndexEntry};
use crate::source::DocumentSource;
use crate::store::VectorStore;

/// The step at which a document failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DocumentStage {
    Download,
    Extract,
    Chunk,
    Embed,
    Store,
}

impl fmt::Display for DocumentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DocumentStage::Download => "download",
            DocumentStage::Extract => "extract",
            DocumentStage::Chunk => "chunk",
            DocumentStage::Embed => "embed",
            DocumentStage::Store => "store",
        };
        f.write_str(name)
    }
}

/// What happened to one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DocumentOutcome {
    /// All chunks were written (or, in a dry run, would have been).
    Indexed { chunks: usize },
    /// The extracted text was empty or whitespace. Nothing was written.
    SkippedEmpty,
    /// The document failed at `stage`. `stored` entries had already been
    /// written when the failure happened.
    Failed {
        stage: DocumentStage,
        reason: String,
        stored: usize,
    },
}

impl DocumentOutcome {
    fn failed(stage: DocumentStage, reason: impl ToString) -> Self {
        DocumentOutcome::Failed {
            stage,
            reason: reason.to_string(),
            stored: 0,
        }
    }
}

/// Outcome of one document, keyed by its display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentReport {
    pub name: String,
    pub outcome: DocumentOutcome,
}

/// Result of an indexing run.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub documents: Vec<DocumentReport>,
}

impl IndexReport {
    pub fn indexed(&self) -> usize {
        self.count(|o| matches!(o, DocumentOutcome::Indexed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, DocumentOutcome::SkippedEmpty))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, DocumentOutcome::Failed { .. }))
    }

    /// Chunks written across all documents, including partial writes.
    pub fn chunks_written(&self) -> usize {
        self.documents
            .iter()
            .map(|d| match d.outcome {
                DocumentOutcome::Indexed { chunks } => chunks,
                DocumentOutcome::Failed { stored, .. } => stored,
                DocumentOutcome::SkippedEmpty => 0,
            })
            .sum()
    }

    fn count(&self, pred: impl Fn(&DocumentOutcome) -> bool) -> usize {
        self.documents.iter().filter(|d| pred(&d.outcome)).count()
    }
}

/// Extracts, chunks, embeds and stores documents.
pub struct IndexingPipeline {
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    chunking: ChunkingConfig,
    embed_batch_size: usize,
    upsert_batch_size: usize,
    concurrency: usize,
    call_timeout: Duration,
    dry_run: bool,
}

impl IndexingPipeline {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>, config: &Config) -> Self {
        Self {
            extractor: Arc::new(DefaultExtractor),
            embedder,
            store,
            chunking: config.chunking.clone(),
            embed_batch_size: config.embedding.batch_size.max(1),
            upsert_batch_size: config.vector_store.upsert_batch_size.max(1),
            concurrency: config.indexing.concurrency.max(1),
            call_timeout: config.network.call_timeout(),
            dry_run: false,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Extract and chunk only; never embed or write.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// List `folder` on `source`, then download and index every document.
    ///
    /// A listing failure aborts the run. A download failure is recorded
    /// against that document only.
    pub async fn index_source(
        &self,
        source: &dyn DocumentSource,
        folder: &str,
        mime_type: &str,
        limit: Option<usize>,
    ) -> Result<IndexReport> {
        let started_at = Utc::now();
        let mut refs = self
            .bounded("source listing", source.list(folder, mime_type))
            .await?;
        if let Some(limit) = limit {
            refs.truncate(limit);
        }
        info!(source = source.name(), folder, documents = refs.len(), "listed documents");

        self.check_dimension().await?;

        let documents = self
            .run_ordered(refs, |doc_ref| self.fetch_and_index(source, doc_ref))
            .await?;
        Ok(self.report(started_at, documents))
    }

    /// Index documents that are already in memory.
    pub async fn index_documents(&self, documents: Vec<Document>) -> Result<IndexReport> {
        let started_at = Utc::now();
        self.check_dimension().await?;

        let documents = self
            .run_ordered(documents, |document| async move {
                let name = document.display_name.clone();
                let outcome = self.index_document(document).await?;
                Ok(DocumentReport { name, outcome })
            })
            .await?;
        Ok(self.report(started_at, documents))
    }

    /// Index one document.
    ///
    /// Per-document failures come back as [`DocumentOutcome::Failed`]; an
    /// `Err` means the whole run must stop.
    pub async fn index_document(&self, document: Document) -> Result<DocumentOutcome> {
        let name = document.display_name.clone();
        let text = match self.extract(document.bytes, &document.content_type).await {
            Ok(text) => text,
            Err(e) => {
                let outcome = DocumentOutcome::failed(DocumentStage::Extract, e);
                return Ok(self.log_outcome(&name, outcome));
            }
        };
        if text.trim().is_empty() {
            return Ok(self.log_outcome(&name, DocumentOutcome::SkippedEmpty));
        }

        let chunks = match chunk_document(&document.id, &name, &text, &self.chunking) {
            Ok(chunks) => chunks,
            Err(e) => {
                let outcome = DocumentOutcome::failed(DocumentStage::Chunk, e);
                return Ok(self.log_outcome(&name, outcome));
            }
        };
        debug!(document = %name, chunks = chunks.len(), "chunked");

        if self.dry_run {
            let outcome = DocumentOutcome::Indexed {
                chunks: chunks.len(),
            };
            return Ok(self.log_outcome(&name, outcome));
        }

        let entries = match self.embed_chunks(&chunks).await {
            Ok(entries) => entries,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                let outcome = DocumentOutcome::failed(DocumentStage::Embed, e);
                return Ok(self.log_outcome(&name, outcome));
            }
        };

        let mut stored = 0;
        for batch in entries.chunks(self.upsert_batch_size) {
            if let Err(e) = self.bounded("vector upsert", self.store.upsert(batch)).await {
                let outcome = DocumentOutcome::Failed {
                    stage: DocumentStage::Store,
                    reason: e.to_string(),
                    stored,
                };
                return Ok(self.log_outcome(&name, outcome));
            }
            stored += batch.len();
        }

        Ok(self.log_outcome(&name, DocumentOutcome::Indexed { chunks: stored }))
    }

    /// Fail early when the index was created for another embedding size.
    async fn check_dimension(&self) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        match self.bounded("index describe", self.store.describe()).await {
            Ok(stats) => match stats.dimension {
                Some(expected) if expected != self.embedder.dims() => {
                    Err(Error::DimensionMismatch {
                        expected,
                        actual: self.embedder.dims(),
                    })
                }
                _ => Ok(()),
            },
            Err(e) => {
                warn!(error = %e, "could not describe vector index; skipping dimension check");
                Ok(())
            }
        }
    }

    async fn fetch_and_index(
        &self,
        source: &dyn DocumentSource,
        doc_ref: DocumentRef,
    ) -> Result<DocumentReport> {
        let download = self
            .bounded("document download", source.download(&doc_ref.id))
            .await;
        let bytes = match download {
            Ok(bytes) => bytes,
            Err(e) => {
                let outcome = DocumentOutcome::failed(DocumentStage::Download, e);
                let outcome = self.log_outcome(&doc_ref.name, outcome);
                return Ok(DocumentReport {
                    name: doc_ref.name,
                    outcome,
                });
            }
        };

        let document = Document {
            id: doc_ref.id,
            display_name: doc_ref.name.clone(),
            content_type: doc_ref.content_type,
            bytes,
        };
        let outcome = self.index_document(document).await?;
        Ok(DocumentReport {
            name: doc_ref.name,
            outcome,
        })
    }

    /// Run `task` over `items` with at most `concurrency` in flight,
    /// keeping input order and stopping at the first fatal error.
    async fn run_ordered<I, F, Fut>(&self, items: Vec<I>, task: F) -> Result<Vec<DocumentReport>>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<DocumentReport>>,
    {
        let mut results = stream::iter(items).map(task).buffered(self.concurrency);
        let mut reports = Vec::new();
        while let Some(report) = results.next().await {
            reports.push(report?);
        }
        Ok(reports)
    }

    async fn extract(&self, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let extractor = Arc::clone(&self.extractor);
        let content_type = content_type.to_string();
        // PDF parsing is CPU-bound.
        tokio::task::spawn_blocking(move || extractor.extract(&bytes, &content_type))
            .await
            .map_err(|e| ExtractError::Pdf(format!("extraction task failed: {}", e)))?
            .map_err(Error::from)
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<IndexEntry>> {
        let expected = self.embedder.dims();
        let mut entries = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(self.embed_batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self
                .bounded("embedding", self.embedder.embed_batch(&texts))
                .await?;
            if vectors.len() != batch.len() {
                return Err(EmbedError::Malformed(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    vectors.len()
                ))
                .into());
            }

            for (chunk, vector) in batch.iter().zip(vectors) {
                if vector.len() != expected {
                    return Err(Error::DimensionMismatch {
                        expected,
                        actual: vector.len(),
                    });
                }
                entries.push(IndexEntry {
                    chunk_id: chunk.id.clone(),
                    vector,
                    metadata: EntryMetadata {
                        text: chunk.text.clone(),
                        source: chunk.source_name.clone(),
                    },
                });
            }
        }
        Ok(entries)
    }

    /// Await `fut` for at most the configured call timeout.
    async fn bounded<T, E>(
        &self,
        operation: &str,
        fut: impl Future<Output = std::result::Result<T, E>>,
    ) -> Result<T>
    where
        Error: From<E>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::Timeout {
                operation: operation.to_string(),
                after: self.call_timeout,
            }),
        }
    }

    fn log_outcome(&self, name: &str, outcome: DocumentOutcome) -> DocumentOutcome {
        match &outcome {
            DocumentOutcome::Indexed { chunks } => {
                info!(document = %name, chunks, dry_run = self.dry_run, "indexed")
            }
            DocumentOutcome::SkippedEmpty => info!(document = %name, "skipped: no text"),
            DocumentOutcome::Failed { stage, reason, stored } => {
                warn!(document = %name, %stage, stored, reason = %reason, "failed")
            }
        }
        outcome
    }

    fn report(&self, started_at: DateTime<Utc>, documents: Vec<DocumentReport>) -> IndexReport {
        let report = IndexReport {
            started_at,
            finished_at: Utc::now(),
            dry_run: self.dry_run,
            documents,
        };
        info!(
            indexed = report.indexed(),
            skipped = report.skipped(),
            failed = report.failed(),
            chunks = report.chunks_written(),
            "indexing run finished"
        );
        report
    }
}
