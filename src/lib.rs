//! # docqa
//!
//! Question answering over a folder of documents by retrieval-augmented
//! generation.
//!
//! docqa lists the documents of a folder (Google Drive or a local
//! directory), extracts their text, splits it into overlapping chunks,
//! embeds every chunk and stores the vectors in a vector index. Questions
//! are embedded the same way; the nearest chunks become the context of a
//! prompt whose answer cites the documents it came from.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────────────┐   ┌──────────────┐
//! │  Sources    │──▶│  IndexingPipeline   │──▶│ VectorStore  │
//! │ Drive / FS  │   │ Extract+Chunk+Embed │   │ Pinecone/mem │
//! └─────────────┘   └─────────────────────┘   └──────┬───────┘
//!                                                    │
//!                   ┌─────────────────────┐          │
//!   question ──────▶│   QueryPipeline     │◀─────────┘
//!                   │ Embed+Retrieve+Gen  │──▶ answer + sources
//!                   └─────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docqa sources                       # list documents in the folder
//! docqa index                         # index them
//! docqa ask "What is category 3?"     # one question
//! docqa chat                          # interactive session
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment secrets |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`retry`] | Bounded exponential backoff |
//! | [`source`] | Document sources (Drive, filesystem) |
//! | [`extract`] | PDF, PPTX and text extraction |
//! | [`chunk`] | Overlapping separator-aware chunking |
//! | [`embedding`] | Embedding providers |
//! | [`store`] | Vector stores |
//! | [`generation`] | Answer generation |
//! | [`index`] | Indexing pipeline |
//! | [`query`] | Query pipeline and sessions |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod index;
pub mod models;
pub mod query;
pub mod retry;
pub mod source;
pub mod store;

pub use error::{Error, Result};
