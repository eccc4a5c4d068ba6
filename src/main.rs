//! # docqa CLI
//!
//! The `docqa` binary indexes a folder of documents and answers questions
//! about them.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa sources` | List the documents in the configured folder |
//! | `docqa index` | Extract, chunk, embed and store every document |
//! | `docqa ask "<question>"` | Answer one question |
//! | `docqa chat` | Interactive question/answer session |
//! | `docqa status` | Show the vector index dimension and entry count |
//!
//! Secrets come from the environment: `OPENAI_API_KEY`, `PINECONE_API_KEY`,
//! `GEMINI_API_KEY` and `GOOGLE_DRIVE_ACCESS_TOKEN`, as required by the
//! configured providers. `sources` and `index --dry-run` only need the
//! source's secret.
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `docqa=info`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use docqa::config::{self, Config, Credentials};
use docqa::embedding::{create_embedder, Embedder, NoopEmbedder};
use docqa::generation::create_generator;
use docqa::index::{DocumentOutcome, IndexReport, IndexingPipeline};
use docqa::query::{QueryOutcome, QueryPipeline, QuerySession};
use docqa::source::create_source;
use docqa::store::{create_store, InMemoryVectorStore, VectorStore};

/// docqa: answer questions about a folder of documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docqa.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "Answer questions about a folder of documents with retrieval-augmented generation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the documents in the configured source folder.
    Sources,

    /// Index every document in the configured source folder.
    ///
    /// Prints one line per document and a summary. Documents that fail
    /// are reported and skipped; the run continues.
    Index {
        /// Extract and chunk only; do not embed or write to the index.
        #[arg(long)]
        dry_run: bool,

        /// Index at most this many documents.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Answer a single question.
    Ask {
        /// The question.
        question: String,

        /// Number of chunks to retrieve (default from config).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Start an interactive question/answer session.
    ///
    /// `/clear` clears the last answer, `/reset` starts over, `/quit` exits.
    Chat {
        /// Number of chunks to retrieve (default from config).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Show the vector index dimension and entry count.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docqa=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Sources => {
            let creds = Credentials::source_from_env(&cfg)?;
            run_sources(&cfg, &creds).await?
        }
        Commands::Index {
            dry_run: true,
            limit,
        } => {
            // Nothing is embedded or stored, so only the source needs a secret.
            let creds = Credentials::source_from_env(&cfg)?;
            let embedder = Arc::new(NoopEmbedder::with_dimension(
                cfg.embedding.dims.unwrap_or_default(),
            ));
            let store = Arc::new(InMemoryVectorStore::new());
            let report = run_index(&cfg, &creds, embedder, store, true, limit).await?;
            print_report(&report);
        }
        Commands::Index {
            dry_run: false,
            limit,
        } => {
            let creds = Credentials::from_env(&cfg)?;
            let embedder = create_embedder(&cfg, &creds)?;
            let store = create_store(&cfg, &creds).await?;
            let report = run_index(&cfg, &creds, embedder, store, false, limit).await?;
            print_report(&report);
        }
        Commands::Ask { question, top_k } => {
            let creds = Credentials::from_env(&cfg)?;
            let pipeline = query_pipeline(&cfg, &creds, top_k).await?;
            let mut session = QuerySession::new();
            let outcome = pipeline.ask(&mut session, &question).await;
            print_outcome(&outcome);
            if outcome.is_failure() {
                bail!("query failed");
            }
        }
        Commands::Chat { top_k } => {
            let creds = Credentials::from_env(&cfg)?;
            let pipeline = query_pipeline(&cfg, &creds, top_k).await?;
            run_chat(&pipeline).await?;
        }
        Commands::Status => {
            let creds = Credentials::from_env(&cfg)?;
            let store = create_store(&cfg, &creds).await?;
            let stats = store.describe().await?;
            println!("vector store: {} ({})", cfg.vector_store.provider, cfg.vector_store.index);
            match stats.dimension {
                Some(d) => println!("  dimension: {}", d),
                None => println!("  dimension: unknown"),
            }
            println!("  entries: {}", stats.entry_count);
            println!("  embedding model: {:?} ({:?} dims)", cfg.embedding.model, cfg.embedding.dims);
        }
    }

    Ok(())
}

async fn run_sources(cfg: &Config, creds: &Credentials) -> Result<()> {
    let source = create_source(cfg, creds)?;
    let documents = source
        .list(&cfg.source.folder, &cfg.source.mime_type)
        .await
        .context("listing source folder")?;

    println!("{:<40} {:<20} ID", "NAME", "TYPE");
    for doc in &documents {
        println!("{:<40} {:<20} {}", doc.name, short_type(&doc.content_type), doc.id);
    }
    println!();
    println!("{} document(s) in {}", documents.len(), cfg.source.folder);
    Ok(())
}

async fn run_index(
    cfg: &Config,
    creds: &Credentials,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    dry_run: bool,
    limit: Option<usize>,
) -> Result<IndexReport> {
    let source = create_source(cfg, creds)?;
    let pipeline = IndexingPipeline::new(embedder, store, cfg).with_dry_run(dry_run);
    let report = pipeline
        .index_source(
            source.as_ref(),
            &cfg.source.folder,
            &cfg.source.mime_type,
            limit,
        )
        .await?;
    Ok(report)
}

/// Build the query pipeline. An in-memory index does not outlive the
/// process, so it is filled from the source first.
async fn query_pipeline(
    cfg: &Config,
    creds: &Credentials,
    top_k: Option<usize>,
) -> Result<QueryPipeline> {
    let embedder = create_embedder(cfg, creds)?;
    let store = create_store(cfg, creds).await?;
    let generator = create_generator(cfg, creds)?;

    if cfg.vector_store.provider == "memory" {
        let report = run_index(cfg, creds, embedder.clone(), store.clone(), false, None).await?;
        eprintln!(
            "indexed {} document(s), {} chunk(s) in memory",
            report.indexed(),
            report.chunks_written()
        );
    }

    let mut pipeline = QueryPipeline::new(embedder, store, generator, cfg);
    if let Some(k) = top_k {
        pipeline = pipeline.with_top_k(k);
    }
    Ok(pipeline)
}

async fn run_chat(pipeline: &QueryPipeline) -> Result<()> {
    let mut session = QuerySession::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("Ask a question. Commands: /clear, /reset, /quit");
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                session.clear_answer();
                println!("(answer cleared)");
            }
            "/reset" => {
                session.reset();
                println!("(session reset; the index is kept)");
            }
            question => {
                let outcome = pipeline.ask(&mut session, question).await;
                print_outcome(&outcome);
            }
        }
    }
    Ok(())
}

fn print_outcome(outcome: &QueryOutcome) {
    match outcome {
        QueryOutcome::Answered(answer) | QueryOutcome::NoMatches(answer) => {
            println!("{}", answer.text);
            if !answer.cited_sources.is_empty() {
                println!();
                println!("Sources:");
                for source in &answer.cited_sources {
                    println!("  - {}", source);
                }
            }
        }
        QueryOutcome::Failed { stage, error } => {
            eprintln!("error while {}: {}", stage, error);
        }
    }
}

fn print_report(report: &IndexReport) {
    let label = if report.dry_run { "index (dry-run)" } else { "index" };
    println!("{}", label);
    for doc in &report.documents {
        match &doc.outcome {
            DocumentOutcome::Indexed { chunks } => {
                println!("  indexed  {} ({} chunks)", doc.name, chunks)
            }
            DocumentOutcome::SkippedEmpty => println!("  skipped  {} (no text)", doc.name),
            DocumentOutcome::Failed {
                stage,
                reason,
                stored,
            } => println!(
                "  failed   {} at {} ({} stored): {}",
                doc.name, stage, stored, reason
            ),
        }
    }
    println!("  documents: {}", report.documents.len());
    println!("  indexed: {}", report.indexed());
    println!("  skipped: {}", report.skipped());
    println!("  failed: {}", report.failed());
    println!("  chunks written: {}", report.chunks_written());
    println!(
        "  elapsed: {:.1}s",
        (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0
    );
    println!("ok");
}

fn short_type(content_type: &str) -> &str {
    match content_type {
        docqa::extract::MIME_PDF => "pdf",
        docqa::extract::MIME_PPTX => "pptx",
        docqa::extract::MIME_TEXT => "text",
        docqa::extract::MIME_MARKDOWN => "markdown",
        other => other,
    }
}
