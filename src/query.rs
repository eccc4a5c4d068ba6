//! Question answering over the vector index.
//!
//! A query moves through
//! `Idle → Embedding → Retrieving → AssemblingContext → Generating → Answered`:
//!
//! 1. embed the question with the same embedder used for indexing; a vector
//!    whose length differs from the embedder's `dims()` fails the query;
//! 2. fetch the `top_k` nearest chunks with their metadata;
//! 3. with no matches, answer [`NO_MATCH_ANSWER`] without calling the generator;
//!    matches that all lack their chunk text fail the query instead;
//! 4. join match texts best-first with `"\n\n"` into a context of at most
//!    `context_budget_chars` characters (see [`assemble_context`]);
//! 5. send the fixed prompt to the generator and return its text verbatim,
//!    citing the sources of the chunks that made it into the context.
//!
//! Failures never escape as panics or errors: they become
//! [`QueryOutcome::Failed`] carrying the stage that failed.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{Error, StoreError};
use crate::generation::{build_prompt, Generator};
use crate::models::{Answer, RetrievalMatch};
use crate::store::VectorStore;

/// Answer given when retrieval finds nothing.
pub const NO_MATCH_ANSWER: &str = "No relevant information was found in the indexed documents.";

/// Placed between consecutive chunk texts in the context.
pub const CONTEXT_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QueryStage {
    Idle,
    Embedding,
    Retrieving,
    AssemblingContext,
    Generating,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryStage::Idle => "idle",
            QueryStage::Embedding => "embedding",
            QueryStage::Retrieving => "retrieving",
            QueryStage::AssemblingContext => "assembling context",
            QueryStage::Generating => "generating",
        };
        f.write_str(name)
    }
}

/// Result of one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum QueryOutcome {
    /// The generator answered from retrieved context.
    Answered(Answer),
    /// Nothing relevant was retrieved; the answer is [`NO_MATCH_ANSWER`].
    NoMatches(Answer),
    Failed { stage: QueryStage, error: String },
}

impl QueryOutcome {
    /// The answer to show, if any.
    pub fn answer(&self) -> Option<&Answer> {
        match self {
            QueryOutcome::Answered(answer) | QueryOutcome::NoMatches(answer) => Some(answer),
            QueryOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, QueryOutcome::Failed { .. })
    }

    fn failed(stage: QueryStage, error: impl fmt::Display) -> Self {
        QueryOutcome::Failed {
            stage,
            error: error.to_string(),
        }
    }

    fn no_matches() -> Self {
        QueryOutcome::NoMatches(Answer {
            text: NO_MATCH_ANSWER.to_string(),
            cited_sources: BTreeSet::new(),
        })
    }
}

/// One question and what came of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exchange {
    pub question: String,
    pub outcome: QueryOutcome,
}

/// Per-user question/answer state, owned by the caller.
#[derive(Debug, Clone, Default)]
pub struct QuerySession {
    question: Option<String>,
    last: Option<QueryOutcome>,
    history: Vec<Exchange>,
}

impl QuerySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn question(&self) -> Option<&str> {
        self.question.as_deref()
    }

    pub fn last_outcome(&self) -> Option<&QueryOutcome> {
        self.last.as_ref()
    }

    pub fn history(&self) -> &[Exchange] {
        &self.history
    }

    /// Forget the displayed answer; the question and history stay.
    pub fn clear_answer(&mut self) {
        self.last = None;
    }

    /// Back to a fresh session. The index is untouched.
    pub fn reset(&mut self) {
        self.question = None;
        self.last = None;
        self.history.clear();
    }

    fn record(&mut self, question: &str, outcome: QueryOutcome) {
        self.question = Some(question.to_string());
        self.last = Some(outcome.clone());
        self.history.push(Exchange {
            question: question.to_string(),
            outcome,
        });
    }
}

/// Retrieved text ready for the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub text: String,
    /// Sources of the matches admitted into `text`.
    pub sources: BTreeSet<String>,
    /// How many matches were admitted.
    pub admitted: usize,
}

/// Join match texts best-first into a context of at most `budget` characters.
///
/// Matches are admitted in rank order while they fit, separators included.
/// The first match that does not fit ends assembly, so lower-ranked matches
/// are always the ones dropped. A top match that alone exceeds the budget
/// is cut to `budget` characters. Matches without metadata carry no text
/// and are ignored.
pub fn assemble_context(matches: &[RetrievalMatch], budget: usize) -> Context {
    let mut ranked: Vec<&RetrievalMatch> = matches.iter().filter(|m| m.metadata.is_some()).collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let separator_chars = CONTEXT_SEPARATOR.chars().count();
    let mut text = String::new();
    let mut used = 0usize;
    let mut sources = BTreeSet::new();
    let mut admitted = 0usize;

    for m in ranked {
        let Some(metadata) = &m.metadata else { continue };
        let chars = metadata.text.chars().count();

        if admitted == 0 {
            if chars > budget {
                text.extend(metadata.text.chars().take(budget));
                sources.insert(metadata.source.clone());
                admitted = 1;
                break;
            }
        } else if used + separator_chars + chars > budget {
            break;
        } else {
            text.push_str(CONTEXT_SEPARATOR);
            used += separator_chars;
        }

        text.push_str(&metadata.text);
        used += chars;
        sources.insert(metadata.source.clone());
        admitted += 1;
    }

    Context {
        text,
        sources,
        admitted,
    }
}

/// Embeds questions, retrieves context and generates answers.
pub struct QueryPipeline {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    generator: Arc<dyn Generator>,
    top_k: usize,
    context_budget: usize,
    call_timeout: Duration,
}

impl QueryPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        generator: Arc<dyn Generator>,
        config: &Config,
    ) -> Self {
        Self {
            embedder,
            store,
            generator,
            top_k: config.retrieval.top_k,
            context_budget: config.retrieval.context_budget_chars,
            call_timeout: config.network.call_timeout(),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Answer `question` and record the exchange in `session`.
    pub async fn ask(&self, session: &mut QuerySession, question: &str) -> QueryOutcome {
        let outcome = self.answer(question).await;
        session.record(question, outcome.clone());
        outcome
    }

    /// Answer `question` without touching any session.
    pub async fn answer(&self, question: &str) -> QueryOutcome {
        if question.trim().is_empty() {
            return QueryOutcome::failed(QueryStage::Idle, "question is empty");
        }

        let vector = match self
            .bounded("question embedding", self.embedder.embed_one(question))
            .await
        {
            Ok(vector) => vector,
            Err(e) => return self.fail(QueryStage::Embedding, e),
        };
        let expected = self.embedder.dims();
        if vector.len() != expected {
            let mismatch = Error::DimensionMismatch {
                expected,
                actual: vector.len(),
            };
            return self.fail(QueryStage::Embedding, mismatch);
        }

        let matches = match self
            .bounded("retrieval", self.store.query(&vector, self.top_k, true))
            .await
        {
            Ok(matches) => matches,
            Err(e) => return self.fail(QueryStage::Retrieving, e),
        };
        debug!(matches = matches.len(), top_k = self.top_k, "retrieved");

        if matches.is_empty() {
            info!("no matching chunks; returning fixed answer");
            return QueryOutcome::no_matches();
        }

        let context = assemble_context(&matches, self.context_budget);
        if context.admitted == 0 {
            let missing = StoreError::Malformed(format!(
                "{} retrieved matches carry no chunk text",
                matches.len()
            ));
            return self.fail(QueryStage::AssemblingContext, missing.into());
        }
        debug!(
            admitted = context.admitted,
            chars = context.text.chars().count(),
            "assembled context"
        );

        let prompt = build_prompt(&context.text, question);
        match self
            .bounded("generation", self.generator.generate(&prompt))
            .await
        {
            Ok(text) => {
                info!(sources = context.sources.len(), "answered");
                QueryOutcome::Answered(Answer {
                    text,
                    cited_sources: context.sources,
                })
            }
            Err(e) => self.fail(QueryStage::Generating, e),
        }
    }

    fn fail(&self, stage: QueryStage, error: Error) -> QueryOutcome {
        warn!(%stage, error = %error, "query failed");
        QueryOutcome::failed(stage, error)
    }

    async fn bounded<T, E>(
        &self,
        operation: &str,
        fut: impl Future<Output = std::result::Result<T, E>>,
    ) -> std::result::Result<T, Error>
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
}
