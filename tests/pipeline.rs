//! End-to-end tests of the indexing and query pipelines with in-process
//! capabilities: a keyword embedder, a counting generator, a scripted
//! document source and the in-memory vector store.

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use docqa::config::{parse_config, Config};
use docqa::embedding::Embedder;
use docqa::error::{EmbedError, Error, GenerationError, SourceError, StoreError};
use docqa::extract::{extract_text, MIME_PDF, MIME_PPTX, MIME_TEXT, PAGE_SEPARATOR};
use docqa::generation::Generator;
use docqa::index::{DocumentOutcome, DocumentStage, IndexingPipeline};
use docqa::models::{Document, DocumentRef, IndexEntry, RetrievalMatch, StoreStats};
use docqa::query::{QueryOutcome, QueryPipeline, QuerySession, QueryStage, NO_MATCH_ANSWER};
use docqa::source::DocumentSource;
use docqa::store::{InMemoryVectorStore, VectorStore};

// ============ Fakes ============

/// Maps text to one of three axes by keyword. Fails permanently on "poison".
struct KeywordEmbedder {
    calls: AtomicUsize,
    output_dims: usize,
}

impl KeywordEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            output_dims: 3,
        }
    }

    /// Claims 3 dimensions but produces vectors of another length.
    fn lying(output_dims: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            output_dims,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn keyword_vector(text: &str) -> Vec<f32> {
    if text.contains("apple") {
        vec![1.0, 0.0, 0.0]
    } else if text.contains("banana") {
        vec![0.0, 1.0, 0.0]
    } else {
        vec![0.0, 0.0, 1.0]
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }

    fn dims(&self) -> usize {
        3
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        texts
            .iter()
            .map(|t| {
                if t.contains("poison") {
                    return Err(EmbedError::Permanent("quota exceeded".to_string()));
                }
                let mut v = keyword_vector(t);
                v.resize(self.output_dims, 0.0);
                Ok(v)
            })
            .collect()
    }
}

/// Records prompts and answers with a fixed text, or fails, or stalls.
enum GeneratorMode {
    Answer,
    Fail,
    Stall,
}

struct FakeGenerator {
    mode: GeneratorMode,
    prompts: std::sync::Mutex<Vec<String>>,
}

impl FakeGenerator {
    fn new(mode: GeneratorMode) -> Self {
        Self {
            mode,
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.mode {
            GeneratorMode::Answer => Ok("generated answer".to_string()),
            GeneratorMode::Fail => Err(GenerationError::Status {
                status: 403,
                body: "API key not valid".to_string(),
            }),
            GeneratorMode::Stall => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok("too late".to_string())
            }
        }
    }
}

/// In-memory store that rejects every upsert after the first `allowed`.
struct FlakyStore {
    inner: InMemoryVectorStore,
    allowed: usize,
    upserts: AtomicUsize,
}

#[async_trait]
impl VectorStore for FlakyStore {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<(), StoreError> {
        if self.upserts.fetch_add(1, Ordering::SeqCst) >= self.allowed {
            return Err(StoreError::Permanent("index is read-only".to_string()));
        }
        self.inner.upsert(entries).await
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<RetrievalMatch>, StoreError> {
        self.inner.query(vector, top_k, include_metadata).await
    }

    async fn describe(&self) -> Result<StoreStats, StoreError> {
        self.inner.describe().await
    }
}

/// In-memory store whose matches never carry metadata.
struct TextlessStore(InMemoryVectorStore);

#[async_trait]
impl VectorStore for TextlessStore {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<(), StoreError> {
        self.0.upsert(entries).await
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        _include_metadata: bool,
    ) -> Result<Vec<RetrievalMatch>, StoreError> {
        self.0.query(vector, top_k, false).await
    }

    async fn describe(&self) -> Result<StoreStats, StoreError> {
        self.0.describe().await
    }
}

/// Source backed by a fixed listing; ids missing from `files` fail to download.
struct ScriptedSource {
    listing: Result<Vec<DocumentRef>, String>,
    files: HashMap<String, Vec<u8>>,
}

#[async_trait]
impl DocumentSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn list(&self, _folder: &str, _mime_type: &str) -> Result<Vec<DocumentRef>, SourceError> {
        self.listing
            .clone()
            .map_err(SourceError::Permanent)
    }

    async fn download(&self, id: &str) -> Result<Vec<u8>, SourceError> {
        self.files
            .get(id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(id.to_string()))
    }
}

// ============ Helpers ============

fn config_with(chunk_size: usize, overlap: usize, extra: &str) -> Config {
    parse_config(&format!(
        r#"
[source]
provider = "filesystem"
folder = "."

[chunking]
chunk_size = {}
overlap = {}

[embedding]
provider = "ollama"
model = "keyword"
dims = 3

[vector_store]
provider = "memory"

{}
"#,
        chunk_size, overlap, extra
    ))
    .unwrap()
}

fn text_doc(name: &str, text: &str) -> Document {
    Document {
        id: format!("id-{}", name),
        display_name: name.to_string(),
        content_type: MIME_TEXT.to_string(),
        bytes: text.as_bytes().to_vec(),
    }
}

fn pptx_doc(name: &str, slides: &[&str]) -> Document {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (i, text) in slides.iter().enumerate() {
            zip.start_file(
                format!("ppt/slides/slide{}.xml", i + 1),
                zip::write::SimpleFileOptions::default(),
            )
            .unwrap();
            let xml = format!(
                "<?xml version=\"1.0\"?><p:sld xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\" xmlns:p=\"http://schemas.openxmlformats.org/presentationml/2006/main\"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>",
                text
            );
            zip.write_all(xml.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    Document {
        id: format!("id-{}", name),
        display_name: name.to_string(),
        content_type: MIME_PPTX.to_string(),
        bytes: buf,
    }
}

/// A PDF with one Helvetica text line per page, built with lopdf.
fn pdf_bytes(pages: &[&str]) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};

    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        kids.push(Object::from(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

fn pdf_doc(name: &str, pages: &[&str]) -> Document {
    Document {
        id: format!("id-{}", name),
        display_name: name.to_string(),
        content_type: MIME_PDF.to_string(),
        bytes: pdf_bytes(pages),
    }
}

/// Document "A" splits into two chunks, "B" stays in one.
fn a_and_b() -> Vec<Document> {
    vec![
        text_doc("A", "apple apple apple apple apple apple "),
        text_doc("B", "banana split"),
    ]
}

fn outcomes(report: &docqa::index::IndexReport) -> Vec<DocumentOutcome> {
    report.documents.iter().map(|d| d.outcome.clone()).collect()
}

// ============ Indexing ============

#[tokio::test]
async fn empty_and_whitespace_documents_are_skipped_without_writes() {
    let config = config_with(500, 100, "");
    let embedder = Arc::new(KeywordEmbedder::new());
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = IndexingPipeline::new(embedder.clone(), store.clone(), &config);

    let report = pipeline
        .index_documents(vec![text_doc("empty", ""), text_doc("blank", " \n\t\n  ")])
        .await
        .unwrap();

    assert_eq!(
        outcomes(&report),
        vec![DocumentOutcome::SkippedEmpty, DocumentOutcome::SkippedEmpty]
    );
    assert_eq!(report.skipped(), 2);
    assert_eq!(embedder.calls(), 0);
    assert!(store.is_empty());
}

#[tokio::test]
async fn reindexing_overwrites_instead_of_duplicating() {
    let config = config_with(20, 0, "");
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = IndexingPipeline::new(Arc::new(KeywordEmbedder::new()), store.clone(), &config);

    let first = pipeline.index_documents(a_and_b()).await.unwrap();
    assert_eq!(
        outcomes(&first),
        vec![
            DocumentOutcome::Indexed { chunks: 2 },
            DocumentOutcome::Indexed { chunks: 1 },
        ]
    );
    assert_eq!(store.len(), 3);

    pipeline.index_documents(a_and_b()).await.unwrap();
    assert_eq!(store.len(), 3);

    let ids: BTreeSet<String> = store
        .query(&[1.0, 1.0, 1.0], 10, false)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.chunk_id)
        .collect();
    let expected: BTreeSet<String> = ["A-0", "A-1", "B-0"].iter().map(|s| s.to_string()).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn nearest_chunk_is_ranked_first_with_its_source() {
    let config = config_with(20, 0, "");
    let embedder = Arc::new(KeywordEmbedder::new());
    let store = Arc::new(InMemoryVectorStore::new());
    IndexingPipeline::new(embedder.clone(), store.clone(), &config)
        .index_documents(a_and_b())
        .await
        .unwrap();

    let query = embedder.embed_one("banana").await.unwrap();
    let matches = store.query(&query, 5, true).await.unwrap();

    assert_eq!(matches.len(), 3);
    assert_eq!(matches[0].chunk_id, "B-0");
    assert_eq!(matches[0].metadata.as_ref().unwrap().source, "B");
    for pair in matches.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert_eq!(store.query(&query, 2, true).await.unwrap().len(), 2);
}

#[test]
fn pdf_pages_are_extracted_in_order() {
    let bytes = pdf_bytes(&["apple orchard", "banana harvest"]);
    let text = extract_text(&bytes, MIME_PDF).unwrap();

    let first = text.find("apple").expect("first page text");
    let second = text.find("banana").expect("second page text");
    assert!(first < second, "pages out of order: {:?}", text);
    assert!(text[first..second].contains(PAGE_SEPARATOR));
}

#[tokio::test]
async fn pdf_document_is_indexed_and_retrievable() {
    let config = config_with(500, 100, "");
    let embedder = Arc::new(KeywordEmbedder::new());
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = IndexingPipeline::new(embedder.clone(), store.clone(), &config);

    let report = pipeline
        .index_documents(vec![pdf_doc("fruit.pdf", &["apple orchard", "banana harvest"])])
        .await
        .unwrap();
    assert_eq!(outcomes(&report), vec![DocumentOutcome::Indexed { chunks: 1 }]);
    assert_eq!(store.len(), 1);

    let query = embedder.embed_one("apple").await.unwrap();
    let matches = store.query(&query, 1, true).await.unwrap();
    let metadata = matches[0].metadata.as_ref().unwrap();
    assert_eq!(matches[0].chunk_id, "fruit.pdf-0");
    assert_eq!(metadata.source, "fruit.pdf");
    assert!(metadata.text.contains("banana"));
}

#[tokio::test]
async fn corrupted_pdf_fails_alone() {
    let config = config_with(500, 100, "");
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = IndexingPipeline::new(Arc::new(KeywordEmbedder::new()), store.clone(), &config);

    let broken = Document {
        id: "id-broken".to_string(),
        display_name: "broken.pdf".to_string(),
        content_type: MIME_PDF.to_string(),
        bytes: b"%PDF-1.4\n1 0 obj << /Type /Cat".to_vec(),
    };
    let report = pipeline
        .index_documents(vec![
            text_doc("before", "apple pie"),
            broken,
            pptx_doc("deck.pptx", &["banana slide", "second slide"]),
        ])
        .await
        .unwrap();

    assert_eq!(report.documents.len(), 3);
    assert_eq!(report.documents[0].outcome, DocumentOutcome::Indexed { chunks: 1 });
    match &report.documents[1].outcome {
        DocumentOutcome::Failed { stage, stored, .. } => {
            assert_eq!(*stage, DocumentStage::Extract);
            assert_eq!(*stored, 0);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(report.documents[2].outcome, DocumentOutcome::Indexed { chunks: 1 });
    assert_eq!(report.failed(), 1);
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn unsupported_content_type_fails_at_extract() {
    let config = config_with(500, 100, "");
    let pipeline = IndexingPipeline::new(
        Arc::new(KeywordEmbedder::new()),
        Arc::new(InMemoryVectorStore::new()),
        &config,
    );
    let mut doc = text_doc("image", "not really an image");
    doc.content_type = "image/png".to_string();

    let outcome = pipeline.index_document(doc).await.unwrap();
    assert!(matches!(
        outcome,
        DocumentOutcome::Failed {
            stage: DocumentStage::Extract,
            ..
        }
    ));
}

#[tokio::test]
async fn embedding_failure_is_isolated_to_its_document() {
    let config = config_with(500, 100, "");
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = IndexingPipeline::new(Arc::new(KeywordEmbedder::new()), store.clone(), &config);

    let report = pipeline
        .index_documents(vec![
            text_doc("bad", "poison apple"),
            text_doc("good", "banana bread"),
        ])
        .await
        .unwrap();

    match &report.documents[0].outcome {
        DocumentOutcome::Failed { stage, reason, .. } => {
            assert_eq!(*stage, DocumentStage::Embed);
            assert!(reason.contains("quota exceeded"), "reason: {}", reason);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(report.documents[1].outcome, DocumentOutcome::Indexed { chunks: 1 });
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn partial_store_failure_reports_stored_count() {
    let config = config_with(20, 0, "");
    let config = Config {
        vector_store: docqa::config::VectorStoreConfig {
            upsert_batch_size: 1,
            ..config.vector_store.clone()
        },
        ..config
    };
    let store = Arc::new(FlakyStore {
        inner: InMemoryVectorStore::new(),
        allowed: 1,
        upserts: AtomicUsize::new(0),
    });
    let pipeline = IndexingPipeline::new(Arc::new(KeywordEmbedder::new()), store.clone(), &config);

    let outcome = pipeline
        .index_document(text_doc("A", "apple apple apple apple apple apple "))
        .await
        .unwrap();

    match outcome {
        DocumentOutcome::Failed {
            stage,
            stored,
            reason,
        } => {
            assert_eq!(stage, DocumentStage::Store);
            assert_eq!(stored, 1);
            assert!(reason.contains("read-only"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(store.inner.len(), 1);
}

#[tokio::test]
async fn index_dimension_mismatch_aborts_before_any_document() {
    let config = config_with(500, 100, "");
    let embedder = Arc::new(KeywordEmbedder::new());
    let store = Arc::new(InMemoryVectorStore::with_dimension(1536));
    let pipeline = IndexingPipeline::new(embedder.clone(), store.clone(), &config);

    let err = pipeline.index_documents(a_and_b()).await.unwrap_err();
    assert!(matches!(
        err,
        Error::DimensionMismatch {
            expected: 1536,
            actual: 3
        }
    ));
    assert!(err.is_fatal());
    assert_eq!(embedder.calls(), 0);
}

#[tokio::test]
async fn embedding_dimension_mismatch_aborts_the_run() {
    let config = config_with(500, 100, "");
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = IndexingPipeline::new(Arc::new(KeywordEmbedder::lying(2)), store.clone(), &config);

    let err = pipeline.index_documents(a_and_b()).await.unwrap_err();
    assert!(matches!(
        err,
        Error::DimensionMismatch {
            expected: 3,
            actual: 2
        }
    ));
    assert!(store.is_empty());
}

#[tokio::test]
async fn dry_run_never_embeds_or_writes() {
    let config = config_with(20, 0, "");
    let embedder = Arc::new(KeywordEmbedder::new());
    let store = Arc::new(InMemoryVectorStore::with_dimension(1536));
    let pipeline =
        IndexingPipeline::new(embedder.clone(), store.clone(), &config).with_dry_run(true);

    let report = pipeline.index_documents(a_and_b()).await.unwrap();
    assert!(report.dry_run);
    assert_eq!(
        outcomes(&report),
        vec![
            DocumentOutcome::Indexed { chunks: 2 },
            DocumentOutcome::Indexed { chunks: 1 },
        ]
    );
    assert_eq!(embedder.calls(), 0);
    assert!(store.is_empty());
}

#[tokio::test]
async fn concurrent_indexing_keeps_listing_order() {
    let config = config_with(500, 100, "[indexing]\nconcurrency = 4\n");
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = IndexingPipeline::new(Arc::new(KeywordEmbedder::new()), store.clone(), &config);

    let docs: Vec<Document> = (0..10)
        .map(|i| text_doc(&format!("doc{:02}", i), &format!("apple number {}", i)))
        .collect();
    let report = pipeline.index_documents(docs).await.unwrap();

    let names: Vec<String> = report.documents.iter().map(|d| d.name.clone()).collect();
    let expected: Vec<String> = (0..10).map(|i| format!("doc{:02}", i)).collect();
    assert_eq!(names, expected);
    assert_eq!(report.indexed(), 10);
    assert_eq!(store.len(), 10);
}

#[tokio::test]
async fn download_failure_is_per_document() {
    let config = config_with(500, 100, "");
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = IndexingPipeline::new(Arc::new(KeywordEmbedder::new()), store.clone(), &config);

    let doc_ref = |id: &str| DocumentRef {
        id: id.to_string(),
        name: format!("{}.txt", id),
        content_type: MIME_TEXT.to_string(),
    };
    let mut files = HashMap::new();
    files.insert("one".to_string(), b"apple".to_vec());
    files.insert("three".to_string(), b"banana".to_vec());
    let source = ScriptedSource {
        listing: Ok(vec![doc_ref("one"), doc_ref("two"), doc_ref("three")]),
        files,
    };

    let report = pipeline
        .index_source(&source, "folder", MIME_TEXT, None)
        .await
        .unwrap();

    assert_eq!(report.documents.len(), 3);
    assert_eq!(report.documents[1].name, "two.txt");
    assert!(matches!(
        report.documents[1].outcome,
        DocumentOutcome::Failed {
            stage: DocumentStage::Download,
            ..
        }
    ));
    assert_eq!(report.indexed(), 2);
    assert_eq!(store.len(), 2);

    let limited = pipeline
        .index_source(&source, "folder", MIME_TEXT, Some(1))
        .await
        .unwrap();
    assert_eq!(limited.documents.len(), 1);
}

#[tokio::test]
async fn listing_failure_aborts_the_run() {
    let config = config_with(500, 100, "");
    let pipeline = IndexingPipeline::new(
        Arc::new(KeywordEmbedder::new()),
        Arc::new(InMemoryVectorStore::new()),
        &config,
    );
    let source = ScriptedSource {
        listing: Err("insufficient permissions".to_string()),
        files: HashMap::new(),
    };

    let err = pipeline
        .index_source(&source, "folder", MIME_PDF, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Source(SourceError::Permanent(_))));
}

// ============ Querying ============

async fn indexed_query_pipeline(
    config: &Config,
    generator: Arc<FakeGenerator>,
) -> QueryPipeline {
    let embedder = Arc::new(KeywordEmbedder::new());
    let store = Arc::new(InMemoryVectorStore::new());
    IndexingPipeline::new(embedder.clone(), store.clone(), config)
        .index_documents(a_and_b())
        .await
        .unwrap();
    QueryPipeline::new(embedder, store, generator, config)
}

#[tokio::test]
async fn empty_index_answers_without_generation() {
    let config = config_with(500, 100, "");
    let generator = Arc::new(FakeGenerator::new(GeneratorMode::Answer));
    let pipeline = QueryPipeline::new(
        Arc::new(KeywordEmbedder::new()),
        Arc::new(InMemoryVectorStore::new()),
        generator.clone(),
        &config,
    );

    let outcome = pipeline.answer("What is a banana?").await;
    match outcome {
        QueryOutcome::NoMatches(answer) => {
            assert_eq!(answer.text, NO_MATCH_ANSWER);
            assert!(answer.cited_sources.is_empty());
        }
        other => panic!("expected no matches, got {:?}", other),
    }
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn answer_cites_only_admitted_sources() {
    let config = config_with(20, 0, "");
    let generator = Arc::new(FakeGenerator::new(GeneratorMode::Answer));
    let pipeline = indexed_query_pipeline(&config, generator.clone())
        .await
        .with_top_k(1);

    let outcome = pipeline.answer("banana?").await;
    let answer = outcome.answer().expect("answered").clone();
    assert!(matches!(outcome, QueryOutcome::Answered(_)));
    assert_eq!(answer.text, "generated answer");
    assert_eq!(
        answer.cited_sources.into_iter().collect::<Vec<_>>(),
        vec!["B".to_string()]
    );

    let prompt = generator.last_prompt();
    assert!(prompt.contains("banana split"));
    assert!(prompt.ends_with("Q: banana?"));
    assert!(!prompt.contains("apple"));
}

#[tokio::test]
async fn context_respects_budget() {
    let config = config_with(20, 0, "[retrieval]\ntop_k = 5\ncontext_budget_chars = 14\n");
    let generator = Arc::new(FakeGenerator::new(GeneratorMode::Answer));
    let pipeline = indexed_query_pipeline(&config, generator.clone()).await;

    let outcome = pipeline.answer("banana").await;
    assert!(matches!(outcome, QueryOutcome::Answered(_)));
    // "banana split" (12) fits; another chunk plus separator does not.
    assert_eq!(
        outcome.answer().unwrap().cited_sources,
        ["B".to_string()].into_iter().collect()
    );
    assert!(!generator.last_prompt().contains("apple"));
}

#[tokio::test]
async fn generation_failure_is_a_typed_outcome() {
    let config = config_with(20, 0, "");
    let generator = Arc::new(FakeGenerator::new(GeneratorMode::Fail));
    let pipeline = indexed_query_pipeline(&config, generator).await;
    let mut session = QuerySession::new();

    let outcome = pipeline.ask(&mut session, "apple?").await;
    match &outcome {
        QueryOutcome::Failed { stage, error } => {
            assert_eq!(*stage, QueryStage::Generating);
            assert!(error.contains("403"), "error: {}", error);
            assert!(error.contains("API key not valid"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(session.last_outcome(), Some(&outcome));
    assert_eq!(session.history().len(), 1);
}

#[tokio::test]
async fn blank_question_fails_while_idle() {
    let config = config_with(500, 100, "");
    let generator = Arc::new(FakeGenerator::new(GeneratorMode::Answer));
    let pipeline = indexed_query_pipeline(&config, generator.clone()).await;

    let outcome = pipeline.answer("   ").await;
    assert!(matches!(
        outcome,
        QueryOutcome::Failed {
            stage: QueryStage::Idle,
            ..
        }
    ));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn question_vector_of_wrong_dimension_fails_before_retrieval() {
    let config = config_with(20, 0, "");
    let store = Arc::new(InMemoryVectorStore::new());
    IndexingPipeline::new(Arc::new(KeywordEmbedder::new()), store.clone(), &config)
        .index_documents(a_and_b())
        .await
        .unwrap();
    let generator = Arc::new(FakeGenerator::new(GeneratorMode::Answer));
    let pipeline = QueryPipeline::new(
        Arc::new(KeywordEmbedder::lying(2)),
        store,
        generator.clone(),
        &config,
    );

    let outcome = pipeline.answer("apple?").await;
    match outcome {
        QueryOutcome::Failed { stage, error } => {
            assert_eq!(stage, QueryStage::Embedding);
            assert!(error.contains("expects 3, got 2"), "error: {}", error);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn matches_without_text_fail_while_assembling_context() {
    let config = config_with(20, 0, "");
    let embedder = Arc::new(KeywordEmbedder::new());
    let store = Arc::new(TextlessStore(InMemoryVectorStore::new()));
    IndexingPipeline::new(embedder.clone(), store.clone(), &config)
        .index_documents(a_and_b())
        .await
        .unwrap();
    let generator = Arc::new(FakeGenerator::new(GeneratorMode::Answer));
    let pipeline = QueryPipeline::new(embedder, store, generator.clone(), &config);

    let outcome = pipeline.answer("banana?").await;
    match outcome {
        QueryOutcome::Failed { stage, error } => {
            assert_eq!(stage, QueryStage::AssemblingContext);
            assert!(error.contains("no chunk text"), "error: {}", error);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn stalled_generation_times_out() {
    let config = config_with(500, 100, "[network]\ncall_timeout_secs = 1\n");
    let generator = Arc::new(FakeGenerator::new(GeneratorMode::Stall));
    let pipeline = indexed_query_pipeline(&config, generator).await;

    let outcome = pipeline.answer("apple").await;
    match outcome {
        QueryOutcome::Failed { stage, error } => {
            assert_eq!(stage, QueryStage::Generating);
            assert!(error.contains("timed out"), "error: {}", error);
        }
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn session_tracks_clear_and_reset() {
    let config = config_with(20, 0, "");
    let generator = Arc::new(FakeGenerator::new(GeneratorMode::Answer));
    let pipeline = indexed_query_pipeline(&config, generator).await;
    let mut session = QuerySession::new();

    pipeline.ask(&mut session, "apple?").await;
    pipeline.ask(&mut session, "banana?").await;
    assert_eq!(session.question(), Some("banana?"));
    assert_eq!(session.history().len(), 2);

    session.clear_answer();
    assert!(session.last_outcome().is_none());
    assert_eq!(session.history().len(), 2);

    session.reset();
    assert!(session.question().is_none());
    assert!(session.history().is_empty());

    // The index survives a reset.
    let outcome = pipeline.ask(&mut session, "banana?").await;
    assert!(matches!(outcome, QueryOutcome::Answered(_)));
}
