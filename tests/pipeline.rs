//! End-to-end pipeline tests against the library: real PDF extraction,
//! the hashing embedder, the in-memory store, and scripted language models.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use paperparrot::embedding::{EmbeddingProvider, HashingProvider};
use paperparrot::error::{AskError, IndexError, OnboardError, ResponderError};
use paperparrot::extract::PdfPageExtractor;
use paperparrot::indexer::Indexer;
use paperparrot::llm::{CompletionBackend, CompletionRequest, LlmError};
use paperparrot::models::UploadedDocument;
use paperparrot::pipeline::Pipeline;
use paperparrot::responder::ResponderSettings;
use paperparrot::session::SessionContext;
use paperparrot::store::memory::InMemoryVectorStore;
use paperparrot::upload::Uploader;

mod common;
use common::pdf_with_pages;

/// Echoes the first context passage and counts calls.
struct EchoLlm {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl CompletionBackend for EchoLlm {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "From the document: {}",
            request.context.first().cloned().unwrap_or_default()
        ))
    }
}

struct FailingLlm;

#[async_trait]
impl CompletionBackend for FailingLlm {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
        Err(LlmError::Api {
            status: 429,
            message: "quota exceeded".to_string(),
        })
    }
}

struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }
    fn dims(&self) -> usize {
        8
    }
    async fn embed(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        anyhow::bail!("embedding service unavailable")
    }
}

/// Hashing embedder that counts `embed` calls.
struct CountingEmbedder {
    inner: HashingProvider,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(texts).await
    }
}

struct Harness {
    _tmp: TempDir,
    uploads: std::path::PathBuf,
    store: Arc<InMemoryVectorStore>,
    calls: Arc<AtomicUsize>,
    pipeline: Pipeline,
}

fn harness_with(
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Option<Arc<dyn CompletionBackend>>,
) -> Harness {
    let tmp = TempDir::new().unwrap();
    let uploads = tmp.path().join("uploads");
    let store = Arc::new(InMemoryVectorStore::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let llm: Arc<dyn CompletionBackend> = match llm {
        Some(llm) => llm,
        None => Arc::new(EchoLlm {
            calls: calls.clone(),
        }),
    };

    let indexer = Indexer::new(Arc::new(PdfPageExtractor), embedder, store.clone());
    let pipeline = Pipeline::new(
        Uploader::new(&uploads),
        indexer,
        llm,
        ResponderSettings::default(),
    );

    Harness {
        _tmp: tmp,
        uploads,
        store,
        calls,
        pipeline,
    }
}

fn harness() -> Harness {
    harness_with(Arc::new(HashingProvider::new(256)), None)
}

fn doc(name: &str, pages: &[&str]) -> UploadedDocument {
    UploadedDocument::new(name, pdf_with_pages(pages))
}

#[tokio::test]
async fn test_upload_indexes_and_activates_document() {
    let h = harness();
    let mut ctx = SessionContext::new("s1", 10);

    let outcome = h
        .pipeline
        .onboard(&mut ctx, doc("report.pdf", &["Net income was four billion"]))
        .await
        .unwrap();

    assert_eq!(outcome.name, "report.pdf");
    assert_eq!(outcome.pages, 1);
    assert!(outcome.chunks >= 1);
    assert!(!outcome.replaced);
    assert_eq!(outcome.path, h.uploads.join("report.pdf"));
    assert!(outcome.path.exists());
    assert_eq!(ctx.registry.active_name(), Some("report.pdf"));
    assert_eq!(h.store.collection_count(), 1);
}

#[tokio::test]
async fn test_reupload_same_name_replaces_file_and_entry() {
    let h = harness();
    let mut ctx = SessionContext::new("s1", 10);

    let first = doc("report.pdf", &["Revenue grew in the first quarter"]);
    let second = doc("report.pdf", &["Headcount fell in the second quarter"]);
    let second_bytes = second.bytes.clone();

    h.pipeline.onboard(&mut ctx, first).await.unwrap();
    let outcome = h.pipeline.onboard(&mut ctx, second).await.unwrap();

    assert!(outcome.replaced);
    assert_eq!(ctx.registry.len(), 1);
    assert_eq!(ctx.registry.names(), vec!["report.pdf".to_string()]);
    assert_eq!(
        std::fs::read(h.uploads.join("report.pdf")).unwrap(),
        second_bytes
    );
    // The displaced index is released.
    assert_eq!(h.store.collection_count(), 1);

    let (_, answer) = h
        .pipeline
        .ask(&mut ctx, "What happened to headcount?", None)
        .await
        .unwrap();
    assert!(answer.cited_chunk.contains("Headcount"));
}

#[tokio::test]
async fn test_capacity_refuses_new_name_before_writing() {
    let h = harness();
    let mut ctx = SessionContext::new("s1", 2);

    h.pipeline
        .onboard(&mut ctx, doc("a.pdf", &["alpha"]))
        .await
        .unwrap();
    h.pipeline
        .onboard(&mut ctx, doc("b.pdf", &["bravo"]))
        .await
        .unwrap();

    let err = h
        .pipeline
        .onboard(&mut ctx, doc("c.pdf", &["charlie"]))
        .await
        .unwrap_err();
    assert!(matches!(err, OnboardError::Capacity(_)), "got {:?}", err);
    assert!(!h.uploads.join("c.pdf").exists());
    assert_eq!(ctx.registry.len(), 2);
    assert_eq!(ctx.registry.active_name(), Some("b.pdf"));

    // Replacing an existing name is allowed at capacity.
    h.pipeline
        .onboard(&mut ctx, doc("a.pdf", &["alpha again"]))
        .await
        .unwrap();
    assert_eq!(ctx.registry.len(), 2);
}

#[tokio::test]
async fn test_evict_frees_slot_and_releases_index() {
    let h = harness();
    let mut ctx = SessionContext::new("s1", 1);

    h.pipeline
        .onboard(&mut ctx, doc("a.pdf", &["alpha"]))
        .await
        .unwrap();
    assert!(h.pipeline.evict(&mut ctx, "a.pdf").await);
    assert!(!h.pipeline.evict(&mut ctx, "a.pdf").await);
    assert!(ctx.registry.is_empty());
    assert_eq!(h.store.collection_count(), 0);

    h.pipeline
        .onboard(&mut ctx, doc("b.pdf", &["bravo"]))
        .await
        .unwrap();
    assert_eq!(ctx.registry.active_name(), Some("b.pdf"));
}

#[tokio::test]
async fn test_empty_prompt_never_reaches_backend() {
    let embed_calls = Arc::new(AtomicUsize::new(0));
    let h = harness_with(
        Arc::new(CountingEmbedder {
            inner: HashingProvider::new(256),
            calls: embed_calls.clone(),
        }),
        None,
    );
    let mut ctx = SessionContext::new("s1", 10);
    h.pipeline
        .onboard(&mut ctx, doc("report.pdf", &["Net income was four billion"]))
        .await
        .unwrap();
    let after_indexing = embed_calls.load(Ordering::SeqCst);
    assert!(after_indexing >= 1);

    for prompt in ["", "   ", "\n\t"] {
        let err = h.pipeline.ask(&mut ctx, prompt, None).await.unwrap_err();
        assert!(
            matches!(err, AskError::Responder(ResponderError::EmptyPrompt)),
            "got {:?}",
            err
        );
    }
    assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    assert_eq!(embed_calls.load(Ordering::SeqCst), after_indexing);
}

#[tokio::test]
async fn test_answer_cites_matching_page() {
    let h = harness();
    let mut ctx = SessionContext::new("s1", 10);
    h.pipeline
        .onboard(
            &mut ctx,
            doc(
                "annual.pdf",
                &[
                    "Net income for the year was four billion dollars",
                    "The board met twelve times to discuss governance",
                ],
            ),
        )
        .await
        .unwrap();

    let (document, answer) = h
        .pipeline
        .ask(&mut ctx, "What was the net income for the year?", None)
        .await
        .unwrap();

    assert_eq!(document, "annual.pdf");
    assert_eq!(answer.cited_page, Some(1));
    assert!(answer.cited_chunk.contains("income"));
    assert!(answer.text.starts_with("From the document:"));
    assert!(answer.score.unwrap() > 0.0);
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);

    let (_, answer) = h
        .pipeline
        .ask(&mut ctx, "How many times did the board meet?", None)
        .await
        .unwrap();
    assert_eq!(answer.cited_page, Some(2));
}

#[tokio::test]
async fn test_questions_target_selected_document() {
    let h = harness();
    let mut ctx = SessionContext::new("s1", 10);
    h.pipeline
        .onboard(&mut ctx, doc("cats.pdf", &["Cats sleep most of the day"]))
        .await
        .unwrap();
    h.pipeline
        .onboard(&mut ctx, doc("dogs.pdf", &["Dogs need daily walks"]))
        .await
        .unwrap();
    assert_eq!(ctx.registry.active_name(), Some("dogs.pdf"));

    let (document, answer) = h
        .pipeline
        .ask(&mut ctx, "How long do cats sleep?", Some("cats.pdf"))
        .await
        .unwrap();
    assert_eq!(document, "cats.pdf");
    assert!(answer.cited_chunk.contains("Cats"));
    assert_eq!(ctx.registry.active_name(), Some("cats.pdf"));

    let err = h
        .pipeline
        .ask(&mut ctx, "Anything?", Some("birds.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(err, AskError::UnknownDocument(ref n) if n == "birds.pdf"));
}

#[tokio::test]
async fn test_ask_without_documents() {
    let h = harness();
    let mut ctx = SessionContext::new("s1", 10);
    let err = h
        .pipeline
        .ask(&mut ctx, "What is this?", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AskError::NoDocument));
}

#[tokio::test]
async fn test_embedding_failure_registers_nothing() {
    let h = harness_with(Arc::new(FailingEmbedder), None);
    let mut ctx = SessionContext::new("s1", 10);

    let err = h
        .pipeline
        .onboard(&mut ctx, doc("report.pdf", &["Net income was four billion"]))
        .await
        .unwrap_err();

    assert!(
        matches!(err, OnboardError::Index(IndexError::Embedding(_))),
        "got {:?}",
        err
    );
    assert!(ctx.registry.is_empty());
    assert_eq!(h.store.collection_count(), 0);
}

#[tokio::test]
async fn test_non_pdf_upload_is_rejected() {
    let h = harness();
    let mut ctx = SessionContext::new("s1", 10);

    let err = h
        .pipeline
        .onboard(
            &mut ctx,
            UploadedDocument::new("notes.pdf", b"just some text".to_vec()),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, OnboardError::Index(_)), "got {:?}", err);
    assert!(ctx.registry.is_empty());
}

#[tokio::test]
async fn test_backend_failure_keeps_session_usable() {
    let h = harness_with(
        Arc::new(HashingProvider::new(256)),
        Some(Arc::new(FailingLlm)),
    );
    let mut ctx = SessionContext::new("s1", 10);
    h.pipeline
        .onboard(&mut ctx, doc("report.pdf", &["Net income was four billion"]))
        .await
        .unwrap();

    for _ in 0..2 {
        let err = h
            .pipeline
            .ask(&mut ctx, "What was net income?", None)
            .await
            .unwrap_err();
        assert!(
            matches!(err, AskError::Responder(ResponderError::Backend(_))),
            "got {:?}",
            err
        );
    }
    assert_eq!(ctx.registry.active_name(), Some("report.pdf"));
}

#[tokio::test]
async fn test_close_releases_every_index() {
    let h = harness();
    let mut ctx = SessionContext::new("s1", 10);
    h.pipeline
        .onboard(&mut ctx, doc("a.pdf", &["alpha"]))
        .await
        .unwrap();
    h.pipeline
        .onboard(&mut ctx, doc("b.pdf", &["bravo"]))
        .await
        .unwrap();
    assert_eq!(h.store.collection_count(), 2);

    h.pipeline.close(&mut ctx).await;
    assert!(ctx.registry.is_empty());
    assert_eq!(h.store.collection_count(), 0);
}
