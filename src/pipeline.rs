//! Session-scoped orchestration of upload → index → register → answer.
//!
//! [`Pipeline`] holds the shared backends. Every operation takes the caller's
//! [`SessionContext`] explicitly; there is no ambient session state.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{AskError, CapacityError, OnboardError};
use crate::extract::{PageExtractor, PdfPageExtractor};
use crate::indexer::Indexer;
use crate::llm::{CompletionBackend, OpenAiChat};
use crate::models::{Answer, UploadedDocument};
use crate::responder::{Responder, ResponderHandle, ResponderSettings};
use crate::session::SessionContext;
use crate::store::memory::InMemoryVectorStore;
use crate::store::VectorStore;
use crate::upload::Uploader;

/// Shared backends plus the settings every responder is built with.
#[derive(Clone)]
pub struct Pipeline {
    uploader: Uploader,
    indexer: Indexer,
    llm: Arc<dyn CompletionBackend>,
    settings: ResponderSettings,
}

/// What a successful onboarding produced.
#[derive(Debug, Clone)]
pub struct OnboardOutcome {
    pub name: String,
    pub path: PathBuf,
    pub pages: usize,
    pub chunks: usize,
    /// `true` when an existing document of the same name was replaced.
    pub replaced: bool,
}

impl Pipeline {
    pub fn new(
        uploader: Uploader,
        indexer: Indexer,
        llm: Arc<dyn CompletionBackend>,
        settings: ResponderSettings,
    ) -> Self {
        Self {
            uploader,
            indexer,
            llm,
            settings,
        }
    }

    /// Build the production pipeline described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config.embedding)?);
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let extractor: Arc<dyn PageExtractor> = Arc::new(PdfPageExtractor);
        let llm: Arc<dyn CompletionBackend> = Arc::new(OpenAiChat::new(&config.llm)?);

        let uploader = Uploader::new(&config.uploads.directory)
            .with_max_bytes(config.uploads.max_upload_bytes);
        let indexer = Indexer::new(extractor, embedder, store)
            .with_max_tokens(config.chunking.max_tokens)
            .with_batch_size(config.embedding.batch_size)
            .with_timeout(config.indexing.timeout());
        let settings = ResponderSettings {
            top_k: config.retrieval.top_k,
            temperature: config.llm.temperature,
            timeout: config.llm.timeout(),
            max_context_chars: config.llm.max_context_chars,
        };

        Ok(Self::new(uploader, indexer, llm, settings))
    }

    pub fn settings(&self) -> &ResponderSettings {
        &self.settings
    }

    /// Replace the responder settings (e.g. a CLI `--top-k` override).
    pub fn with_settings(mut self, settings: ResponderSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Save, index, and register `doc` in `ctx`. The new document becomes active.
    ///
    /// Nothing is registered unless every step succeeds. A new name on a full
    /// session is refused before the file is written.
    pub async fn onboard(
        &self,
        ctx: &mut SessionContext,
        doc: UploadedDocument,
    ) -> Result<OnboardOutcome, OnboardError> {
        debug!(session = %ctx.id, document = %doc.name, bytes = doc.size(), "Onboarding document");
        if !ctx.registry.can_register(&doc.name) {
            warn!(session = %ctx.id, document = %doc.name, "Session full, upload refused");
            return Err(CapacityError {
                name: doc.name.clone(),
                max: ctx.registry.capacity(),
            }
            .into());
        }

        let path = self.uploader.save(&doc).await?;
        let index = self.indexer.build_index(&path, &doc.name).await?;
        let (pages, chunks) = (index.page_count(), index.chunk_count());

        let handle: ResponderHandle = Arc::new(Responder::new(
            Arc::new(index),
            self.llm.clone(),
            self.settings.clone(),
        ));

        let previous = match ctx.registry.register(&doc.name, handle.clone()) {
            Ok(previous) => previous,
            Err(e) => {
                release(&handle).await;
                return Err(e.into());
            }
        };
        let replaced = previous.is_some();
        if let Some(previous) = previous {
            release(&previous).await;
        }
        ctx.registry.select(&doc.name);

        info!(
            session = %ctx.id,
            document = %doc.name,
            pages,
            chunks,
            replaced,
            "Document ready"
        );

        Ok(OnboardOutcome {
            name: doc.name,
            path,
            pages,
            chunks,
            replaced,
        })
    }

    /// Answer `prompt` against `document`, or the active document when `None`.
    pub async fn ask(
        &self,
        ctx: &mut SessionContext,
        prompt: &str,
        document: Option<&str>,
    ) -> Result<(String, Answer), AskError> {
        let (name, handle) = match document {
            Some(name) => {
                let handle = ctx
                    .registry
                    .select(name)
                    .ok_or_else(|| AskError::UnknownDocument(name.to_string()))?;
                (name.to_string(), handle)
            }
            None => {
                let (name, handle) = ctx.registry.active().ok_or(AskError::NoDocument)?;
                (name.to_string(), handle)
            }
        };

        let answer = handle.answer(prompt).await?;
        Ok((name, answer))
    }

    /// Remove `name` from the session and release its index.
    pub async fn evict(&self, ctx: &mut SessionContext, name: &str) -> bool {
        match ctx.registry.remove(name) {
            Some(handle) => {
                release(&handle).await;
                info!(session = %ctx.id, document = %name, "Evicted document");
                true
            }
            None => false,
        }
    }

    /// Release every index held by `ctx` and empty its registry.
    pub async fn close(&self, ctx: &mut SessionContext) {
        for handle in ctx.registry.drain() {
            release(&handle).await;
        }
    }
}

async fn release(handle: &ResponderHandle) {
    if let Err(e) = handle.index().release().await {
        warn!(
            collection = %handle.index().collection(),
            "Failed to release index: {:#}",
            e
        );
    }
}
