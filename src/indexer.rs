//! Document indexing.
//!
//! Turns a stored PDF into a [`DocumentIndex`]: extract pages → chunk →
//! embed → insert into a fresh per-document collection. The build is
//! all-or-nothing and bounded by a timeout; on any failure the collection is
//! dropped before the error is returned.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunk::chunk_pages;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::IndexError;
use crate::extract::PageExtractor;
use crate::models::ScoredChunk;
use crate::store::VectorStore;

/// A chunked, embedded, searchable view of one document.
///
/// Immutable once built. Dropping the handle does not free the backing
/// collection; call [`DocumentIndex::release`] for that.
pub struct DocumentIndex {
    collection: String,
    document_name: String,
    chunk_count: usize,
    page_count: usize,
    indexed_at: DateTime<Utc>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl std::fmt::Debug for DocumentIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentIndex")
            .field("collection", &self.collection)
            .field("document_name", &self.document_name)
            .field("chunk_count", &self.chunk_count)
            .field("page_count", &self.page_count)
            .field("indexed_at", &self.indexed_at)
            .finish()
    }
}

impl DocumentIndex {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn document_name(&self) -> &str {
        &self.document_name
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn indexed_at(&self) -> DateTime<Utc> {
        self.indexed_at
    }

    /// Similarity search for `query`, best match first.
    pub async fn search(&self, query: &str, k: usize) -> anyhow::Result<Vec<ScoredChunk>> {
        let query_vec = embed_query(self.embedder.as_ref(), query).await?;
        self.store.search(&self.collection, &query_vec, k).await
    }

    /// Drop the backing collection from the store.
    pub async fn release(&self) -> anyhow::Result<bool> {
        let removed = self.store.drop_collection(&self.collection).await?;
        debug!(collection = %self.collection, removed, "Released index");
        Ok(removed)
    }
}

/// Builds [`DocumentIndex`]es against shared backends.
#[derive(Clone)]
pub struct Indexer {
    extractor: Arc<dyn PageExtractor>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    max_tokens: usize,
    batch_size: usize,
    timeout: Duration,
}

impl Indexer {
    pub fn new(
        extractor: Arc<dyn PageExtractor>,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            extractor,
            embedder,
            store,
            max_tokens: 1000,
            batch_size: 64,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Index the PDF at `path` under a new collection for `document_name`.
    pub async fn build_index(
        &self,
        path: &Path,
        document_name: &str,
    ) -> Result<DocumentIndex, IndexError> {
        let collection = collection_id(document_name);
        let started = Instant::now();

        let result = match tokio::time::timeout(
            self.timeout,
            self.build_inner(path, document_name, &collection),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(IndexError::Timeout(self.timeout)),
        };

        match result {
            Ok(index) => {
                info!(
                    document = %document_name,
                    collection = %collection,
                    pages = index.page_count,
                    chunks = index.chunk_count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Indexed document"
                );
                Ok(index)
            }
            Err(e) => {
                warn!(document = %document_name, "Indexing failed: {}", e);
                if let Err(drop_err) = self.store.drop_collection(&collection).await {
                    warn!("Failed to clean up collection {}: {}", collection, drop_err);
                }
                Err(e)
            }
        }
    }

    async fn build_inner(
        &self,
        path: &Path,
        document_name: &str,
        collection: &str,
    ) -> Result<DocumentIndex, IndexError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| IndexError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let extractor = self.extractor.clone();
        let pages = tokio::task::spawn_blocking(move || extractor.extract_pages(&bytes))
            .await
            .map_err(|e| IndexError::Parse(format!("extraction task failed: {}", e)))?
            .map_err(|e| IndexError::Parse(e.to_string()))?;
        debug!("Extracted {} pages from {}", pages.len(), path.display());

        let chunks = chunk_pages(collection, &pages, self.max_tokens);
        if chunks.is_empty() {
            return Err(IndexError::NoText);
        }

        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = self
                .embedder
                .embed(&texts)
                .await
                .map_err(|e| IndexError::Embedding(format!("{:#}", e)))?;
            if embedded.len() != texts.len() {
                return Err(IndexError::Embedding(format!(
                    "expected {} vectors, got {}",
                    texts.len(),
                    embedded.len()
                )));
            }
            vectors.extend(embedded);
        }

        self.store
            .insert_chunks(collection, &chunks, &vectors)
            .await
            .map_err(|e| IndexError::Store(format!("{:#}", e)))?;

        Ok(DocumentIndex {
            collection: collection.to_string(),
            document_name: document_name.to_string(),
            chunk_count: chunks.len(),
            page_count: pages.len(),
            indexed_at: Utc::now(),
            store: self.store.clone(),
            embedder: self.embedder.clone(),
        })
    }
}

/// Per-document collection id: a readable slug of the name plus a uuid.
pub fn collection_id(document_name: &str) -> String {
    let slug: String = document_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "document" } else { slug };
    let slug: String = slug.chars().take(48).collect();
    format!("{}-{}", slug, Uuid::new_v4().simple())
}
