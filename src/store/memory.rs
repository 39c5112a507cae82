//! In-memory [`VectorStore`] implementation.
//!
//! Collections live in a `HashMap` behind `std::sync::RwLock`. Search is
//! brute-force cosine similarity over one collection, which is plenty for
//! the few hundred pages of a single uploaded PDF.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, ScoredChunk};

use super::VectorStore;

struct StoredVector {
    chunk: Chunk,
    vector: Vec<f32>,
}

/// Process-local vector store.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Vec<StoredVector>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Number of live collections.
    pub fn collection_count(&self) -> usize {
        self.collections.read().map(|c| c.len()).unwrap_or(0)
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow::anyhow!("vector store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn insert_chunks(
        &self,
        collection: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        if chunks.len() != vectors.len() {
            bail!(
                "chunk/vector count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }
        if let Some(first) = vectors.first() {
            if vectors.iter().any(|v| v.len() != first.len()) {
                bail!("vectors in one collection must share a dimensionality");
            }
        }

        let stored: Vec<StoredVector> = chunks
            .iter()
            .zip(vectors.iter())
            .map(|(c, v)| StoredVector {
                chunk: c.clone(),
                vector: v.clone(),
            })
            .collect();

        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        collections.insert(collection.to_string(), stored);
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query_vec: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        let Some(stored) = collections.get(collection) else {
            bail!("collection not found: {}", collection);
        };

        let mut hits: Vec<ScoredChunk> = stored
            .iter()
            .map(|sv| ScoredChunk {
                chunk: sv.chunk.clone(),
                score: cosine_similarity(query_vec, &sv.vector),
            })
            .collect();

        // Ties keep document order, so earlier pages win.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn drop_collection(&self, collection: &str) -> Result<bool> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        Ok(collections.remove(collection).is_some())
    }

    async fn collection_len(&self, collection: &str) -> Result<usize> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        Ok(collections.get(collection).map(|c| c.len()).unwrap_or(0))
    }
}
