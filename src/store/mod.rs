//! Vector storage abstraction.
//!
//! The [`VectorStore`] trait partitions indexed chunks by collection
//! identifier. Every indexed document gets its own collection, so a search
//! only ever sees chunks from the document it was issued against.
//!
//! Implementations must be `Send + Sync` to be shared across sessions.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, ScoredChunk};

/// Abstract nearest-neighbour index.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_chunks`](VectorStore::insert_chunks) | Create a collection from chunks + vectors |
/// | [`search`](VectorStore::search) | Top-k cosine search within one collection |
/// | [`drop_collection`](VectorStore::drop_collection) | Release a collection |
/// | [`collection_len`](VectorStore::collection_len) | Number of chunks in a collection |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Store `chunks` with their `vectors` (same length, same order) under
    /// `collection`, replacing anything previously stored there.
    async fn insert_chunks(
        &self,
        collection: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()>;

    /// Return up to `k` chunks of `collection`, best match first.
    async fn search(&self, collection: &str, query_vec: &[f32], k: usize)
        -> Result<Vec<ScoredChunk>>;

    /// Remove a collection. Returns whether it existed.
    async fn drop_collection(&self, collection: &str) -> Result<bool>;

    /// Number of chunks stored in `collection` (0 if absent).
    async fn collection_len(&self, collection: &str) -> Result<usize>;
}
