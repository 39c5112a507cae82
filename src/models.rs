//! Core data models that flow through the upload → index → answer pipeline.

use serde::Serialize;

/// A user-submitted file, read once at the request boundary.
///
/// Holds the complete byte content so nothing downstream ever touches the
/// original upload stream again.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedDocument {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Text of one source page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// 1-based page number.
    pub number: u32,
    pub text: String,
}

/// A unit of extracted text submitted to the embedding index.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub collection: String,
    pub page_number: u32,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A chunk returned from similarity search.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity against the query, in `[-1.0, 1.0]`.
    pub score: f32,
}

/// The responder's reply to a prompt.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    /// Best-matching source passage; empty when the index returned nothing.
    pub cited_chunk: String,
    pub cited_page: Option<u32>,
    pub score: Option<f32>,
}
