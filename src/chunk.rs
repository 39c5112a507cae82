//! Page-based text chunker.
//!
//! Each non-empty page becomes one chunk. Pages longer than the configured
//! `max_tokens` budget are split on paragraph boundaries (`\n\n`), falling
//! back to line/space boundaries for oversized paragraphs.
//!
//! Every chunk carries a SHA-256 hash of its text and a contiguous
//! `chunk_index` starting at 0 across the whole document.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Chunk, Page};

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Chunk a document's pages for indexing under `collection`.
///
/// Blank pages are dropped. Returns an empty vector when no page has text.
pub fn chunk_pages(collection: &str, pages: &[Page], max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut chunks = Vec::new();
    let mut chunk_index: i64 = 0;

    for page in pages {
        let text = page.text.trim();
        if text.is_empty() {
            continue;
        }
        for piece in split_text(text, max_chars) {
            chunks.push(make_chunk(collection, page.number, chunk_index, &piece));
            chunk_index += 1;
        }
    }

    chunks
}

/// Split text into pieces of at most `max_chars`, preferring paragraph boundaries.
fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    if text.len() <= max_chars {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
        }

        if trimmed.len() > max_chars {
            hard_split(trimmed, max_chars, &mut pieces);
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }

    pieces
}

/// Cut an oversized paragraph at newline or space boundaries.
fn hard_split(text: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut remaining = text;
    while !remaining.is_empty() {
        let mut split_at = remaining.len().min(max_chars);
        while !remaining.is_char_boundary(split_at) {
            split_at -= 1;
        }
        if split_at == 0 {
            // A single char wider than max_chars; take it whole.
            split_at = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
        }
        let actual_split = if split_at < remaining.len() {
            remaining[..split_at]
                .rfind('\n')
                .or_else(|| remaining[..split_at].rfind(' '))
                .filter(|&pos| pos > 0)
                .map(|pos| pos + 1)
                .unwrap_or(split_at)
        } else {
            split_at
        };
        let piece = remaining[..actual_split].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = &remaining[actual_split..];
    }
}

fn make_chunk(collection: &str, page_number: u32, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        collection: collection.to_string(),
        page_number,
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
