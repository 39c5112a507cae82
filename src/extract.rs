//! Page-level text extraction.
//!
//! The indexer only needs `bytes -> pages`; the [`PageExtractor`] trait keeps
//! the PDF engine swappable. [`PdfPageExtractor`] is backed by `pdf-extract`.

use std::fmt;

use crate::models::Page;

pub const MIME_PDF: &str = "application/pdf";

/// Extraction error. Never panics across this boundary; callers treat any
/// error as "document could not be parsed".
#[derive(Debug)]
pub enum ExtractError {
    NotPdf,
    Pdf(String),
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractError::NotPdf => write!(f, "content is not a PDF"),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Splits a document into per-page text.
///
/// Called from a blocking thread, so implementations may do CPU-heavy work.
pub trait PageExtractor: Send + Sync {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<Page>, ExtractError>;
}

/// `pdf-extract` backed extractor.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfPageExtractor;

impl PageExtractor for PdfPageExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<Page>, ExtractError> {
        if !looks_like_pdf(bytes) {
            return Err(ExtractError::NotPdf);
        }
        // pdf-extract panics on some malformed inputs instead of returning an error.
        let texts = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
            .map_err(|_| ExtractError::Pdf("parser panicked on malformed input".to_string()))?
            .map_err(|e| ExtractError::Pdf(e.to_string()))?;
        Ok(texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| Page {
                number: i as u32 + 1,
                text,
            })
            .collect())
    }
}

/// PDF files start with `%PDF-`, possibly after a little leading junk.
pub fn looks_like_pdf(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(1024)];
    head.windows(5).any(|w| w == b"%PDF-")
}

/// Whether an upload should be accepted as a PDF, by declared type or extension.
pub fn is_pdf_upload(file_name: &str, content_type: Option<&str>) -> bool {
    let by_type = content_type
        .map(|ct| ct.split(';').next().unwrap_or("").trim().eq_ignore_ascii_case(MIME_PDF))
        .unwrap_or(false);
    let by_ext = std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    by_type || by_ext
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_pdf_bytes_rejected_before_parsing() {
        let err = PdfPageExtractor.extract_pages(b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::NotPdf));
    }

    #[test]
    fn truncated_pdf_returns_error() {
        let err = PdfPageExtractor
            .extract_pages(b"%PDF-1.4\n1 0 obj garbage")
            .unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn pdf_detection() {
        assert!(looks_like_pdf(b"%PDF-1.7\n..."));
        assert!(!looks_like_pdf(b"PK\x03\x04"));
        assert!(!looks_like_pdf(b""));
    }

    #[test]
    fn pdf_upload_by_type_or_extension() {
        assert!(is_pdf_upload("report.PDF", None));
        assert!(is_pdf_upload("blob", Some("application/pdf")));
        assert!(is_pdf_upload("blob", Some("application/pdf; charset=binary")));
        assert!(!is_pdf_upload("notes.txt", Some("text/plain")));
    }
}
