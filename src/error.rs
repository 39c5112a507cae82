//! Error kinds surfaced by the pipeline.
//!
//! Each stage has its own error type, and none of them ends the session:
//! an upload failure aborts that upload, an index failure aborts that
//! document's onboarding, and a responder failure is reported inline.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure to persist an uploaded file.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("file name must not be empty")]
    EmptyName,

    #[error("invalid file name: {0}")]
    InvalidName(String),

    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to turn a stored file into a searchable index.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse document: {0}")]
    Parse(String),

    #[error("document contains no extractable text")]
    NoText,

    #[error("embedding backend failed: {0}")]
    Embedding(String),

    #[error("vector store failed: {0}")]
    Store(String),

    #[error("indexing timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure to answer a prompt.
#[derive(Error, Debug)]
pub enum ResponderError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("similarity search failed: {0}")]
    Retrieval(String),

    #[error("language model request failed: {0}")]
    Backend(String),

    #[error("language model timed out after {0:?}")]
    Timeout(Duration),
}

/// Refusal to register a new document in a full session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot add '{name}': session already holds the maximum of {max} documents")]
pub struct CapacityError {
    pub name: String,
    pub max: usize,
}

/// Failure anywhere in upload → index → register.
#[derive(Error, Debug)]
pub enum OnboardError {
    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Capacity(#[from] CapacityError),
}

/// Failure to answer a question within a session.
#[derive(Error, Debug)]
pub enum AskError {
    #[error("no document has been uploaded yet")]
    NoDocument,

    #[error("document not found: {0}")]
    UnknownDocument(String),

    #[error(transparent)]
    Responder(#[from] ResponderError),
}
