//! Retrieval-augmented responder.
//!
//! A [`Responder`] binds one [`DocumentIndex`] to a completion backend. For
//! each prompt it retrieves the top-k passages, asks the model to answer from
//! them, and returns the answer together with the best passage for citation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ResponderError;
use crate::indexer::DocumentIndex;
use crate::llm::{CompletionBackend, CompletionRequest, LlmError};
use crate::models::{Answer, ScoredChunk};

const SYSTEM_PROMPT: &str = "You answer questions about a single PDF document. \
Use only the numbered passages provided. If the passages do not contain the answer, \
say that the document does not say. Cite page numbers when you use a passage.";

/// Per-responder knobs, taken from `[retrieval]` and `[llm]`.
#[derive(Debug, Clone)]
pub struct ResponderSettings {
    pub top_k: usize,
    pub temperature: f32,
    pub timeout: Duration,
    pub max_context_chars: usize,
}

impl Default for ResponderSettings {
    fn default() -> Self {
        Self {
            top_k: 1,
            temperature: 0.1,
            timeout: Duration::from_secs(60),
            max_context_chars: 12_000,
        }
    }
}

/// Shared handle stored in the session registry.
pub type ResponderHandle = Arc<Responder>;

pub struct Responder {
    index: Arc<DocumentIndex>,
    llm: Arc<dyn CompletionBackend>,
    settings: ResponderSettings,
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("index", &self.index)
            .field("model", &self.llm.model_name())
            .field("settings", &self.settings)
            .finish()
    }
}

impl Responder {
    pub fn new(
        index: Arc<DocumentIndex>,
        llm: Arc<dyn CompletionBackend>,
        settings: ResponderSettings,
    ) -> Self {
        Self {
            index,
            llm,
            settings,
        }
    }

    pub fn index(&self) -> &Arc<DocumentIndex> {
        &self.index
    }

    /// Answer `prompt` from the bound document.
    ///
    /// An empty prompt is rejected before any backend is contacted.
    pub async fn answer(&self, prompt: &str) -> Result<Answer, ResponderError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ResponderError::EmptyPrompt);
        }

        let hits = self
            .index
            .search(prompt, self.settings.top_k.max(1))
            .await
            .map_err(|e| ResponderError::Retrieval(format!("{:#}", e)))?;
        debug!(
            document = %self.index.document_name(),
            hits = hits.len(),
            "Retrieved context"
        );

        let request = CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: prompt.to_string(),
            context: format_context(&hits, self.settings.max_context_chars),
            temperature: self.settings.temperature,
        };

        let text = match tokio::time::timeout(self.settings.timeout, self.llm.complete(&request))
            .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(document = %self.index.document_name(), "Completion failed: {}", e);
                return Err(map_llm_error(e, self.settings.timeout));
            }
            Err(_) => {
                warn!(document = %self.index.document_name(), "Completion timed out");
                return Err(ResponderError::Timeout(self.settings.timeout));
            }
        };

        let best = hits.first();
        Ok(Answer {
            text: text.trim().to_string(),
            cited_chunk: best.map(|h| h.chunk.text.clone()).unwrap_or_default(),
            cited_page: best.map(|h| h.chunk.page_number),
            score: best.map(|h| h.score),
        })
    }
}

/// HTTP client timeouts surface the same way as the overall completion timeout.
fn map_llm_error(e: LlmError, timeout: Duration) -> ResponderError {
    match e {
        LlmError::Http(ref inner) if inner.is_timeout() => ResponderError::Timeout(timeout),
        other => ResponderError::Backend(other.to_string()),
    }
}

/// Number the passages, tag them with their page, and cap the total size.
fn format_context(hits: &[ScoredChunk], max_chars: usize) -> Vec<String> {
    let mut out = Vec::with_capacity(hits.len());
    let mut used = 0usize;
    for (i, hit) in hits.iter().enumerate() {
        let remaining = max_chars.saturating_sub(used);
        if remaining == 0 {
            break;
        }
        let body: String = hit.chunk.text.chars().take(remaining).collect();
        used += body.chars().count();
        out.push(format!("[{}] (page {}) {}", i + 1, hit.chunk.page_number, body));
    }
    out
}
