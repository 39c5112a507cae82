//! Configuration loading.
//!
//! Settings come from an optional TOML file. Every section has defaults, so
//! an empty file (or no file at all) is a valid configuration. Environment
//! variables are applied on top of the file:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `OPENAI_API_KEY` | `llm.api_key`, `embedding.api_key` |
//! | `UPLOAD_DIRECTORY` | `uploads.directory` |
//! | `PAPERPARROT_ACCESS_TOKEN` | `server.access_token` |
//! | `PAPERPARROT_MAX_DOCUMENTS` | `session.max_documents` |
//! | `PAPERPARROT_BIND` | `server.bind` |

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_UPLOAD_DIRECTORY: &str = "UPLOAD_DIRECTORY";
pub const ENV_ACCESS_TOKEN: &str = "PAPERPARROT_ACCESS_TOKEN";
pub const ENV_MAX_DOCUMENTS: &str = "PAPERPARROT_MAX_DOCUMENTS";
pub const ENV_BIND: &str = "PAPERPARROT_BIND";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub uploads: UploadConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Shared token required before any upload is accepted. `None` leaves the app open.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            access_token: None,
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8501".to_string()
}
fn default_session_idle_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_upload_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            directory: default_upload_directory(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_upload_directory() -> PathBuf {
    PathBuf::from("uploads")
}
fn default_max_upload_bytes() -> usize {
    32 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_documents: default_max_documents(),
        }
    }
}

fn default_max_documents() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Upper bound for a single chunk. Pages longer than this are split.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            base_url: default_openai_base_url(),
            api_key: None,
            batch_size: default_batch_size(),
            max_retries: 0,
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    /// Model name, falling back to the provider's default.
    pub fn model_or_default(&self) -> String {
        match (&self.model, self.provider.as_str()) {
            (Some(m), _) => m.clone(),
            (None, "hashing") => "hashing-bow".to_string(),
            (None, _) => "text-embedding-3-small".to_string(),
        }
    }

    /// Vector width, falling back to the provider's default.
    pub fn dims_or_default(&self) -> usize {
        match (self.dims, self.provider.as_str()) {
            (Some(d), _) => d,
            (None, "hashing") => 256,
            (None, _) => 1536,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_indexing_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_indexing_timeout_secs(),
        }
    }
}

fn default_indexing_timeout_secs() -> u64 {
    120
}

impl IndexingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// Retrieved context is truncated to this many characters before the call.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            temperature: default_temperature(),
            base_url: default_openai_base_url(),
            api_key: None,
            timeout_secs: default_llm_timeout_secs(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_max_context_chars() -> usize {
    12_000
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Load configuration from `path` (if given), apply environment overrides, and validate.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            parse_config(&content)?
        }
        None => Config::default(),
    };

    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Parse a TOML document into a [`Config`] without touching the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

impl Config {
    /// Apply environment overrides. `lookup` is injected so tests never touch
    /// the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_API_KEY).filter(|k| !k.is_empty()) {
            self.llm.api_key.get_or_insert_with(|| key.clone());
            self.embedding.api_key.get_or_insert(key);
        }
        if let Some(dir) = lookup(ENV_UPLOAD_DIRECTORY).filter(|d| !d.is_empty()) {
            self.uploads.directory = PathBuf::from(dir);
        }
        if let Some(token) = lookup(ENV_ACCESS_TOKEN).filter(|t| !t.is_empty()) {
            self.server.access_token = Some(token);
        }
        if let Some(max) = lookup(ENV_MAX_DOCUMENTS).filter(|m| !m.is_empty()) {
            self.session.max_documents = max
                .trim()
                .parse()
                .with_context(|| format!("{} must be a positive integer", ENV_MAX_DOCUMENTS))?;
        }
        if let Some(bind) = lookup(ENV_BIND).filter(|b| !b.is_empty()) {
            self.server.bind = bind;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.session.max_documents == 0 {
            anyhow::bail!("session.max_documents must be >= 1");
        }

        if self.chunking.max_tokens == 0 {
            anyhow::bail!("chunking.max_tokens must be > 0");
        }

        if self.retrieval.top_k == 0 {
            anyhow::bail!("retrieval.top_k must be >= 1");
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
        }

        if self.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }

        if self.embedding.dims == Some(0) {
            anyhow::bail!("embedding.dims must be > 0");
        }

        if self.uploads.max_upload_bytes == 0 {
            anyhow::bail!("uploads.max_upload_bytes must be > 0");
        }

        match self.embedding.provider.as_str() {
            "openai" | "hashing" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be openai or hashing.",
                other
            ),
        }

        Ok(())
    }
}
