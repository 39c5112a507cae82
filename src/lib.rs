//! # PaperParrot
//!
//! Chat with your PDF. A user uploads a PDF, the document is split into
//! page passages and embedded into its own vector collection, and questions
//! are answered by a language model from the best-matching passages. The
//! passage behind each answer is returned for citation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────────┐   ┌────────────┐
//! │ Uploader │──▶│ Indexer  │──▶│  Responder   │──▶│  Session   │
//! │  (disk)  │   │ pages +  │   │ retrieve +   │   │  Registry  │
//! └──────────┘   │ vectors  │   │ complete     │   └────────────┘
//!                └──────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`models`] | Core data types |
//! | [`error`] | Error types per stage |
//! | [`upload`] | Persisting uploaded files |
//! | [`extract`] | PDF page text extraction |
//! | [`chunk`] | Page-aware chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector store trait and in-memory backend |
//! | [`indexer`] | Building per-document indexes |
//! | [`llm`] | Completion backends |
//! | [`responder`] | Retrieval-augmented answering |
//! | [`session`] | Per-session document registry and session store |
//! | [`pipeline`] | Session-scoped orchestration |
//! | [`server`] | HTTP server and single-page UI |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod indexer;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod responder;
pub mod server;
pub mod session;
pub mod store;
pub mod upload;
