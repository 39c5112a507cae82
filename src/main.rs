//! # PaperParrot CLI (`paperparrot`)
//!
//! Chat with a PDF. The `serve` command starts the single-page web app; `ask`
//! runs one question against one PDF from the terminal.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `paperparrot serve` | Start the web app |
//! | `paperparrot ask <pdf> "<question>"` | Index a PDF and answer one question |
//! | `paperparrot check` | Print the effective configuration |
//!
//! ## Examples
//!
//! ```bash
//! OPENAI_API_KEY=sk-... paperparrot serve
//! paperparrot --config ./config/paperparrot.toml ask report.pdf "What was net income?"
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use paperparrot::config::{self, Config};
use paperparrot::models::UploadedDocument;
use paperparrot::pipeline::Pipeline;
use paperparrot::server;
use paperparrot::session::SessionContext;

/// PaperParrot: upload a PDF and ask questions about it.
///
/// Settings come from an optional TOML file, then environment variables
/// (`OPENAI_API_KEY`, `UPLOAD_DIRECTORY`, `PAPERPARROT_*`), which win.
#[derive(Parser)]
#[command(name = "paperparrot", version, about = "Chat with your PDF")]
struct Cli {
    /// Path to configuration file (TOML). Built-in defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging. `RUST_LOG` overrides this.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web app.
    Serve {
        /// Address to bind, overriding `[server] bind`.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Index one PDF and answer one question about it.
    Ask {
        /// PDF file to read.
        pdf: PathBuf,

        /// The question.
        question: String,

        /// Number of passages to retrieve, overriding `[retrieval] top_k`.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Validate and print the effective configuration.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let mut cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            server::run_server(&cfg).await?;
        }
        Commands::Ask {
            pdf,
            question,
            top_k,
        } => {
            run_ask(&cfg, &pdf, &question, top_k).await?;
        }
        Commands::Check => {
            print_config(&cfg);
        }
    }

    Ok(())
}

async fn run_ask(cfg: &Config, pdf: &Path, question: &str, top_k: Option<usize>) -> Result<()> {
    let mut pipeline = Pipeline::from_config(cfg)?;
    if let Some(k) = top_k {
        let mut settings = pipeline.settings().clone();
        settings.top_k = k;
        pipeline = pipeline.with_settings(settings);
    }

    let name = pdf
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .with_context(|| format!("Not a file path: {}", pdf.display()))?;
    let bytes = tokio::fs::read(pdf)
        .await
        .with_context(|| format!("Failed to read {}", pdf.display()))?;

    let mut ctx = SessionContext::new("cli", cfg.session.max_documents);
    let outcome = pipeline
        .onboard(&mut ctx, UploadedDocument::new(name, bytes))
        .await?;
    debug!(pages = outcome.pages, chunks = outcome.chunks, "Indexed");

    let result = pipeline.ask(&mut ctx, question, None).await;
    pipeline.close(&mut ctx).await;
    let (document, answer) = result?;

    println!("{}", answer.text);
    println!();
    match answer.cited_page {
        Some(page) => println!("Source: {} (page {})", document, page),
        None => println!("Source: {}", document),
    }
    if !answer.cited_chunk.is_empty() {
        println!("---");
        println!("{}", answer.cited_chunk);
    }
    Ok(())
}

fn print_config(cfg: &Config) {
    let redact = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };

    println!("[server]");
    println!("  bind             = {}", cfg.server.bind);
    println!("  access_token     = {}", redact(&cfg.server.access_token));
    println!("  session_idle     = {}s", cfg.server.session_idle_secs);
    println!("[uploads]");
    println!("  directory        = {}", cfg.uploads.directory.display());
    println!("  max_upload_bytes = {}", cfg.uploads.max_upload_bytes);
    println!("[session]");
    println!("  max_documents    = {}", cfg.session.max_documents);
    println!("[chunking]");
    println!("  max_tokens       = {}", cfg.chunking.max_tokens);
    println!("[embedding]");
    println!("  provider         = {}", cfg.embedding.provider);
    println!("  model            = {}", cfg.embedding.model_or_default());
    println!("  dims             = {}", cfg.embedding.dims_or_default());
    println!("  api_key          = {}", redact(&cfg.embedding.api_key));
    println!("  max_retries      = {}", cfg.embedding.max_retries);
    println!("[indexing]");
    println!("  timeout          = {}s", cfg.indexing.timeout_secs);
    println!("[retrieval]");
    println!("  top_k            = {}", cfg.retrieval.top_k);
    println!("[llm]");
    println!("  model            = {}", cfg.llm.model);
    println!("  base_url         = {}", cfg.llm.base_url);
    println!("  temperature      = {}", cfg.llm.temperature);
    println!("  api_key          = {}", redact(&cfg.llm.api_key));
}
