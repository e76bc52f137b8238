//! Index a directory of extracted `.txt` reference documents and query it.
//!
//! Configuration comes from `config.toml` / `APP_RAG__*`; `OPENROUTER_API_KEY`
//! and `EMBEDDING_MODEL` are honoured as well.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use examgenie_core::chunker::load_documents;
use examgenie_core::config::{Config, RagConfig};
use examgenie_core::types::Document;
use examgenie_embed::EmbedderNotice;
use examgenie_rag::{IndexStatus, RetrievalService};

#[derive(Parser)]
#[command(name = "examgenie")]
#[command(about = "Reference-document retrieval for study guides", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or reuse the index for a context directory
    Index {
        /// Directory of extracted .txt documents
        #[arg(long)]
        context_dir: PathBuf,
        /// Rebuild even if the stored index is current
        #[arg(long)]
        rebuild_index: bool,
    },
    /// Retrieve passages for a topic
    Query {
        /// Topic to look up
        topic: String,
        /// Directory of extracted .txt documents
        #[arg(long)]
        context_dir: PathBuf,
        /// Number of passages (default: rag.top_k)
        #[arg(short)]
        k: Option<usize>,
        /// Print passages as prompt context instead of a ranked list
        #[arg(long)]
        context: bool,
    },
}

fn rag_config(config: &Config) -> anyhow::Result<RagConfig> {
    let mut rag = config.rag()?;
    if let Ok(model) = env::var("EMBEDDING_MODEL") {
        rag.apply_embedding_model(&model);
    }
    if rag.external.api_key.is_none() {
        rag.external.api_key = env::var("OPENROUTER_API_KEY").ok().filter(|k| !k.is_empty());
    }
    Ok(rag)
}

fn open_service(rag: &RagConfig, base: &Path, context_dir: &Path) -> anyhow::Result<(RetrievalService, Vec<Document>)> {
    let documents = load_documents(context_dir).with_context(|| format!("reading {}", context_dir.display()))?;
    if documents.is_empty() {
        warn!(dir = %context_dir.display(), "no .txt documents found");
    }
    let mut service = RetrievalService::from_config(rag, base)?;
    let notices = service.subscribe();
    std::thread::spawn(move || {
        for EmbedderNotice::FellBack { from, to, reason } in notices {
            eprintln!("⚠️  Embeddings switched from {} to {} ({})", from, to, reason);
        }
    });
    Ok((service, documents))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let mut rag = rag_config(&config)?;
    let base = env::current_dir()?;

    match cli.command {
        Commands::Index { context_dir, rebuild_index } => {
            rag.rebuild_index |= rebuild_index;
            let (mut service, documents) = open_service(&rag, &base, &context_dir)?;
            let status = service.ensure_index(&documents, false)?;
            let backend = service.active_backend_id()?;
            info!(%backend, "embedding backend");
            match status {
                IndexStatus::Reused { chunks } => println!("Index up to date ({} chunks)", chunks),
                IndexStatus::Rebuilt { chunks } => println!("Indexed {} documents into {} chunks", documents.len(), chunks),
            }
        }
        Commands::Query { topic, context_dir, k, context } => {
            let (mut service, documents) = open_service(&rag, &base, &context_dir)?;
            let status = service.ensure_index(&documents, false)?;
            info!(?status, "index ready");
            let k = k.unwrap_or(service.top_k());
            if context {
                println!("{}", service.retrieve_context(&topic, k)?);
            } else {
                let result = service.retrieve(&topic, k)?;
                if result.is_empty() {
                    println!("No passages found for \"{}\"", topic);
                }
                for (i, hit) in result.iter().enumerate() {
                    println!("\n  {}. score={:.4}  {}", i + 1, hit.score, hit.chunk.citation());
                    println!("     {}", hit.chunk.text.replace('\n', " "));
                }
            }
        }
    }
    Ok(())
}
