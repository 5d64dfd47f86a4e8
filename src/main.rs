//! # ODRAS RAG core
//!
//! A retrieval-augmented generation core: content-addressed file storage,
//! multi-format text extraction, structural chunking, pluggable embedding
//! providers, cosine-similarity vector search, confidence-bearing answer
//! synthesis, and a workflow-runtime adapter for running the whole pipeline
//! as an external-task instance.
//!
//! ## Architecture
//!
//! ```text
//! Files → Extraction → Chunking → Embedding → Vector Index → Retriever → Synthesizer → HTTP / CLI
//! ```
//!
//! ## Modules
//!
//! - [`config`] — TOML configuration parsing and validation
//! - [`models`] — Core data types: files, knowledge assets, chunks, citations
//! - [`error`] — Stable error taxonomy for the HTTP façade
//! - [`object_store`] — Content-addressed blob storage (local, S3)
//! - [`extract`] — Multi-format text extraction (PDF, DOCX, PPTX, XLSX)
//! - [`chunk`] — Structural chunker with sliding-window fallback
//! - [`embedding`] — Embedding provider trait and implementations
//! - [`ingest`] — Ingestion pipeline orchestration
//! - [`vector_index`] — Cosine-similarity vector search
//! - [`retriever`] — Query-intent classification and retrieval
//! - [`synthesis`] — Confidence-bearing answer synthesis
//! - [`workflow`] — Workflow runtime adapter
//! - [`server`] — HTTP query façade (Axum)
//! - [`db`] — SQLite connection management
//! - [`migrate`] — Database schema migrations

mod chunk;
mod config;
mod db;
mod embedding;
mod error;
mod extract;
mod ingest;
mod migrate;
mod models;
mod object_store;
mod retriever;
mod server;
mod synthesis;
mod vector_index;
mod workflow;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "ragctl", about = "ODRAS RAG core — ingestion, retrieval, and synthesis", version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema
    Init,

    /// Upload a file and ingest it into a knowledge asset
    Ingest {
        /// Path to the file on disk
        path: PathBuf,

        /// Project to attach the file/asset to
        #[arg(long)]
        project_id: String,

        /// Embedding provider id from the config's [[embedding]] table
        #[arg(long, default_value = "default")]
        embedding_provider_id: String,

        /// Visibility class: private or public
        #[arg(long, default_value = "private")]
        visibility: String,
    },

    /// Retrieve citations for a question without synthesizing an answer
    Search {
        /// Project to search within
        #[arg(long)]
        project_id: String,

        /// Search question
        query: String,

        /// Embedding provider id from the config's [[embedding]] table
        #[arg(long, default_value = "default")]
        embedding_provider_id: String,

        /// Maximum number of citations to return
        #[arg(long)]
        top_k: Option<i64>,
    },

    /// Retrieve and synthesize a grounded answer for a question
    Ask {
        /// Project to search within
        #[arg(long)]
        project_id: String,

        /// Question to ask
        query: String,

        /// Embedding provider id from the config's [[embedding]] table
        #[arg(long, default_value = "default")]
        embedding_provider_id: String,
    },

    /// Start the HTTP query façade
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { path, project_id, embedding_provider_id, visibility } => {
            run_ingest(&cfg, &path, &project_id, &embedding_provider_id, &visibility).await?;
        }
        Commands::Search { project_id, query, embedding_provider_id, top_k } => {
            run_search(&cfg, &project_id, &query, &embedding_provider_id, top_k).await?;
        }
        Commands::Ask { project_id, query, embedding_provider_id } => {
            run_ask(&cfg, &project_id, &query, &embedding_provider_id).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_ingest(
    cfg: &config::Config,
    path: &std::path::Path,
    project_id: &str,
    embedding_provider_id: &str,
    visibility: &str,
) -> anyhow::Result<()> {
    use anyhow::Context;

    let pool = db::connect(cfg).await?;
    let object_store = object_store::create_object_store(cfg)?;

    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let hash = object_store::content_hash(&bytes);
    object_store.put(&hash, &bytes).await?;

    let filename = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("upload")
        .to_string();
    let content_type = mime_guess_from_extension(path);

    let file_id = Uuid::new_v4();
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        "INSERT INTO files (id, project_id, filename, content_type, size, content_hash, object_key, visibility, created_at, created_by) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(file_id.to_string())
    .bind(project_id)
    .bind(&filename)
    .bind(&content_type)
    .bind(bytes.len() as i64)
    .bind(&hash)
    .bind(&hash)
    .bind(visibility)
    .bind(now)
    .bind("ragctl")
    .execute(&pool)
    .await?;

    let outcome = ingest::ingest(
        cfg,
        &pool,
        object_store.as_ref(),
        ingest::IngestRequest { file_id, embedding_provider_id: embedding_provider_id.to_string() },
    )
    .await?;

    println!(
        "asset {} ({} chunks{})",
        outcome.asset_id,
        outcome.chunk_count,
        if outcome.reused_existing { ", reused existing" } else { "" }
    );
    Ok(())
}

fn mime_guess_from_extension(path: &std::path::Path) -> String {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase().as_str() {
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "md" => "text/markdown",
        _ => "text/plain",
    }
    .to_string()
}

async fn run_search(
    cfg: &config::Config,
    project_id: &str,
    query: &str,
    embedding_provider_id: &str,
    top_k: Option<i64>,
) -> anyhow::Result<()> {
    use anyhow::Context;

    let pool = db::connect(cfg).await?;
    let provider_config = cfg
        .embedding_provider(embedding_provider_id)
        .with_context(|| format!("unknown embedding provider: {}", embedding_provider_id))?;

    let result = retriever::retrieve(
        cfg,
        &pool,
        provider_config,
        retriever::RetrievalRequest {
            project_id: project_id.to_string(),
            question: query,
            top_k,
            threshold: None,
        },
    )
    .await?;

    if result.citations.is_empty() {
        println!("No matching chunks found.");
        return Ok(());
    }
    for citation in &result.citations {
        println!(
            "[{:.3}] {} (chunk {}, asset {})",
            citation.score, citation.section_path, citation.sequence, citation.asset_id
        );
    }
    Ok(())
}

async fn run_ask(
    cfg: &config::Config,
    project_id: &str,
    query: &str,
    embedding_provider_id: &str,
) -> anyhow::Result<()> {
    use anyhow::Context;
    use sqlx::Row;

    let pool = db::connect(cfg).await?;
    let provider_config = cfg
        .embedding_provider(embedding_provider_id)
        .with_context(|| format!("unknown embedding provider: {}", embedding_provider_id))?;

    let retrieval = retriever::retrieve(
        cfg,
        &pool,
        provider_config,
        retriever::RetrievalRequest {
            project_id: project_id.to_string(),
            question: query,
            top_k: None,
            threshold: None,
        },
    )
    .await?;

    let mut evidence = Vec::with_capacity(retrieval.citations.len());
    for citation in &retrieval.citations {
        let row = sqlx::query("SELECT content FROM knowledge_chunks WHERE id = ?")
            .bind(citation.chunk_id.to_string())
            .fetch_optional(&pool)
            .await?;
        if let Some(row) = row {
            let text: String = row.get("content");
            evidence.push(synthesis::EvidenceChunk { citation: citation.clone(), text });
        }
    }

    let result = synthesis::synthesize(&cfg.synthesis, query, &evidence).await?;

    println!("{}", result.answer);
    println!("\nConfidence: {}", result.confidence.as_str());
    for citation in &result.citations {
        println!("  - {} (chunk {})", citation.section_path, citation.sequence);
    }
    Ok(())
}
