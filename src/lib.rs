//! # ODRAS RAG core
//!
//! **A retrieval-augmented generation core for the ODRAS platform.**
//!
//! Takes uploaded files through extraction, structural chunking, embedding,
//! and vector indexing, then answers questions against that index with
//! confidence-bearing, citation-backed synthesis. The whole pipeline can also
//! run as an external-task instance under a BPMN-style workflow engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────┐   ┌────────────┐   ┌───────────┐   ┌──────────────┐
//! │ Files │──▶│ Extraction │──▶│ Chunking  │──▶│  Embedding   │
//! └───────┘   └────────────┘   └───────────┘   └──────┬───────┘
//!                                                      ▼
//!                                              ┌───────────────┐
//!                                              │ Vector Index  │
//!                                              └───────┬───────┘
//!                                    ┌─────────────────┼─────────────────┐
//!                                    ▼                                   ▼
//!                              ┌───────────┐                     ┌──────────────┐
//!                              │ Retriever │────────────────────▶│ Synthesiser  │
//!                              └───────────┘                     └──────────────┘
//!                                    │                                   │
//!                                    └───────────────┬───────────────────┘
//!                                                     ▼
//!                                          ┌───────────────────────┐
//!                                          │ CLI (ragctl) / HTTP    │
//!                                          └───────────────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. A file is uploaded and stored content-addressed by SHA-256 in the
//!    [`object_store`].
//! 2. [`ingest`] orchestrates one file's processing: [`extract`] pulls plain
//!    text out of PDF/DOCX/PPTX/XLSX (falling back to lossy UTF-8 decoding
//!    for plain text), [`chunk`] splits it into bounded, structure-aware
//!    pieces, and [`embedding`] turns each piece into a vector. Progress is
//!    tracked by a `ProcessingJob` state machine with compare-and-set
//!    transitions so two workers never both claim the same job.
//! 3. Vectors and their denormalised payload (project, visibility, section)
//!    land in the [`vector_index`] for single-hop cosine-similarity search.
//! 4. [`retriever`] classifies a question's intent (point vs. comprehensive),
//!    searches the index scoped to the caller's project, and re-ranks for
//!    asset diversity on broad questions.
//! 5. [`synthesis`] turns retrieved evidence into a grounded answer with an
//!    honest [`models::Confidence`] label — never fabricated, never
//!    defaulted to "medium".
//! 6. [`workflow`] lets the whole retrieve-then-synthesize flow run as an
//!    external-task instance instead of (or in addition to) the synchronous
//!    HTTP path.
//! 7. Everything is exposed via the **CLI** (`ragctl`) and the **HTTP query
//!    façade** ([`server`]).
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types: files, knowledge assets, chunks, citations |
//! | [`error`] | Stable error taxonomy for the HTTP façade |
//! | [`object_store`] | Content-addressed blob storage (local filesystem, S3 via SigV4) |
//! | [`extract`] | Multi-format text extraction (PDF, DOCX, PPTX, XLSX) |
//! | [`chunk`] | Structural chunker with sliding-window overlap fallback |
//! | [`embedding`] | Embedding provider trait and OpenAI/Ollama/local implementations |
//! | [`ingest`] | Ingestion pipeline: extract → chunk → embed → persist |
//! | [`vector_index`] | Cosine-similarity vector search with project/visibility filtering |
//! | [`retriever`] | Query-intent classification and asset-diverse retrieval |
//! | [`synthesis`] | Confidence-bearing, citation-backed answer synthesis |
//! | [`workflow`] | Workflow runtime adapter for external-task execution |
//! | [`server`] | HTTP query façade (Axum) with CORS |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema migrations (idempotent) |
//!
//! ## Configuration
//!
//! The RAG core is configured via a TOML file (default: `config/rag.toml`).
//! See [`config`] for all available options and [`config::load_config`] for
//! validation rules.

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod object_store;
pub mod retriever;
pub mod server;
pub mod synthesis;
pub mod vector_index;
pub mod workflow;
