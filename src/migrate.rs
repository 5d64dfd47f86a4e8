//! Database schema migrations.
//!
//! Creates all required tables (files, knowledge_assets, knowledge_chunks,
//! chunk_vectors, processing_jobs, query_records) and their indexes.
//! Idempotent: safe to run on every startup. Invoked via `ragctl init`.

use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            filename TEXT NOT NULL,
            content_type TEXT NOT NULL,
            size INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            object_key TEXT NOT NULL,
            visibility TEXT NOT NULL DEFAULT 'private',
            created_at INTEGER NOT NULL,
            created_by TEXT NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_assets (
            id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            title TEXT NOT NULL,
            document_type TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'pending',
            visibility TEXT NOT NULL DEFAULT 'private',
            embedding_model_id TEXT NOT NULL DEFAULT '',
            chunk_count INTEGER NOT NULL DEFAULT 0,
            token_count INTEGER NOT NULL DEFAULT 0,
            parser_version TEXT NOT NULL DEFAULT 'v1',
            content_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (file_id) REFERENCES files(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_chunks (
            id TEXT PRIMARY KEY,
            asset_id TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            chunk_type TEXT NOT NULL DEFAULT 'body',
            section_path TEXT NOT NULL DEFAULT '',
            page INTEGER,
            token_count INTEGER NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            embedding_model_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(asset_id, sequence),
            FOREIGN KEY (asset_id) REFERENCES knowledge_assets(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            asset_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            visibility TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            section_path TEXT NOT NULL DEFAULT '',
            page INTEGER,
            chunk_text TEXT NOT NULL,
            embedding_model_id TEXT NOT NULL,
            dims INTEGER NOT NULL,
            vector BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES knowledge_chunks(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processing_jobs (
            id TEXT PRIMARY KEY,
            asset_id TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'queued',
            attempt_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            started_at INTEGER,
            finished_at INTEGER,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (asset_id) REFERENCES knowledge_assets(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS query_records (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            question TEXT NOT NULL,
            top_k INTEGER NOT NULL,
            threshold REAL NOT NULL,
            answer TEXT NOT NULL,
            confidence TEXT NOT NULL,
            citations_json TEXT NOT NULL DEFAULT '[]',
            latency_ms INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_project_id ON files(project_id)")
        .execute(&pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_assets_project_id ON knowledge_assets(project_id)",
    )
    .execute(&pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_assets_file_id ON knowledge_assets(file_id)")
        .execute(&pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_asset_id ON knowledge_chunks(asset_id)",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_asset_id ON chunk_vectors(asset_id)",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_jobs_asset_id ON processing_jobs(asset_id)",
    )
    .execute(&pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_state ON processing_jobs(state)")
        .execute(&pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_query_records_project_id ON query_records(project_id)",
    )
    .execute(&pool)
    .await?;

    pool.close().await;
    Ok(())
}
