//! Ingestion pipeline orchestration (C6, §4.3).
//!
//! Coordinates the full ingestion flow for one file: extract text, chunk,
//! embed, persist, all tracked by a `ProcessingJob` state machine
//! (queued → running → succeeded/failed) with compare-and-set transitions so
//! two workers racing on the same job never both claim it. Idempotent on
//! `(content_hash, parser_version, embedding_model_id)`: re-ingesting an
//! unchanged file with the same parser and embedding provider is a no-op
//! that returns the existing asset rather than creating a duplicate.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::{chunk_text, decode_text_lossy};
use crate::config::Config;
use crate::embedding;
use crate::extract;
use crate::models::{AssetStatus, JobState, Visibility};
use crate::object_store::ObjectStore;
use crate::vector_index;

const PARSER_VERSION: &str = "v1";

pub struct IngestRequest {
    pub file_id: Uuid,
    pub embedding_provider_id: String,
}

pub struct IngestOutcome {
    pub asset_id: Uuid,
    pub job_id: Uuid,
    pub chunk_count: i64,
    pub reused_existing: bool,
}

struct FileRow {
    project_id: String,
    filename: String,
    content_type: String,
    object_key: String,
    visibility: Visibility,
}

async fn load_file(pool: &SqlitePool, file_id: Uuid) -> Result<FileRow> {
    use sqlx::Row;
    let row = sqlx::query(
        "SELECT project_id, filename, content_type, object_key, visibility FROM files WHERE id = ?",
    )
    .bind(file_id.to_string())
    .fetch_optional(pool)
    .await?
    .with_context(|| format!("file not found: {}", file_id))?;

    let visibility: String = row.get("visibility");
    Ok(FileRow {
        project_id: row.get("project_id"),
        filename: row.get("filename"),
        content_type: row.get("content_type"),
        object_key: row.get("object_key"),
        visibility: visibility.parse().unwrap_or(Visibility::Private),
    })
}

/// Ingest a file into a knowledge asset: extract, chunk, embed, persist.
/// Returns the existing asset without re-processing when an asset already
/// exists for this file with the same content hash, parser version, and
/// embedding provider (§4.3 "Idempotent re-ingestion").
pub async fn ingest(
    config: &Config,
    pool: &SqlitePool,
    object_store: &dyn ObjectStore,
    request: IngestRequest,
) -> Result<IngestOutcome> {
    let file = load_file(pool, request.file_id).await?;
    let provider_config = config
        .embedding_provider(&request.embedding_provider_id)
        .with_context(|| format!("unknown embedding provider: {}", request.embedding_provider_id))?;

    let content_hash = compute_file_hash(pool, request.file_id).await?;

    if let Some((existing_asset_id, existing_status)) = find_existing_asset(
        pool,
        request.file_id,
        &content_hash,
        &request.embedding_provider_id,
    )
    .await?
    {
        match existing_status {
            AssetStatus::Ready => {
                info!(asset_id = %existing_asset_id, "reusing existing asset, ingestion is a no-op");
                let chunk_count = count_chunks(pool, existing_asset_id).await?;
                // §8 scenario 3: a repeated ingest still records an attempt,
                // even though no work is redone.
                insert_succeeded_job(pool, existing_asset_id).await?;
                return Ok(IngestOutcome {
                    asset_id: existing_asset_id,
                    job_id: Uuid::nil(),
                    chunk_count,
                    reused_existing: true,
                });
            }
            AssetStatus::Failed => {
                info!(asset_id = %existing_asset_id, "resuming failed asset's processing job");
                let job_id = latest_job_id(pool, existing_asset_id).await?;
                let claimed = transition_job(pool, job_id, JobState::Failed, JobState::Running, None).await?;
                if !claimed {
                    bail!(
                        "processing job {} was not in 'failed' state; another worker may have claimed it",
                        job_id
                    );
                }
                let result = execute_job_body(config, pool, object_store, existing_asset_id, &file, provider_config).await;
                return finish_job(pool, existing_asset_id, job_id, result).await;
            }
            _ => {}
        }
    }

    let asset_id = Uuid::new_v4();
    let job_id = create_asset_and_job(pool, asset_id, &request.file_id.to_string(), &file, &content_hash).await?;

    let claimed = transition_job(pool, job_id, JobState::Queued, JobState::Running, None).await?;
    if !claimed {
        bail!("processing job {} was not in 'queued' state; another worker may have claimed it", job_id);
    }
    let result = execute_job_body(config, pool, object_store, asset_id, &file, provider_config).await;
    finish_job(pool, asset_id, job_id, result).await
}

/// Apply a job's outcome: on success, mark the job succeeded and the asset
/// ready; on failure, mark both failed and propagate the error. Shared by
/// fresh ingestion and by resuming a previously-failed job (§4.3 "a failed
/// job may be resumed... partial chunks/points are overwritten on retry").
async fn finish_job(pool: &SqlitePool, asset_id: Uuid, job_id: Uuid, result: Result<i64>) -> Result<IngestOutcome> {
    match result {
        Ok(chunk_count) => {
            transition_job(pool, job_id, JobState::Running, JobState::Succeeded, None).await?;
            set_asset_status(pool, asset_id, AssetStatus::Ready, chunk_count).await?;
            Ok(IngestOutcome {
                asset_id,
                job_id,
                chunk_count,
                reused_existing: false,
            })
        }
        Err(e) => {
            warn!(error = %e, "ingestion failed");
            transition_job(pool, job_id, JobState::Running, JobState::Failed, Some(e.to_string())).await?;
            set_asset_status(pool, asset_id, AssetStatus::Failed, 0).await?;
            Err(e)
        }
    }
}

/// Extract, chunk, embed, and persist for a claimed job. Partial chunks/
/// vector points from a prior failed attempt are deleted up front so a retry
/// overwrites them rather than appending duplicates.
async fn execute_job_body(
    config: &Config,
    pool: &SqlitePool,
    object_store: &dyn ObjectStore,
    asset_id: Uuid,
    file: &FileRow,
    provider_config: &crate::config::EmbeddingProviderConfig,
) -> Result<i64> {
    let bytes = object_store.get(&file.object_key).await?;
    let (text, replaced) = extract::extract_text(&bytes, &file.content_type)
        .map(|t| (t, false))
        .or_else(|_| {
            let (text, replaced) = decode_text_lossy(&bytes);
            Ok::<_, anyhow::Error>((text, replaced))
        })?;
    if replaced {
        warn!(asset_id = %asset_id, "non-UTF-8 bytes decoded with replacement characters");
    }

    let drafts = chunk_text(&text, &config.chunking, None);
    if drafts.is_empty() {
        bail!("document produced zero chunks after extraction (empty or unreadable content)");
    }

    let texts: Vec<String> = drafts.iter().map(|d| d.content.clone()).collect();
    let vectors = embedding::embed_texts(provider_config, &texts)
        .await
        .context("embedding batch failed")?;

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM knowledge_chunks WHERE asset_id = ?")
        .bind(asset_id.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    vector_index::delete_by_asset(pool, asset_id).await?;

    let now = Utc::now();
    for (draft, vector) in drafts.iter().zip(vectors.iter()) {
        let chunk_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO knowledge_chunks
                (id, asset_id, sequence, chunk_type, section_path, page, token_count, content, content_hash, embedding_model_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(chunk_id.to_string())
        .bind(asset_id.to_string())
        .bind(draft.sequence)
        .bind(draft.chunk_type.as_str())
        .bind(&draft.section_path)
        .bind(draft.page)
        .bind(draft.token_count)
        .bind(&draft.content)
        .bind(&draft.content_hash)
        .bind(&provider_config.id)
        .bind(now.timestamp())
        .execute(pool)
        .await?;

        let point = crate::models::VectorPoint {
            point_id: chunk_id,
            vector: vector.clone(),
            payload: crate::models::VectorPayload {
                asset_id,
                project_id: file.project_id.clone(),
                visibility: file.visibility,
                sequence: draft.sequence,
                chunk_text: draft.content.clone(),
                section_path: draft.section_path.clone(),
                page: draft.page,
            },
        };
        vector_index::upsert(pool, &point, &provider_config.id).await?;
    }

    Ok(drafts.len() as i64)
}

async fn compute_file_hash(pool: &SqlitePool, file_id: Uuid) -> Result<String> {
    use sqlx::Row;
    let row = sqlx::query("SELECT content_hash FROM files WHERE id = ?")
        .bind(file_id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(row.get("content_hash"))
}

/// Finds a prior asset for this (file, content, parser, model) tuple that is
/// either already `ready` (no-op reuse) or `failed` (resumable, §4.3). Any
/// other status (pending/processing) means another worker currently owns
/// it, so a fresh attempt is started instead of racing it.
async fn find_existing_asset(
    pool: &SqlitePool,
    file_id: Uuid,
    content_hash: &str,
    embedding_model_id: &str,
) -> Result<Option<(Uuid, AssetStatus)>> {
    use sqlx::Row;
    let row = sqlx::query(
        r#"
        SELECT id, status FROM knowledge_assets
        WHERE file_id = ? AND content_hash = ? AND parser_version = ? AND embedding_model_id = ?
            AND status IN ('ready', 'failed')
        ORDER BY updated_at DESC
        LIMIT 1
        "#,
    )
    .bind(file_id.to_string())
    .bind(content_hash)
    .bind(PARSER_VERSION)
    .bind(embedding_model_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|r| {
        let id: String = r.get("id");
        let status: String = r.get("status");
        let asset_id: Uuid = id.parse().ok()?;
        let status = match status.as_str() {
            "ready" => AssetStatus::Ready,
            "failed" => AssetStatus::Failed,
            _ => return None,
        };
        Some((asset_id, status))
    }))
}

/// Most recent processing job for an asset — the one to resume on retry.
async fn latest_job_id(pool: &SqlitePool, asset_id: Uuid) -> Result<Uuid> {
    use sqlx::Row;
    let row = sqlx::query("SELECT id FROM processing_jobs WHERE asset_id = ? ORDER BY created_at DESC LIMIT 1")
        .bind(asset_id.to_string())
        .fetch_one(pool)
        .await?;
    let id: String = row.get("id");
    Ok(id.parse()?)
}

/// Records a job attempt for an idempotent no-op reingest: no work is redone,
/// but §8 scenario 3 requires two `ingest()` calls on unchanged inputs to
/// leave two job rows behind, not one.
async fn insert_succeeded_job(pool: &SqlitePool, asset_id: Uuid) -> Result<Uuid> {
    let now = Utc::now().timestamp();
    let job_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO processing_jobs (id, asset_id, state, attempt_count, started_at, finished_at, created_at) VALUES (?, ?, 'succeeded', 1, ?, ?, ?)",
    )
    .bind(job_id.to_string())
    .bind(asset_id.to_string())
    .bind(now)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(job_id)
}

async fn count_chunks(pool: &SqlitePool, asset_id: Uuid) -> Result<i64> {
    use sqlx::Row;
    let row = sqlx::query("SELECT COUNT(*) as n FROM knowledge_chunks WHERE asset_id = ?")
        .bind(asset_id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(row.get("n"))
}

async fn create_asset_and_job(
    pool: &SqlitePool,
    asset_id: Uuid,
    file_id: &str,
    file: &FileRow,
    content_hash: &str,
) -> Result<Uuid> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO knowledge_assets
            (id, file_id, project_id, title, document_type, status, visibility, embedding_model_id, chunk_count, token_count, parser_version, content_hash, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 'pending', ?, '', 0, 0, ?, ?, ?, ?)
        "#,
    )
    .bind(asset_id.to_string())
    .bind(file_id)
    .bind(&file.project_id)
    .bind(&file.filename)
    .bind(&file.content_type)
    .bind(file.visibility.as_str())
    .bind(PARSER_VERSION)
    .bind(content_hash)
    .bind(now.timestamp())
    .bind(now.timestamp())
    .execute(pool)
    .await?;

    let job_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO processing_jobs (id, asset_id, state, attempt_count, created_at) VALUES (?, ?, 'queued', 0, ?)",
    )
    .bind(job_id.to_string())
    .bind(asset_id.to_string())
    .bind(now.timestamp())
    .execute(pool)
    .await?;

    Ok(job_id)
}

/// Compare-and-set job transition: only succeeds if the job's current state
/// matches `expected`, so two workers racing on the same job never both
/// claim it (§4.3 "Processing Job state machine"). Returns whether the
/// transition was applied.
async fn transition_job(
    pool: &SqlitePool,
    job_id: Uuid,
    expected: JobState,
    next: JobState,
    error: Option<String>,
) -> Result<bool> {
    let now = Utc::now().timestamp();
    let result = match next {
        JobState::Running => {
            sqlx::query(
                "UPDATE processing_jobs SET state = ?, attempt_count = attempt_count + 1, started_at = ? WHERE id = ? AND state = ?",
            )
            .bind(next.as_str())
            .bind(now)
            .bind(job_id.to_string())
            .bind(expected.as_str())
            .execute(pool)
            .await?
        }
        JobState::Succeeded | JobState::Failed => {
            sqlx::query(
                "UPDATE processing_jobs SET state = ?, last_error = ?, finished_at = ? WHERE id = ? AND state = ?",
            )
            .bind(next.as_str())
            .bind(error)
            .bind(now)
            .bind(job_id.to_string())
            .bind(expected.as_str())
            .execute(pool)
            .await?
        }
        JobState::Queued => {
            sqlx::query("UPDATE processing_jobs SET state = ? WHERE id = ? AND state = ?")
                .bind(next.as_str())
                .bind(job_id.to_string())
                .bind(expected.as_str())
                .execute(pool)
                .await?
        }
    };
    Ok(result.rows_affected() == 1)
}

async fn set_asset_status(pool: &SqlitePool, asset_id: Uuid, status: AssetStatus, chunk_count: i64) -> Result<()> {
    sqlx::query(
        "UPDATE knowledge_assets SET status = ?, chunk_count = ?, updated_at = ? WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(chunk_count)
    .bind(Utc::now().timestamp())
    .bind(asset_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ChunkingConfig, Config, DatabaseConfig, EmbeddingProviderConfig, LocalObjectStoreConfig,
        ObjectStoreBackend, ObjectStoreConfig, ServerConfig,
    };
    use crate::migrate::run_migrations;
    use crate::object_store::{content_hash, LocalObjectStore};

    async fn test_setup() -> (Config, SqlitePool, LocalObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            database: DatabaseConfig { path: dir.path().join("test.db") },
            object_store: ObjectStoreConfig {
                backend: ObjectStoreBackend::Local,
                local: Some(LocalObjectStoreConfig { root: dir.path().join("blobs") }),
                s3: None,
            },
            chunking: ChunkingConfig {
                min_tokens: 4,
                target_tokens: 20,
                max_tokens: 40,
                overlap_ratio: 0.15,
            },
            retrieval: Default::default(),
            embedding_providers: vec![EmbeddingProviderConfig {
                id: "default".to_string(),
                provider: "disabled".to_string(),
                model: None,
                dims: 3,
                batch_size: 64,
                max_retries: 1,
                timeout_secs: 5,
                base_url: None,
            }],
            synthesis: Default::default(),
            workflow: Default::default(),
            server: ServerConfig { bind: "127.0.0.1:0".to_string() },
        };
        run_migrations(&config).await.unwrap();
        let pool = crate::db::connect(&config).await.unwrap();
        let store = LocalObjectStore::new(dir.path().join("blobs"));
        (config, pool, store, dir)
    }

    async fn insert_file(pool: &SqlitePool, store: &LocalObjectStore, body: &[u8]) -> Uuid {
        let file_id = Uuid::new_v4();
        let hash = content_hash(body);
        store.put(&hash, body).await.unwrap();
        sqlx::query(
            "INSERT INTO files (id, project_id, filename, content_type, size, content_hash, object_key, visibility, created_at, created_by) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(file_id.to_string())
        .bind("proj-a")
        .bind("doc.txt")
        .bind("text/plain")
        .bind(body.len() as i64)
        .bind(&hash)
        .bind(&hash)
        .bind("private")
        .bind(Utc::now().timestamp())
        .bind("tester")
        .execute(pool)
        .await
        .unwrap();
        file_id
    }

    #[tokio::test]
    async fn ingest_fails_gracefully_with_disabled_embedding_provider() {
        let (config, pool, store, _dir) = test_setup().await;
        let file_id = insert_file(&pool, &store, b"Hello world. This is a test document with enough text to form a chunk.").await;

        let result = ingest(
            &config,
            &pool,
            &store,
            IngestRequest { file_id, embedding_provider_id: "default".to_string() },
        )
        .await;

        assert!(result.is_err());

        use sqlx::Row;
        let row = sqlx::query("SELECT status FROM knowledge_assets WHERE file_id = ?")
            .bind(file_id.to_string())
            .fetch_one(&pool)
            .await
            .unwrap();
        let status: String = row.get("status");
        assert_eq!(status, "failed");
    }

    #[tokio::test]
    async fn ingest_resumes_failed_asset_instead_of_duplicating() {
        let (config, pool, store, _dir) = test_setup().await;
        let file_id = insert_file(&pool, &store, b"Hello world. This is a test document with enough text to form a chunk.").await;

        let first = ingest(
            &config,
            &pool,
            &store,
            IngestRequest { file_id, embedding_provider_id: "default".to_string() },
        )
        .await;
        assert!(first.is_err());

        let second = ingest(
            &config,
            &pool,
            &store,
            IngestRequest { file_id, embedding_provider_id: "default".to_string() },
        )
        .await;
        assert!(second.is_err());

        use sqlx::Row;
        let asset_count: i64 = sqlx::query("SELECT COUNT(*) as n FROM knowledge_assets WHERE file_id = ?")
            .bind(file_id.to_string())
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("n");
        assert_eq!(asset_count, 1, "a retry on a failed asset must resume it, not mint a second asset row");

        let job_row = sqlx::query(
            "SELECT attempt_count FROM processing_jobs WHERE asset_id = (SELECT id FROM knowledge_assets WHERE file_id = ?)",
        )
        .bind(file_id.to_string())
        .fetch_one(&pool)
        .await
        .unwrap();
        let attempt_count: i64 = job_row.get("attempt_count");
        assert_eq!(attempt_count, 2, "resuming a failed job should be its second attempt");
    }

    #[tokio::test]
    async fn reingest_of_ready_asset_is_idempotent_but_still_records_a_job_attempt() {
        let (config, pool, store, _dir) = test_setup().await;
        let body = b"Hello world. This is a test document with enough text to form a chunk.";
        let file_id = insert_file(&pool, &store, body).await;
        let hash = content_hash(body);

        // Simulate a prior successful ingest by writing a 'ready' asset and
        // its 'succeeded' job directly, bypassing the (disabled-provider)
        // embedding step that a real first attempt would need.
        let asset_id = Uuid::new_v4();
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO knowledge_assets
                (id, file_id, project_id, title, document_type, status, visibility, embedding_model_id, chunk_count, token_count, parser_version, content_hash, created_at, updated_at)
            VALUES (?, ?, 'proj-a', 'doc.txt', 'text/plain', 'ready', 'private', 'default', 1, 10, 'v1', ?, ?, ?)
            "#,
        )
        .bind(asset_id.to_string())
        .bind(file_id.to_string())
        .bind(&hash)
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO processing_jobs (id, asset_id, state, attempt_count, started_at, finished_at, created_at) VALUES (?, ?, 'succeeded', 1, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(asset_id.to_string())
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await
        .unwrap();

        let outcome = ingest(
            &config,
            &pool,
            &store,
            IngestRequest { file_id, embedding_provider_id: "default".to_string() },
        )
        .await
        .unwrap();
        assert!(outcome.reused_existing);
        assert_eq!(outcome.asset_id, asset_id);

        use sqlx::Row;
        let job_count: i64 = sqlx::query("SELECT COUNT(*) as n FROM processing_jobs WHERE asset_id = ?")
            .bind(asset_id.to_string())
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("n");
        assert_eq!(job_count, 2, "two ingest() calls on unchanged inputs must record two job rows");
    }

    #[tokio::test]
    async fn ingest_unknown_file_errors() {
        let (config, pool, store, _dir) = test_setup().await;
        let result = ingest(
            &config,
            &pool,
            &store,
            IngestRequest { file_id: Uuid::new_v4(), embedding_provider_id: "default".to_string() },
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn ingest_unknown_embedding_provider_errors() {
        let (config, pool, store, _dir) = test_setup().await;
        let file_id = insert_file(&pool, &store, b"some text").await;
        let result = ingest(
            &config,
            &pool,
            &store,
            IngestRequest { file_id, embedding_provider_id: "nonexistent".to_string() },
        )
        .await;
        assert!(result.is_err());
    }
}
