//! Vector similarity search over chunk embeddings (C3).
//!
//! Vectors live in the `chunk_vectors` table alongside their denormalised
//! retrieval payload (§3 "Vector Point", §9 "Cyclic dependencies" — storing
//! payload fields on the vector row avoids a second hop back into
//! `knowledge_chunks` on every search). Search is a brute-force cosine scan:
//! at the scale this core targets (a handful of projects' worth of
//! documents) an ANN index is not worth the added dependency — a direct
//! SQLite-backed scan over an external vector database.

use anyhow::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{Visibility, VectorPoint};

/// Filter applied to a similarity search (§4.4 "Visibility filter"):
/// restricts candidates to a project's private points plus every public
/// point, and optionally narrows to one asset or document type.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub project_id: String,
    pub asset_id: Option<Uuid>,
    pub embedding_model_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub chunk_id: Uuid,
    pub asset_id: Uuid,
    pub sequence: i64,
    pub section_path: String,
    pub page: Option<i64>,
    pub chunk_text: String,
    pub score: f32,
}

/// Insert or replace a chunk's vector and payload (§4.2 "Embedding
/// persistence"). `point.point_id` is the chunk id: one vector per chunk.
pub async fn upsert(pool: &SqlitePool, point: &VectorPoint, embedding_model_id: &str) -> Result<()> {
    let blob = vec_to_blob(&point.vector);
    sqlx::query(
        r#"
        INSERT INTO chunk_vectors
            (chunk_id, asset_id, project_id, visibility, sequence, section_path, page, chunk_text, embedding_model_id, dims, vector)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            visibility = excluded.visibility,
            section_path = excluded.section_path,
            page = excluded.page,
            chunk_text = excluded.chunk_text,
            embedding_model_id = excluded.embedding_model_id,
            dims = excluded.dims,
            vector = excluded.vector
        "#,
    )
    .bind(point.point_id.to_string())
    .bind(point.payload.asset_id.to_string())
    .bind(&point.payload.project_id)
    .bind(point.payload.visibility.as_str())
    .bind(point.payload.sequence)
    .bind(&point.payload.section_path)
    .bind(point.payload.page)
    .bind(&point.payload.chunk_text)
    .bind(embedding_model_id)
    .bind(point.vector.len() as i64)
    .bind(blob)
    .execute(pool)
    .await?;
    Ok(())
}

/// Remove every vector belonging to an asset (re-ingestion / deletion path).
pub async fn delete_by_asset(pool: &SqlitePool, asset_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM chunk_vectors WHERE asset_id = ?")
        .bind(asset_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Cosine-similarity brute-force scan, filtered by project visibility
/// (private rows for `filter.project_id`, plus every public row) and
/// optionally by asset or embedding model. Results above `threshold`,
/// highest score first, truncated to `top_k`.
pub async fn search(
    pool: &SqlitePool,
    query_vector: &[f32],
    filter: &SearchFilter,
    threshold: f32,
    top_k: i64,
) -> Result<Vec<ScoredPoint>> {
    let asset_filter = filter.asset_id.map(|id| id.to_string());

    let rows = sqlx::query(
        r#"
        SELECT chunk_id, asset_id, sequence, section_path, page, chunk_text, vector
        FROM chunk_vectors
        WHERE
            (project_id = ?1 OR visibility = 'public')
            AND (?2 IS NULL OR asset_id = ?2)
            AND (?3 IS NULL OR embedding_model_id = ?3)
        "#,
    )
    .bind(&filter.project_id)
    .bind(&asset_filter)
    .bind(&filter.embedding_model_id)
    .fetch_all(pool)
    .await?;

    let mut scored: Vec<ScoredPoint> = rows
        .into_iter()
        .filter_map(|row| {
            use sqlx::Row as _;
            let chunk_id: String = row.get("chunk_id");
            let asset_id: String = row.get("asset_id");
            let vector_blob: Vec<u8> = row.get("vector");
            let vector = blob_to_vec(&vector_blob);
            let score = cosine_similarity(query_vector, &vector);
            if score < threshold {
                return None;
            }
            Some(ScoredPoint {
                chunk_id: chunk_id.parse().ok()?,
                asset_id: asset_id.parse().ok()?,
                sequence: row.get("sequence"),
                section_path: row.get("section_path"),
                page: row.get("page"),
                chunk_text: row.get("chunk_text"),
                score,
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k.max(0) as usize);
    Ok(scored)
}

#[allow(dead_code)]
fn visibility_from_str(s: &str) -> Visibility {
    s.parse().unwrap_or(Visibility::Private)
}
