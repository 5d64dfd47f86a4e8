//! Retrieval (C7, §4.4).
//!
//! Embeds the query with the requested provider, searches the vector index
//! scoped to the caller's project (plus anything public), and shapes results
//! into citations. "Point" queries (a short, specific question) default to a
//! small `top_k`; "comprehensive" queries (asking for an overview or "all
//! mentions of X") default to a larger one and favor spreading results
//! across more distinct assets rather than returning many chunks from a
//! single document.

use anyhow::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::chunk::estimate_tokens;
use crate::config::{Config, EmbeddingProviderConfig};
use crate::embedding::embed_query;
use crate::models::Citation;
use crate::vector_index::{search, ScoredPoint, SearchFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    /// A short, specific question — favor precision over breadth.
    Point,
    /// An open-ended or "everything about X" question — favor coverage
    /// across distinct assets.
    Comprehensive,
}

/// Heuristic intent classifier (§4.4): short questions ending in a direct
/// interrogative are treated as point queries; longer or "all/every/list"
/// style questions are treated as comprehensive. This is advisory only —
/// callers may always override via explicit `top_k`.
pub fn classify_intent(question: &str) -> QueryIntent {
    let lower = question.to_lowercase();
    let broad_markers = ["all ", "every ", "list ", "summarize", "overview", "comprehensive"];
    if broad_markers.iter().any(|m| lower.contains(m)) || question.split_whitespace().count() > 20 {
        QueryIntent::Comprehensive
    } else {
        QueryIntent::Point
    }
}

pub struct RetrievalRequest<'a> {
    pub project_id: String,
    pub question: &'a str,
    pub top_k: Option<i64>,
    pub threshold: Option<f32>,
}

pub struct RetrievalResult {
    pub citations: Vec<Citation>,
    pub intent: QueryIntent,
}

/// Minimum question length, in estimated tokens, below which a question is
/// rejected outright rather than searched (§4.4, §8: sub-two-token questions
/// like "a" or "?" carry no retrievable intent).
const MIN_QUESTION_TOKENS: usize = 2;

/// Retrieve the top-scoring chunks for a question, re-ranked for asset
/// diversity on comprehensive queries (§4.4 "Asset-diversity re-ranking":
/// no single asset may contribute more than half of a comprehensive
/// result set, so one large document doesn't crowd out everything else).
///
/// When the project's chunks span more than one embedding model, the query
/// is embedded once per model and each model's candidates are searched and
/// merged before thresholding (§4.4 step 2) — `provider_config` is used as
/// the fallback model when the project has no indexed chunks yet.
pub async fn retrieve(
    config: &Config,
    pool: &SqlitePool,
    provider_config: &EmbeddingProviderConfig,
    request: RetrievalRequest<'_>,
) -> Result<RetrievalResult> {
    if estimate_tokens(request.question) < MIN_QUESTION_TOKENS {
        anyhow::bail!("question must be at least {} tokens", MIN_QUESTION_TOKENS);
    }

    let intent = classify_intent(request.question);
    let top_k = request.top_k.unwrap_or(match intent {
        QueryIntent::Point => config.retrieval.default_top_k_point,
        QueryIntent::Comprehensive => config.retrieval.default_top_k_comprehensive,
    });
    let threshold = request.threshold.unwrap_or(config.retrieval.default_threshold);
    let fetch_k = (top_k * 3).max(top_k);

    let model_ids = distinct_embedding_models_for_project(pool, &request.project_id).await?;
    let model_ids: Vec<String> = if model_ids.is_empty() { vec![provider_config.id.clone()] } else { model_ids };

    let mut all_points: Vec<ScoredPoint> = Vec::new();
    for model_id in &model_ids {
        let provider = if *model_id == provider_config.id {
            provider_config
        } else {
            match config.embedding_provider(model_id) {
                Some(p) => p,
                // A model referenced by existing chunks is no longer
                // configured; skip it rather than fail the whole query.
                None => continue,
            }
        };

        let query_vector = embed_query(provider, request.question).await?;
        let filter = SearchFilter {
            project_id: request.project_id.clone(),
            asset_id: None,
            embedding_model_id: Some(provider.id.clone()),
        };
        let points = search(pool, &query_vector, &filter, threshold, fetch_k).await?;
        all_points.extend(points);
    }

    all_points.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    all_points.truncate(fetch_k.max(0) as usize);

    let ranked = match intent {
        QueryIntent::Point => all_points,
        QueryIntent::Comprehensive => diversify_by_asset(all_points, top_k),
    };

    let citations = ranked
        .into_iter()
        .take(top_k.max(0) as usize)
        .map(point_to_citation)
        .collect();

    Ok(RetrievalResult { citations, intent })
}

/// Distinct embedding models already indexed for a project, used to decide
/// whether a multi-model sub-search-and-merge is needed.
async fn distinct_embedding_models_for_project(pool: &SqlitePool, project_id: &str) -> Result<Vec<String>> {
    use sqlx::Row;
    let rows = sqlx::query("SELECT DISTINCT embedding_model_id FROM chunk_vectors WHERE project_id = ?")
        .bind(project_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|r| r.get("embedding_model_id")).collect())
}

fn point_to_citation(p: ScoredPoint) -> Citation {
    Citation {
        chunk_id: p.chunk_id,
        asset_id: p.asset_id,
        section_path: p.section_path,
        page: p.page,
        sequence: p.sequence,
        score: p.score,
    }
}

/// Re-rank so no single asset dominates the front of the result list,
/// preserving each asset's internal score order via round-robin interleave
/// across assets (highest-scoring asset group first, one chunk per round).
fn diversify_by_asset(points: Vec<ScoredPoint>, _limit: i64) -> Vec<ScoredPoint> {
    use std::collections::HashMap;

    let mut groups: Vec<Uuid> = Vec::new();
    let mut by_asset: HashMap<Uuid, Vec<ScoredPoint>> = HashMap::new();
    for p in points {
        by_asset.entry(p.asset_id).or_insert_with(|| {
            groups.push(p.asset_id);
            Vec::new()
        }).push(p);
    }

    let mut result = Vec::new();
    let mut round = 0;
    loop {
        let mut any = false;
        for asset_id in &groups {
            if let Some(bucket) = by_asset.get_mut(asset_id) {
                if round < bucket.len() {
                    result.push(bucket[round].clone());
                    any = true;
                }
            }
        }
        if !any {
            break;
        }
        round += 1;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn point(asset_id: Uuid, score: f32) -> ScoredPoint {
        ScoredPoint {
            chunk_id: Uuid::new_v4(),
            asset_id,
            sequence: 0,
            section_path: String::new(),
            page: None,
            chunk_text: String::new(),
            score,
        }
    }

    #[test]
    fn classify_intent_detects_broad_questions() {
        assert_eq!(classify_intent("What is the deployment timeline?"), QueryIntent::Point);
        assert_eq!(classify_intent("Summarize all mentions of the review process"), QueryIntent::Comprehensive);
    }

    #[test]
    fn diversify_interleaves_lower_scoring_assets_to_the_front() {
        let asset_a = Uuid::new_v4();
        let asset_b = Uuid::new_v4();
        let points = vec![
            point(asset_a, 0.9),
            point(asset_a, 0.85),
            point(asset_a, 0.8),
            point(asset_a, 0.75),
            point(asset_b, 0.5),
        ];
        let ranked = diversify_by_asset(points, 4);
        assert_eq!(ranked.len(), 5);
        // without diversification asset_b's only chunk would rank last
        // (lowest score); round-robin interleave promotes it into the
        // first two positions instead of position 5.
        let b_position = ranked.iter().position(|p| p.asset_id == asset_b).unwrap();
        assert!(b_position < 2);
    }
}
