//! Core data types for the RAG core: files, knowledge assets, chunks, vector
//! points, processing jobs, and query records (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Access class of a file/asset (§3 "Ownership").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Public => "public",
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Visibility::Private),
            "public" => Ok(Visibility::Public),
            other => anyhow::bail!("invalid visibility: '{}'", other),
        }
    }
}

/// Lifecycle state of a knowledge asset (§3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Pending => "pending",
            AssetStatus::Processing => "processing",
            AssetStatus::Ready => "ready",
            AssetStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for AssetStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AssetStatus::Pending),
            "processing" => Ok(AssetStatus::Processing),
            "ready" => Ok(AssetStatus::Ready),
            "failed" => Ok(AssetStatus::Failed),
            other => anyhow::bail!("invalid asset status: '{}'", other),
        }
    }
}

/// Processing Job lifecycle state (§4.3's state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "running" => Ok(JobState::Running),
            "succeeded" => Ok(JobState::Succeeded),
            "failed" => Ok(JobState::Failed),
            other => anyhow::bail!("invalid job state: '{}'", other),
        }
    }
}

/// Structural role of a chunk within its document (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Title,
    Body,
    List,
    Table,
    Code,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Title => "title",
            ChunkType::Body => "body",
            ChunkType::List => "list",
            ChunkType::Table => "table",
            ChunkType::Code => "code",
        }
    }
}

impl std::str::FromStr for ChunkType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "title" => Ok(ChunkType::Title),
            "body" => Ok(ChunkType::Body),
            "list" => Ok(ChunkType::List),
            "table" => Ok(ChunkType::Table),
            "code" => Ok(ChunkType::Code),
            other => anyhow::bail!("invalid chunk type: '{}'", other),
        }
    }
}

/// Declared reliability label on a synthesised answer (§4.5, GLOSSARY).
/// Never fabricated: "unknown" is the honest default, not "medium".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
    Unknown,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
            Confidence::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for Confidence {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(Confidence::High),
            "medium" => Ok(Confidence::Medium),
            "low" => Ok(Confidence::Low),
            _ => Ok(Confidence::Unknown),
        }
    }
}

/// Immutable record of an uploaded blob (§3 "File").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub project_id: String,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub content_hash: String,
    pub object_key: String,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

/// A processed view of a file (§3 "Knowledge Asset").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeAsset {
    pub id: Uuid,
    pub file_id: Uuid,
    pub project_id: String,
    pub title: String,
    pub document_type: String,
    pub status: AssetStatus,
    pub visibility: Visibility,
    pub embedding_model_id: String,
    pub chunk_count: i64,
    pub token_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A contiguous, bounded piece of an asset's text (§3 "Chunk").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub sequence: i64,
    pub chunk_type: ChunkType,
    pub section_path: String,
    pub page: Option<i64>,
    pub token_count: i64,
    pub content: String,
    pub content_hash: String,
    pub embedding_model_id: String,
    pub created_at: DateTime<Utc>,
}

/// A chunk's embedding plus the denormalised payload used for single-hop
/// retrieval (§3 "Vector Point", §9 "Cyclic dependencies").
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub point_id: Uuid,
    pub vector: Vec<f32>,
    pub payload: VectorPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPayload {
    pub asset_id: Uuid,
    pub project_id: String,
    pub visibility: Visibility,
    pub sequence: i64,
    pub chunk_text: String,
    pub section_path: String,
    pub page: Option<i64>,
}

/// Processing Job record driving idempotent ingestion retries (§3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub state: JobState,
    pub attempt_count: i64,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Audit record of a synchronous query (§3 "Query Record").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: Uuid,
    pub project_id: String,
    pub user_id: String,
    pub question: String,
    pub top_k: i64,
    pub threshold: f32,
    pub answer: String,
    pub confidence: Confidence,
    pub citations: Vec<Citation>,
    pub latency_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// A single piece of evidence backing a synthesised answer (§4.4 "Citation
/// preparation", §6 response shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: Uuid,
    pub asset_id: Uuid,
    pub section_path: String,
    pub page: Option<i64>,
    pub sequence: i64,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn visibility_round_trips_through_str() {
        assert_eq!(Visibility::from_str("public").unwrap(), Visibility::Public);
        assert_eq!(Visibility::Public.as_str(), "public");
        assert!(Visibility::from_str("bogus").is_err());
    }

    #[test]
    fn confidence_never_defaults_to_medium() {
        assert_eq!(Confidence::from_str("").unwrap(), Confidence::Unknown);
        assert_eq!(Confidence::from_str("bogus").unwrap(), Confidence::Unknown);
        assert_eq!(Confidence::from_str("HIGH").unwrap(), Confidence::High);
    }

    #[test]
    fn job_state_rejects_unknown_strings() {
        assert!(JobState::from_str("canceled").is_err());
        assert_eq!(JobState::from_str("queued").unwrap(), JobState::Queued);
    }
}
