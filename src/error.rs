//! Stable, machine-readable error taxonomy for the RAG core.
//!
//! Operational code (CLI entry points, migrations) is free to use
//! `anyhow::Result` throughout; but everything the query façade (C10) exposes
//! over HTTP needs to map onto the error kinds of §7 without guessing at
//! `anyhow`'s message text. `CoreError` is that mapping: one variant per
//! disposition, each carrying a stable `code()` and enough detail for a
//! human-readable message. It implements `std::error::Error` so `anyhow`
//! still absorbs it with `?` anywhere that doesn't care about the kind.

use std::fmt;

#[derive(Debug)]
pub enum CoreError {
    /// Missing project, blank query, malformed request body.
    Validation(String),
    /// Asset/file/instance id does not resolve (or resolves but is not
    /// visible to the caller — we never leak which).
    NotFound(String),
    /// Cross-project access attempt against a private asset.
    Forbidden(String),
    /// Transient dependency failure after retries were exhausted (provider
    /// 5xx, vector index timeout).
    DependencyUnavailable(String),
    /// Non-retryable dependency mismatch (embedding dimension change, auth).
    DependencyMismatch(String),
    /// State conflict (e.g. compare-and-set lost a race).
    Conflict(String),
    /// Anything else; should be rare and always logged with full context.
    Internal(String),
}

impl CoreError {
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation",
            CoreError::NotFound(_) => "not_found",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::DependencyUnavailable(_) => "dependency_unavailable",
            CoreError::DependencyMismatch(_) => "dependency_mismatch",
            CoreError::Conflict(_) => "conflict",
            CoreError::Internal(_) => "internal",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CoreError::Validation(m)
            | CoreError::NotFound(m)
            | CoreError::Forbidden(m)
            | CoreError::DependencyUnavailable(m)
            | CoreError::DependencyMismatch(m)
            | CoreError::Conflict(m)
            | CoreError::Internal(m) => m,
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => CoreError::NotFound("record not found".to_string()),
            other => CoreError::Internal(other.to_string()),
        }
    }
}
