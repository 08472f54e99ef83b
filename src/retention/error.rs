use thiserror::Error;

use crate::db::DbError;

/// Failures surfaced by the retention engine.
#[derive(Debug, Error)]
pub enum RetentionError {
    /// Malformed input: bad date, unknown entity type.
    #[error("{0}")]
    Validation(String),

    /// Token mismatch or a table outside a strategy's whitelist.
    #[error("{0}")]
    Security(String),

    /// Cutoff inside the protected window.
    #[error("{0}")]
    SafetyViolation(String),

    #[error("{0}")]
    NotFound(String),

    /// A deletion batch failed after `deleted` rows had already been committed.
    #[error("Prune stopped after deleting {deleted} records: {source}")]
    PartialFailure {
        deleted: u64,
        #[source]
        source: DbError,
    },

    #[error(transparent)]
    Database(#[from] DbError),

    /// The export sink went away mid-stream. No footer was written.
    #[error("Export aborted after {records_written} records")]
    StreamAborted { records_written: u64 },

    /// Candidates were deleted while their export was streaming. No footer
    /// was written.
    #[error("Expected {expected} records but only {exported} were still present")]
    CandidatesChanged { expected: u64, exported: u64 },

    #[error("Failed to serialize export envelope: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type RetentionResult<T> = Result<T, RetentionError>;
