// 🚨 Error taxonomy for the dimension engine
//
// Record-fatal errors are caught by the driver and tallied.
// Batch-fatal errors abort the run with the partial summary.

use chrono::{DateTime, Utc};

use crate::driver::RunSummary;

/// Result type for dimension operations.
pub type Result<T> = std::result::Result<T, ScdError>;

#[derive(Debug, thiserror::Error)]
pub enum ScdError {
    /// Bad source row, or a bad header when raised by the extractor constructor.
    #[error("malformed input at row {row}: {reason}")]
    MalformedInput {
        /// 1-based data row number; 0 means the header.
        row: usize,
        natural_key: Option<String>,
        reason: String,
    },

    /// The row handed to the writer is no longer the stored current row.
    #[error("stale row for '{natural_key}' (surrogate key {surrogate_key})")]
    StaleRow {
        natural_key: String,
        surrogate_key: i64,
    },

    /// Expiring the row would produce an empty or inverted interval.
    #[error(
        "cannot expire '{natural_key}': effective_start {effective_start} is not before run timestamp {run_timestamp}"
    )]
    NonMonotonicTimestamp {
        natural_key: String,
        effective_start: DateTime<Utc>,
        run_timestamp: DateTime<Utc>,
    },

    /// Backend I/O failure not covered by a more specific variant.
    #[error("dimension store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScdError {
    pub fn malformed(row: usize, natural_key: Option<String>, reason: impl Into<String>) -> Self {
        ScdError::MalformedInput {
            row,
            natural_key,
            reason: reason.into(),
        }
    }

    /// Batch-fatal errors stop the driver; everything else fails only the record.
    pub fn is_batch_fatal(&self) -> bool {
        match self {
            ScdError::MalformedInput { row, .. } => *row == 0,
            ScdError::StaleRow { .. } | ScdError::NonMonotonicTimestamp { .. } => false,
            ScdError::StoreUnavailable(_)
            | ScdError::Sqlite(_)
            | ScdError::InvalidConfig(_)
            | ScdError::Csv(_)
            | ScdError::Json(_)
            | ScdError::Io(_) => true,
        }
    }

    /// Natural key the error is about, when known.
    pub fn natural_key(&self) -> Option<&str> {
        match self {
            ScdError::MalformedInput { natural_key, .. } => natural_key.as_deref(),
            ScdError::StaleRow { natural_key, .. }
            | ScdError::NonMonotonicTimestamp { natural_key, .. } => Some(natural_key),
            _ => None,
        }
    }
}

/// A batch-fatal error together with everything tallied before it.
#[derive(Debug, thiserror::Error)]
#[error("reconciliation run aborted after {} records: {error}", summary.processed)]
pub struct AbortedRun {
    pub summary: RunSummary,
    #[source]
    pub error: ScdError,
}
