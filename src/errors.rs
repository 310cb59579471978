use std::io;

use thiserror::Error;

use crate::types::SourceId;

/// Error type for fetch, configuration, and publish failures.
///
/// Per-row parse faults never surface here; they collapse into
/// [`Value::Absent`](crate::data::Value::Absent) during canonicalization.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("data source '{source_id}' is unavailable: {reason}")]
    SourceUnavailable { source_id: SourceId, reason: String },
    #[error("data source '{source_id}' returned inconsistent state: {details}")]
    SourceInconsistent {
        source_id: SourceId,
        details: String,
    },
    #[error("feature store rejected the request: {details}")]
    StoreRejected { details: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Shorthand for a fetch fault against `source_id`.
    pub fn unavailable(source_id: impl Into<SourceId>, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            source_id: source_id.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a malformed payload from `source_id`.
    pub fn inconsistent(source_id: impl Into<SourceId>, details: impl Into<String>) -> Self {
        Self::SourceInconsistent {
            source_id: source_id.into(),
            details: details.into(),
        }
    }
}
