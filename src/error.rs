// ⚠️ Error Taxonomy - what fails, and what is allowed to fail loudly
//
// Only persistence and configuration failures propagate to the caller.
// Source failures, quota exhaustion and partial aggregation are absorbed
// and surface as a lower source count / confidence in the assessment.

use chrono::NaiveDate;
use thiserror::Error;

// ============================================================================
// SOURCE ERRORS (adapter level)
// ============================================================================

/// Failure of a single Source Adapter call
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Source call timed out after {0} seconds")]
    Timeout(u64),

    #[error("Rate limited by source")]
    RateLimited,

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),
}

// ============================================================================
// MONITOR ERRORS (core taxonomy)
// ============================================================================

#[derive(Debug, Error)]
pub enum MonitorError {
    /// Source that errored, excluded for the rest of the day
    #[error("Source {source_id} unavailable: {reason}")]
    SourceUnavailable { source_id: String, reason: String },

    /// No source is within its daily budget
    #[error("All sources exhausted their daily quota for {day}")]
    QuotaExhausted { day: NaiveDate },

    /// Snapshot / counter / archive write failure
    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MonitorError {
    /// Fatal errors must reach the caller; everything else is absorbed
    pub fn is_fatal(&self) -> bool {
        matches!(self, MonitorError::Persistence(_) | MonitorError::Config(_))
    }
}

impl From<rusqlite::Error> for MonitorError {
    fn from(err: rusqlite::Error) -> Self {
        MonitorError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        MonitorError::Persistence(format!("serialization: {}", err))
    }
}

impl From<std::io::Error> for MonitorError {
    fn from(err: std::io::Error) -> Self {
        MonitorError::Persistence(format!("io: {}", err))
    }
}

pub type MonitorResult<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_persistence_and_config_are_fatal() {
        assert!(MonitorError::Persistence("disk full".into()).is_fatal());
        assert!(MonitorError::Config("missing entity list".into()).is_fatal());

        let absorbed = MonitorError::SourceUnavailable {
            source_id: "kr36".into(),
            reason: "timeout".into(),
        };
        assert!(!absorbed.is_fatal());

        let exhausted = MonitorError::QuotaExhausted {
            day: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        };
        assert!(!exhausted.is_fatal());
    }

    #[test]
    fn test_sqlite_errors_map_to_persistence() {
        let err: MonitorError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, MonitorError::Persistence(_)));
    }
}
