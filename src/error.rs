//! Error types for sync cycles, subject queries and startup.
//!
//! Errors are classified by recoverability:
//! - Retryable: source fetch failures, store timeouts (next tick retries)
//! - NonRetryable: bad query arguments, invalid configuration

use std::path::PathBuf;
use thiserror::Error;

use crate::db::StoreError;
use crate::google_api::GoogleApiError;

/// Errors raised inside one sync cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Failed to fetch range {range}: {reason}")]
    SourceFetch {
        range: String,
        reason: String,
        /// Whether the source reported a transient failure.
        retryable: bool,
    },

    #[error("Range {range} is malformed: {reason}")]
    MalformedRange { range: String, reason: String },

    #[error("Store write failed: {0}")]
    StoreWrite(#[source] StoreError),
}

impl SyncError {
    /// Returns true if the next scheduled tick may succeed without changes.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::SourceFetch { retryable, .. } => *retryable,
            SyncError::MalformedRange { .. } => false,
            SyncError::StoreWrite(e) => e.is_retryable(),
        }
    }
}

/// Errors surfaced by the subject query path.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl QueryError {
    /// Machine-readable code included in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::InvalidArgument(_) => "invalid_argument",
            QueryError::StoreUnavailable(StoreError::Timeout(_)) => "store_timeout",
            QueryError::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

/// Configuration problems. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file {path} could not be read: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Environment variable {name} has invalid value {value:?}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Anything that prevents the service from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Store could not be opened: {0}")]
    Store(#[from] StoreError),

    #[error("Spreadsheet source is not reachable: {0}")]
    Source(#[from] GoogleApiError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_error_retryability() {
        let fetch = SyncError::SourceFetch {
            range: "A!A1:B2".to_string(),
            reason: "timeout".to_string(),
            retryable: true,
        };
        assert!(fetch.is_retryable());

        let denied = SyncError::SourceFetch {
            range: "A!A1:B2".to_string(),
            reason: "API error 403: The caller does not have permission".to_string(),
            retryable: false,
        };
        assert!(!denied.is_retryable());

        let malformed = SyncError::MalformedRange {
            range: "A!A1:B2".to_string(),
            reason: "missing header".to_string(),
        };
        assert!(!malformed.is_retryable());

        assert!(SyncError::StoreWrite(StoreError::Timeout(5000)).is_retryable());
    }

    #[test]
    fn test_query_error_codes() {
        assert_eq!(
            QueryError::InvalidArgument("firstName".into()).code(),
            "invalid_argument"
        );
        assert_eq!(
            QueryError::StoreUnavailable(StoreError::Timeout(10)).code(),
            "store_timeout"
        );
        assert_eq!(
            QueryError::StoreUnavailable(StoreError::Unavailable("gone".into())).code(),
            "store_unavailable"
        );
    }
}
