//! Shared type definitions for the database layer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Errors specific to store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Store operation timed out after {0} ms")]
    Timeout(u64),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Stored row is corrupt: {0}")]
    Corrupt(String),

    #[error("Write abandoned by its caller; transaction rolled back")]
    Cancelled,
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Sqlite(_)
                | StoreError::Timeout(_)
                | StoreError::Unavailable(_)
                | StoreError::Cancelled
        )
    }
}

/// A row from the `outcome_records` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbOutcome {
    pub full_name: String,
    pub subject: String,
    pub status: bool,
    pub group: String,
    pub position: i64,
    pub updated_at: DateTime<Utc>,
}

/// Substring search over stored names, optionally narrowed to one status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameFilter {
    /// Already folded with [`crate::names::fold`].
    pub pattern: String,
    pub status: Option<bool>,
}

impl NameFilter {
    pub fn containing(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: bool) -> Self {
        self.status = Some(status);
        self
    }
}
