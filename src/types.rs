//! Shared domain types: sheet range descriptions, outcome records and the
//! shapes returned by a sync cycle and a subject query.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Source layout
// ============================================================================

/// Order in which a sheet writes the parts of a person's name.
///
/// Stored names are always family-first; `GivenFamily` sources are reordered
/// during ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NameOrder {
    #[default]
    FamilyGiven,
    GivenFamily,
}

/// One subject per column, one row per person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WideLayout {
    /// Columns holding the person's name. Several columns are joined with a
    /// single space in the listed order.
    #[serde(default = "default_name_columns")]
    pub name_columns: Vec<usize>,
    /// First subject column. Defaults to the column right after the last
    /// name column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_subject_column: Option<usize>,
}

fn default_name_columns() -> Vec<usize> {
    vec![1]
}

impl Default for WideLayout {
    fn default() -> Self {
        Self {
            name_columns: default_name_columns(),
            first_subject_column: None,
        }
    }
}

impl WideLayout {
    pub fn subject_start(&self) -> usize {
        self.first_subject_column.unwrap_or_else(|| {
            self.name_columns
                .iter()
                .max()
                .map(|c| c + 1)
                .unwrap_or(1)
        })
    }
}

/// One row per (person, subject); columns are located by header text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrowLayout {
    #[serde(default = "default_full_name_header")]
    pub full_name_header: String,
    #[serde(default = "default_subject_header")]
    pub subject_header: String,
    #[serde(default = "default_status_header")]
    pub status_header: String,
    /// Optional per-row group column; falls back to the range group when the
    /// cell is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_header: Option<String>,
}

fn default_full_name_header() -> String {
    "full_name".to_string()
}

fn default_subject_header() -> String {
    "subject".to_string()
}

fn default_status_header() -> String {
    "status".to_string()
}

impl Default for NarrowLayout {
    fn default() -> Self {
        Self {
            full_name_header: default_full_name_header(),
            subject_header: default_subject_header(),
            status_header: default_status_header(),
            group_header: None,
        }
    }
}

/// How a range's rows map onto outcome records. Chosen per range in config,
/// never guessed from header content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum LayoutMode {
    Wide(WideLayout),
    Narrow(NarrowLayout),
}

impl Default for LayoutMode {
    fn default() -> Self {
        LayoutMode::Wide(WideLayout::default())
    }
}

/// A rectangular block of a sheet: header row followed by data rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeSpec {
    /// A1 notation, e.g. `ТЕ-21б!A1:L100`.
    pub range: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub layout: LayoutMode,
    #[serde(default)]
    pub name_order: NameOrder,
}

impl RangeSpec {
    /// Group label for records from this range: the configured label, or the
    /// sheet name part of the A1 range.
    pub fn group_label(&self) -> String {
        if let Some(group) = self.group.as_deref().map(str::trim) {
            if !group.is_empty() {
                return group.to_string();
            }
        }
        let sheet = match self.range.rsplit_once('!') {
            Some((sheet, _)) => sheet,
            None => self.range.as_str(),
        };
        let sheet = sheet.trim();
        match sheet
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
        {
            Some(quoted) => quoted.replace("''", "'"),
            None => sheet.to_string(),
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// One (person, subject, pass/fail) fact, as written to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    pub full_name: String,
    pub group: String,
    pub subject: String,
    pub status: bool,
    /// Source order of the subject within its range.
    pub position: i64,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Sync results
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeReport {
    pub range: String,
    pub group: String,
    pub records: usize,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Outcome of one fetch-normalize-upsert cycle across all configured ranges.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ranges: Vec<RangeReport>,
    /// Rows accepted by the store; 0 when the batch was rolled back.
    pub records_written: usize,
    pub committed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_error: Option<String>,
}

impl SyncReport {
    pub fn skipped_ranges(&self) -> impl Iterator<Item = &RangeReport> {
        self.ranges.iter().filter(|r| r.skipped)
    }
}

// ============================================================================
// Query results
// ============================================================================

/// Subjects recorded for one person, split by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectOutcomes {
    pub passed: Vec<String>,
    pub not_passed: Vec<String>,
    pub group: Option<String>,
    /// Newest `updated_at` among the matched records.
    pub last_synced_at: Option<DateTime<Utc>>,
}
