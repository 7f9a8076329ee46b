//! Spreadsheet source seam used by the sync path.

use async_trait::async_trait;

use crate::google_api::GoogleApiError;

/// Read-only access to rectangular blocks of a spreadsheet.
///
/// Returned rows are string cells; blank cells are empty strings and rows
/// may be shorter than the header (trailing blanks are omitted by the API).
#[async_trait]
pub trait SheetSource: Send + Sync {
    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>, GoogleApiError>;
}
