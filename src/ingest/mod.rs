//! Spreadsheet → store sync.
//!
//! One cycle fetches every configured range, normalizes rows into
//! `OutcomeRecord`s and writes them in a single batch. A range that cannot
//! be fetched or parsed is skipped with a warning; the rest still land.

pub mod normalize;
pub mod poller;

use chrono::Utc;

use crate::error::SyncError;
use crate::source::SheetSource;
use crate::store::OutcomeStore;
use crate::types::{OutcomeRecord, RangeReport, RangeSpec, SyncReport};

/// Run one sync cycle. Never fails as a whole; problems are recorded in the
/// returned report and logged.
pub async fn sync(
    source: &dyn SheetSource,
    store: &dyn OutcomeStore,
    ranges: &[RangeSpec],
) -> SyncReport {
    let cycle_id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now();
    log::info!("Sync {}: starting ({} ranges)", cycle_id, ranges.len());

    let mut batch: Vec<OutcomeRecord> = Vec::new();
    let mut reports = Vec::with_capacity(ranges.len());
    let mut first_error: Option<String> = None;

    for spec in ranges {
        let group = spec.group_label();
        match fetch_range(source, spec, started_at).await {
            Ok(records) => {
                log::info!(
                    "Sync {}: range {} ({}) yielded {} records",
                    cycle_id,
                    spec.range,
                    group,
                    records.len()
                );
                reports.push(RangeReport {
                    range: spec.range.clone(),
                    group,
                    records: records.len(),
                    skipped: false,
                    warning: None,
                });
                batch.extend(records);
            }
            Err(e) => {
                log::warn!(
                    "Sync {}: skipping range {}: {} (retryable: {})",
                    cycle_id,
                    spec.range,
                    e,
                    e.is_retryable()
                );
                let message = e.to_string();
                first_error.get_or_insert_with(|| message.clone());
                reports.push(RangeReport {
                    range: spec.range.clone(),
                    group,
                    records: 0,
                    skipped: true,
                    warning: Some(message),
                });
            }
        }
    }

    let (records_written, committed) = if batch.is_empty() {
        (0, true)
    } else {
        match store.upsert_batch(batch).await {
            Ok(n) => (n, true),
            Err(e) => {
                let e = SyncError::StoreWrite(e);
                log::error!("Sync {}: {} (retryable: {})", cycle_id, e, e.is_retryable());
                first_error.get_or_insert_with(|| e.to_string());
                (0, false)
            }
        }
    };

    let report = SyncReport {
        cycle_id,
        started_at,
        finished_at: Utc::now(),
        ranges: reports,
        records_written,
        committed,
        first_error,
    };
    log::info!(
        "Sync {}: finished, {} records written, {} ranges skipped",
        report.cycle_id,
        report.records_written,
        report.skipped_ranges().count()
    );
    report
}

async fn fetch_range(
    source: &dyn SheetSource,
    spec: &RangeSpec,
    now: chrono::DateTime<Utc>,
) -> Result<Vec<OutcomeRecord>, SyncError> {
    let rows = source
        .get_values(&spec.range)
        .await
        .map_err(|e| SyncError::SourceFetch {
            range: spec.range.clone(),
            reason: e.to_string(),
            retryable: e.is_retryable(),
        })?;

    if rows.len() < 2 {
        return Err(SyncError::MalformedRange {
            range: spec.range.clone(),
            reason: format!("expected a header and at least one data row, got {} rows", rows.len()),
        });
    }

    let normalized = normalize::normalize_range(spec, &rows, now)?;
    if normalized.skipped_rows > 0 {
        log::debug!(
            "Range {}: {} rows without identity skipped",
            spec.range,
            normalized.skipped_rows
        );
    }
    Ok(normalized.records)
}
