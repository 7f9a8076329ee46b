//! Sheet rows → canonical outcome records.
//!
//! Pure functions; no I/O. The layout of each range is explicit
//! (`LayoutMode`), so nothing here guesses from header content.

use chrono::{DateTime, Utc};

use crate::error::SyncError;
use crate::names;
use crate::types::{LayoutMode, NameOrder, NarrowLayout, OutcomeRecord, RangeSpec, WideLayout};

/// Cell values that mean "passed". Compared after trimming and lowercasing.
const PASSED_MARKERS: &[&str] = &["✅", "✔", "✔️", "true", "сдано"];

/// True iff the cell holds a recognized completion marker.
pub fn is_passed_marker(raw: &str) -> bool {
    let value = raw.trim().to_lowercase();
    PASSED_MARKERS.contains(&value.as_str())
}

/// Records produced from one range plus what was dropped on the way.
#[derive(Debug, Default)]
pub struct Normalized {
    pub records: Vec<OutcomeRecord>,
    pub skipped_rows: usize,
}

/// Convert a fetched block (header row first) into records stamped with
/// `updated_at`. Callers guarantee `rows.len() >= 2`.
pub fn normalize_range(
    spec: &RangeSpec,
    rows: &[Vec<String>],
    updated_at: DateTime<Utc>,
) -> Result<Normalized, SyncError> {
    let Some((header, data)) = rows.split_first() else {
        return Ok(Normalized::default());
    };
    let group = spec.group_label();
    match &spec.layout {
        LayoutMode::Wide(layout) => {
            normalize_wide(spec, layout, header, data, &group, updated_at)
        }
        LayoutMode::Narrow(layout) => {
            normalize_narrow(spec, layout, header, data, &group, updated_at)
        }
    }
}

fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(String::as_str).unwrap_or("")
}

fn identity(row: &[String], columns: &[usize], order: NameOrder) -> Option<String> {
    let joined = columns
        .iter()
        .map(|&c| cell(row, c).trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let name = names::canonical_name(&joined, order);
    (!name.is_empty()).then_some(name)
}

fn normalize_wide(
    spec: &RangeSpec,
    layout: &WideLayout,
    header: &[String],
    data: &[Vec<String>],
    group: &str,
    updated_at: DateTime<Utc>,
) -> Result<Normalized, SyncError> {
    let start = layout.subject_start();
    let subjects: Vec<(usize, String)> = header
        .iter()
        .enumerate()
        .skip(start)
        .map(|(idx, h)| (idx, names::clean(h)))
        .filter(|(_, h)| !h.is_empty())
        .collect();

    if subjects.is_empty() {
        return Err(SyncError::MalformedRange {
            range: spec.range.clone(),
            reason: format!("no subject headers from column {}", start),
        });
    }

    let mut out = Normalized::default();
    for row in data {
        let Some(full_name) = identity(row, &layout.name_columns, spec.name_order) else {
            out.skipped_rows += 1;
            continue;
        };
        for (idx, subject) in &subjects {
            out.records.push(OutcomeRecord {
                full_name: full_name.clone(),
                group: group.to_string(),
                subject: subject.clone(),
                status: is_passed_marker(cell(row, *idx)),
                position: *idx as i64,
                updated_at,
            });
        }
    }
    Ok(out)
}

fn find_column(header: &[String], name: &str) -> Option<usize> {
    let wanted = names::fold(name);
    header.iter().position(|h| names::fold(h) == wanted)
}

fn normalize_narrow(
    spec: &RangeSpec,
    layout: &NarrowLayout,
    header: &[String],
    data: &[Vec<String>],
    group: &str,
    updated_at: DateTime<Utc>,
) -> Result<Normalized, SyncError> {
    let require = |name: &str| {
        find_column(header, name).ok_or_else(|| SyncError::MalformedRange {
            range: spec.range.clone(),
            reason: format!("header has no {:?} column", name),
        })
    };
    let name_col = require(&layout.full_name_header)?;
    let subject_col = require(&layout.subject_header)?;
    let status_col = require(&layout.status_header)?;
    let group_col = match layout.group_header.as_deref() {
        Some(h) => Some(require(h)?),
        None => None,
    };

    let mut out = Normalized::default();
    for (row_idx, row) in data.iter().enumerate() {
        let Some(full_name) = identity(row, &[name_col], spec.name_order) else {
            out.skipped_rows += 1;
            continue;
        };
        let subject = names::clean(cell(row, subject_col));
        if subject.is_empty() {
            out.skipped_rows += 1;
            continue;
        }
        let row_group = group_col
            .map(|c| names::clean(cell(row, c)))
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| group.to_string());

        out.records.push(OutcomeRecord {
            full_name,
            group: row_group,
            subject,
            status: is_passed_marker(cell(row, status_col)),
            position: row_idx as i64 + 1,
            updated_at,
        });
    }
    Ok(out)
}
