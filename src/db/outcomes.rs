use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::*;
use crate::types::OutcomeRecord;

impl OutcomeDb {
    // =========================================================================
    // Outcome records
    // =========================================================================

    /// Upsert a batch of records in one transaction, keyed on
    /// `(full_name, subject)`. Either every record lands or none do.
    ///
    /// Returns the number of records written.
    pub fn upsert_outcomes(&self, records: &[OutcomeRecord]) -> Result<usize, StoreError> {
        self.upsert_outcomes_if(records, || true)
    }

    /// [`upsert_outcomes`](Self::upsert_outcomes) that commits only if
    /// `may_commit` still agrees once every row is staged.
    pub fn upsert_outcomes_if<G>(
        &self,
        records: &[OutcomeRecord],
        may_commit: G,
    ) -> Result<usize, StoreError>
    where
        G: FnOnce() -> bool,
    {
        self.with_transaction_if(
            |db| {
                let mut stmt = db.conn.prepare_cached(
                    "INSERT INTO outcome_records (
                        full_name, name_key, subject, group_label, status, position, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(full_name, subject) DO UPDATE SET
                        name_key = excluded.name_key,
                        group_label = excluded.group_label,
                        status = excluded.status,
                        position = excluded.position,
                        updated_at = excluded.updated_at",
                )?;
                for record in records {
                    stmt.execute(params![
                        record.full_name,
                        crate::names::fold(&record.full_name),
                        record.subject,
                        record.group,
                        record.status,
                        record.position,
                        record.updated_at.to_rfc3339(),
                    ])?;
                }
                Ok(records.len())
            },
            may_commit,
        )
    }

    /// All records whose folded name contains `filter.pattern`, in source
    /// order (group, name, position, subject).
    pub fn search_outcomes(&self, filter: &NameFilter) -> Result<Vec<DbOutcome>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT full_name, subject, status, group_label, position, updated_at
             FROM outcome_records
             WHERE instr(name_key, ?1) > 0
               AND (?2 IS NULL OR status = ?2)
             ORDER BY group_label, full_name, position, subject",
        )?;
        let rows = stmt.query_map(params![filter.pattern, filter.status], map_outcome_row)?;

        let mut out = Vec::new();
        for row in rows {
            let (full_name, subject, status, group, position, raw_ts) = row?;
            out.push(DbOutcome {
                full_name,
                subject,
                status,
                group,
                position,
                updated_at: parse_timestamp(&raw_ts)?,
            });
        }
        Ok(out)
    }

    /// Total number of stored records.
    pub fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM outcome_records", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or_default())
    }
}

type OutcomeRow = (String, String, bool, String, i64, String);

fn map_outcome_row(row: &Row<'_>) -> rusqlite::Result<OutcomeRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("updated_at {:?}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(name: &str, subject: &str, status: bool, position: i64) -> OutcomeRecord {
        OutcomeRecord {
            full_name: name.to_string(),
            group: "ТЕ-21б".to_string(),
            subject: subject.to_string(),
            status,
            position,
            updated_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_upsert_overwrites_same_key() {
        let db = OutcomeDb::open_in_memory().expect("open");
        db.upsert_outcomes(&[record("Ivanov Ivan", "Physics", false, 2)])
            .expect("first upsert");

        let mut updated = record("Ivanov Ivan", "Physics", true, 2);
        updated.group = "ТЕ-22".to_string();
        updated.updated_at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        db.upsert_outcomes(&[updated.clone()]).expect("second upsert");

        assert_eq!(db.count().expect("count"), 1);
        let rows = db
            .search_outcomes(&NameFilter::containing("ivanov ivan"))
            .expect("search");
        assert_eq!(rows.len(), 1);
        assert!(rows[0].status);
        assert_eq!(rows[0].group, "ТЕ-22");
        assert_eq!(rows[0].updated_at, updated.updated_at);
    }

    #[test]
    fn test_duplicate_keys_in_one_batch_last_wins() {
        let db = OutcomeDb::open_in_memory().expect("open");
        let written = db
            .upsert_outcomes(&[
                record("Ivanov Ivan", "Math", false, 1),
                record("Ivanov Ivan", "Math", true, 1),
            ])
            .expect("upsert");
        assert_eq!(written, 2);
        assert_eq!(db.count().expect("count"), 1);
        let rows = db
            .search_outcomes(&NameFilter::containing("ivanov"))
            .expect("search");
        assert!(rows[0].status);
    }

    #[test]
    fn test_search_is_substring_and_case_insensitive() {
        let db = OutcomeDb::open_in_memory().expect("open");
        db.upsert_outcomes(&[
            record("Иванов Иван Иванович", "Математика", true, 2),
            record("Петров Пётр", "Математика", false, 2),
        ])
        .expect("upsert");

        let rows = db
            .search_outcomes(&NameFilter::containing(crate::names::fold("ИВАНОВ иван")))
            .expect("search");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].full_name, "Иванов Иван Иванович");
    }

    #[test]
    fn test_search_with_status_filter() {
        let db = OutcomeDb::open_in_memory().expect("open");
        db.upsert_outcomes(&[
            record("Ivanov Ivan", "Math", true, 1),
            record("Ivanov Ivan", "Physics", false, 2),
        ])
        .expect("upsert");

        let passed = db
            .search_outcomes(&NameFilter::containing("ivanov").with_status(true))
            .expect("search");
        assert_eq!(passed.len(), 1);
        assert_eq!(passed[0].subject, "Math");

        let failed = db
            .search_outcomes(&NameFilter::containing("ivanov").with_status(false))
            .expect("search");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].subject, "Physics");
    }

    #[test]
    fn test_search_orders_by_position() {
        let db = OutcomeDb::open_in_memory().expect("open");
        db.upsert_outcomes(&[
            record("Ivanov Ivan", "Zoology", true, 1),
            record("Ivanov Ivan", "Algebra", true, 5),
        ])
        .expect("upsert");
        let subjects: Vec<String> = db
            .search_outcomes(&NameFilter::containing("ivanov"))
            .expect("search")
            .into_iter()
            .map(|r| r.subject)
            .collect();
        assert_eq!(subjects, vec!["Zoology", "Algebra"]);
    }
}
