//! Async store seam used by the sync and query paths.
//!
//! `OutcomeStore` is the only way the rest of the crate touches persisted
//! records. The SQLite implementation runs every call on the blocking pool
//! under a timeout; a timed-out write never commits.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::db::{DbOutcome, NameFilter, OutcomeDb, StoreError};
use crate::types::OutcomeRecord;

#[async_trait]
pub trait OutcomeStore: Send + Sync {
    /// Insert-or-overwrite keyed on `(full_name, subject)`. All or nothing.
    async fn upsert_batch(&self, records: Vec<OutcomeRecord>) -> Result<usize, StoreError>;

    /// Records whose folded name contains the filter pattern.
    async fn search(&self, filter: NameFilter) -> Result<Vec<DbOutcome>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

/// `OutcomeStore` over a single SQLite connection.
///
/// rusqlite connections are `Send` but not `Sync`; the connection is held
/// behind a `parking_lot::Mutex` and only locked on the blocking pool.
#[derive(Clone)]
pub struct SqliteOutcomeStore {
    db: Arc<Mutex<OutcomeDb>>,
    timeout: Duration,
}

impl SqliteOutcomeStore {
    pub fn new(db: OutcomeDb, timeout: Duration) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            timeout,
        }
    }

    /// Run `op` on the blocking pool, bounded by the store timeout.
    ///
    /// Waiting for the connection is bounded by the same timeout, so a wedged
    /// connection does not pile up parked threads. A write that outlives its
    /// caller is rolled back: `op` gets the call's [`CallState`] and must
    /// [`claim`](CallState::claim) it before committing.
    async fn run_blocking<T, F>(&self, label: &'static str, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&OutcomeDb, &CallState) -> Result<T, StoreError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let timeout = self.timeout;
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let state = CallState::default();
        let worker_state = state.clone();

        let mut handle = tokio::task::spawn_blocking(move || {
            let Some(guard) = db.try_lock_for(timeout) else {
                return Err(StoreError::Timeout(timeout_ms));
            };
            if worker_state.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            op(&guard, &worker_state)
        });

        let joined = match tokio::time::timeout(timeout, &mut handle).await {
            Ok(joined) => joined,
            Err(_) if state.cancel() => {
                log::warn!("Store: {} timed out after {} ms", label, timeout_ms);
                return Err(StoreError::Timeout(timeout_ms));
            }
            // The worker already claimed its commit; its outcome is the answer.
            Err(_) => handle.await,
        };
        joined.map_err(|join_err| {
            StoreError::Unavailable(format!("{} worker failed: {}", label, join_err))
        })?
    }
}

const CALL_RUNNING: u8 = 0;
const CALL_COMMITTING: u8 = 1;
const CALL_CANCELLED: u8 = 2;

/// Shared between a store call and its blocking worker. Exactly one of
/// `claim` (worker, before COMMIT) and `cancel` (caller, on timeout) wins.
#[derive(Clone, Default)]
pub(crate) struct CallState(Arc<AtomicU8>);

impl CallState {
    pub(crate) fn claim(&self) -> bool {
        self.0
            .compare_exchange(CALL_RUNNING, CALL_COMMITTING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn cancel(&self) -> bool {
        self.0
            .compare_exchange(CALL_RUNNING, CALL_CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire) == CALL_CANCELLED
    }
}

#[async_trait]
impl OutcomeStore for SqliteOutcomeStore {
    async fn upsert_batch(&self, records: Vec<OutcomeRecord>) -> Result<usize, StoreError> {
        self.run_blocking("upsert_batch", move |db, call| {
            db.upsert_outcomes_if(&records, || call.claim())
        })
        .await
    }

    async fn search(&self, filter: NameFilter) -> Result<Vec<DbOutcome>, StoreError> {
        self.run_blocking("search", move |db, _| db.search_outcomes(&filter))
            .await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.run_blocking("count", |db, _| db.count()).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn store() -> SqliteOutcomeStore {
        SqliteOutcomeStore::new(
            OutcomeDb::open_in_memory().expect("open"),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_sqlite_store_upsert_and_search() {
        let store = store();
        let written = store
            .upsert_batch(vec![OutcomeRecord {
                full_name: "Ivanov Ivan".to_string(),
                group: "ТЕ-21б".to_string(),
                subject: "Math".to_string(),
                status: true,
                position: 1,
                updated_at: Utc::now(),
            }])
            .await
            .expect("upsert");
        assert_eq!(written, 1);

        let found = store
            .search(NameFilter::containing("ivanov ivan"))
            .await
            .expect("search");
        assert_eq!(found.len(), 1);
        assert_eq!(store.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_sqlite_store_times_out_when_connection_is_held() {
        let store = SqliteOutcomeStore {
            db: Arc::new(Mutex::new(OutcomeDb::open_in_memory().expect("open"))),
            timeout: Duration::from_millis(50),
        };
        let held = Arc::clone(&store.db);
        let guard = held.lock();
        let err = store.count().await.expect_err("should time out");
        drop(guard);
        assert!(matches!(err, StoreError::Timeout(50)), "got {:?}", err);
    }

    fn short_timeout_store() -> SqliteOutcomeStore {
        SqliteOutcomeStore {
            db: Arc::new(Mutex::new(OutcomeDb::open_in_memory().expect("open"))),
            timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_timed_out_upsert_never_commits() {
        let store = short_timeout_store();
        let held = Arc::clone(&store.db);
        let guard = held.lock();
        let err = store
            .upsert_batch(vec![OutcomeRecord {
                full_name: "Ivanov Ivan".to_string(),
                group: "TE-21".to_string(),
                subject: "Math".to_string(),
                status: true,
                position: 1,
                updated_at: Utc::now(),
            }])
            .await
            .expect_err("should time out");
        assert!(matches!(err, StoreError::Timeout(50)), "got {:?}", err);
        drop(guard);

        // Give an abandoned worker every chance to finish.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn test_claimed_write_is_awaited_past_timeout() {
        let store = short_timeout_store();
        let result = store
            .run_blocking("slow_commit", |_, call| {
                assert!(call.claim());
                std::thread::sleep(Duration::from_millis(150));
                Ok(7)
            })
            .await;
        assert_eq!(result.expect("claimed call completes"), 7);
    }

    #[test]
    fn test_call_state_claim_and_cancel_are_exclusive() {
        let won = CallState::default();
        assert!(won.claim());
        assert!(!won.cancel());
        assert!(!won.is_cancelled());

        let lost = CallState::default();
        assert!(lost.cancel());
        assert!(!lost.claim());
        assert!(lost.is_cancelled());
    }
}
