//! SQLite-backed store for synced outcome records.
//!
//! The database lives at `~/.portfolio-sync/portfolio.db` unless configured
//! otherwise. The spreadsheet stays the source of truth; this table is the
//! queryable copy the HTTP API reads from.

use std::path::PathBuf;

use rusqlite::Connection;

mod outcomes;
pub mod types;
pub use types::*;

pub struct OutcomeDb {
    conn: Connection,
}

impl OutcomeDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Self) -> Result<T, StoreError>,
    {
        self.with_transaction_if(f, || true)
    }

    /// Like [`with_transaction`](Self::with_transaction), but `may_commit`
    /// is asked right before COMMIT; `false` rolls back with
    /// `StoreError::Cancelled`.
    pub fn with_transaction_if<F, T, G>(&self, f: F, may_commit: G) -> Result<T, StoreError>
    where
        F: FnOnce(&Self) -> Result<T, StoreError>,
        G: FnOnce() -> bool,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        let result = f(self).and_then(|val| {
            if may_commit() {
                Ok(val)
            } else {
                Err(StoreError::Cancelled)
            }
        });
        match result {
            Ok(val) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    log::warn!("Rollback after failed transaction also failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    /// Open (or create) the database at `path` and apply the schema.
    pub fn open_at(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(StoreError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL lets queries read while a sync batch is being written
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        Self::from_connection(conn)
    }

    /// Fresh in-memory database with the schema applied. Used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        crate::migrations::run_migrations(&conn).map_err(StoreError::Migration)?;
        Ok(Self { conn })
    }

    /// Resolve the default database path: `~/.portfolio-sync/portfolio.db`.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let home = dirs::home_dir().ok_or(StoreError::HomeDirNotFound)?;
        Ok(home.join(".portfolio-sync").join("portfolio.db"))
    }
}
