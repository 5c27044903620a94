//! Internal state store
//!
//! Persists every internal state, definition and value together, as one JSON
//! document per state name in SQLite. Writes are upserts; nothing here
//! triggers action evaluation.

use esp_core::StoredInternalState;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, instrument};

/// Errors raised by the store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode state: {0}")]
    Json(#[from] serde_json::Error),

    #[error("state store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// SQLite-backed internal state store
///
/// # Schema
///
/// ```sql
/// CREATE TABLE internal_state (
///     key TEXT PRIMARY KEY,
///     value TEXT NOT NULL
/// );
/// ```
///
/// `value` holds the JSON-encoded [`StoredInternalState`]. A single mutex
/// guards the connection, so every operation is serialized.
pub struct InternalStateStore {
    conn: Mutex<Connection>,
}

impl InternalStateStore {
    /// Open (or create) a file-backed store
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "Opened state database");
        Self::with_connection(conn)
    }

    /// Store that lives only as long as the process
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS internal_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn get(&self, name: &str) -> StoreResult<Option<StoredInternalState>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM internal_state WHERE key = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace a state
    #[instrument(skip(self, state), fields(state = %state.name))]
    pub fn set(&self, state: &StoredInternalState) -> StoreResult<()> {
        let value = serde_json::to_string(state)?;
        self.conn()?.execute(
            "INSERT INTO internal_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![state.name, value],
        )?;
        debug!(value = %state.value, "Stored state");
        Ok(())
    }

    /// Insert a state unless one with the same name exists
    ///
    /// Returns whether it was inserted.
    #[instrument(skip(self, state), fields(state = %state.name))]
    pub fn set_if_absent(&self, state: &StoredInternalState) -> StoreResult<bool> {
        let value = serde_json::to_string(state)?;
        let inserted = self.conn()?.execute(
            "INSERT OR IGNORE INTO internal_state (key, value) VALUES (?1, ?2)",
            params![state.name, value],
        )?;
        Ok(inserted > 0)
    }

    /// Upsert many states in one transaction
    #[instrument(skip_all, fields(count = states.len()))]
    pub fn bulk_set(&self, states: &[StoredInternalState]) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO internal_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )?;
            for state in states {
                stmt.execute(params![state.name, serde_json::to_string(state)?])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Insert every state that is not stored yet, in one transaction
    ///
    /// Returns how many were inserted.
    #[instrument(skip_all, fields(count = states.len()))]
    pub fn bulk_set_if_absent(&self, states: &[StoredInternalState]) -> StoreResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt =
                tx.prepare("INSERT OR IGNORE INTO internal_state (key, value) VALUES (?1, ?2)")?;
            for state in states {
                inserted += stmt.execute(params![state.name, serde_json::to_string(state)?])?;
            }
        }
        tx.commit()?;
        debug!(inserted, "Seeded states");
        Ok(inserted)
    }

    /// Remove a state, returning whether it existed
    #[instrument(skip(self))]
    pub fn delete(&self, name: &str) -> StoreResult<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM internal_state WHERE key = ?1", [name])?;
        Ok(removed > 0)
    }

    /// All stored state names, sorted
    pub fn list_keys(&self) -> StoreResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key FROM internal_state ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}
