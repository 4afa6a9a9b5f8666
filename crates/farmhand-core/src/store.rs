//! SQLite persistence for the history log.
//!
//! The log lives in a single named slot as one JSON document. Every save
//! replaces the whole document in one statement, so a crash leaves either
//! the previous log or the new one, never a mix.

use crate::{FarmhandError, Result};
use chrono::Utc;
use farmhand_types::HistoryEntry;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Slot holding the serialized history log.
pub const HISTORY_SLOT: &str = "farmhand-history";

/// Named-slot store backed by SQLite.
pub struct HistoryStore {
    conn: Mutex<Connection>,
}

impl HistoryStore {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a throwaway in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS slots (
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Raw contents of a slot.
    pub fn read_slot(&self, name: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM slots WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Replace the contents of a slot.
    pub fn write_slot(&self, name: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO slots (name, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![name, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Load the persisted history log.
    ///
    /// A missing slot or an unparseable document yields an empty log.
    /// Only database failures are returned as errors.
    pub fn load_history(&self) -> Result<Vec<HistoryEntry>> {
        let Some(raw) = self.read_slot(HISTORY_SLOT)? else {
            debug!(target: "farmhand::store", "No stored history, starting empty");
            return Ok(Vec::new());
        };

        match serde_json::from_str::<Vec<HistoryEntry>>(&raw) {
            Ok(entries) => {
                debug!(target: "farmhand::store", "Loaded {} history entries", entries.len());
                Ok(entries)
            }
            Err(e) => {
                warn!(target: "farmhand::store", "Discarding corrupt history slot: {}", e);
                Ok(Vec::new())
            }
        }
    }

    /// Persist the full history log, replacing what was stored.
    pub fn save_history(&self, entries: &[HistoryEntry]) -> Result<()> {
        let json = serde_json::to_string(entries)?;
        self.write_slot(HISTORY_SLOT, &json)
            .map_err(|e| FarmhandError::Persistence(e.to_string()))
    }
}
