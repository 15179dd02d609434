//! Sidecar record of classifier retry attempts for metadata-pending items.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};

const DATA_DIR_NAME: &str = "scenecast";
const INDEX_FILE_NAME: &str = "retry_index.db";

pub struct RetryIndex {
    conn: Connection,
}

pub fn default_index_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(DATA_DIR_NAME)
        .join(INDEX_FILE_NAME)
}

fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

impl RetryIndex {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        let index = Self {
            conn: Connection::open(path)?,
        };
        index.initialize_schema()?;
        Ok(index)
    }

    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let index = Self {
            conn: Connection::open_in_memory()?,
        };
        index.initialize_schema()?;
        Ok(index)
    }

    fn initialize_schema(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS pending_retries (
                item_id TEXT PRIMARY KEY,
                attempts INTEGER NOT NULL,
                last_attempt_unix_ms INTEGER NOT NULL,
                last_error TEXT
            )",
            [],
        )?;
        Ok(())
    }

    pub fn attempts(&self, item_id: &str) -> Result<u32, rusqlite::Error> {
        let attempts: Option<i64> = self
            .conn
            .query_row(
                "SELECT attempts FROM pending_retries WHERE item_id = ?1",
                params![item_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(attempts.unwrap_or(0).max(0) as u32)
    }

    /// Counts one more attempt for `item_id` and returns the new total.
    pub fn record_attempt(
        &self,
        item_id: &str,
        last_error: Option<&str>,
    ) -> Result<u32, rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO pending_retries (item_id, attempts, last_attempt_unix_ms, last_error)
             VALUES (?1, 1, ?2, ?3)
             ON CONFLICT(item_id) DO UPDATE SET
                attempts = attempts + 1,
                last_attempt_unix_ms = excluded.last_attempt_unix_ms,
                last_error = excluded.last_error",
            params![item_id, now_unix_ms(), last_error],
        )?;
        self.attempts(item_id)
    }

    pub fn clear(&self, item_id: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "DELETE FROM pending_retries WHERE item_id = ?1",
            params![item_id],
        )?;
        Ok(())
    }

    /// Drops rows for ids that are no longer pending. Returns the number removed.
    pub fn retain_only(&self, pending_ids: &BTreeSet<String>) -> Result<usize, rusqlite::Error> {
        let mut stmt = self.conn.prepare("SELECT item_id FROM pending_retries")?;
        let stored = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut removed = 0;
        for item_id in stored
            .iter()
            .filter(|item_id| !pending_ids.contains(*item_id))
        {
            self.clear(item_id)?;
            removed += 1;
        }
        Ok(removed)
    }
}
