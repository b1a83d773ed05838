//! Content-addressed verdict cache.
//!
//! Records are keyed by `(source_id, sheet_name, row_number)`; the status text
//! and comment fingerprint are stored alongside as freshness guards, so a lookup
//! only hits when the row content is unchanged. One connection sits behind a
//! mutex, which serializes readers and writers across worker threads.
use crate::util::sha256_hex;
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS llm_cache (
    source_id TEXT NOT NULL,
    sheet_name TEXT NOT NULL,
    row_number INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    comment_hash TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    updated_at REAL NOT NULL,
    PRIMARY KEY (source_id, sheet_name, row_number)
)";

/// Stable fingerprint of trimmed comment text; absent hashes as empty.
pub fn comment_fingerprint(comment: Option<&str>) -> String {
    sha256_hex(comment.unwrap_or("").trim().as_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub source_id: String,
    pub sheet_name: String,
    pub row_number: usize,
    pub status_text: String,
    pub comment_fingerprint: String,
}

impl CacheKey {
    pub fn new(
        source_id: &str,
        sheet_name: &str,
        row_number: usize,
        status_text: &str,
        comment: &str,
    ) -> Self {
        Self {
            source_id: source_id.to_string(),
            sheet_name: sheet_name.to_string(),
            row_number,
            status_text: status_text.to_string(),
            comment_fingerprint: comment_fingerprint(Some(comment)),
        }
    }
}

pub struct ContentAddressedCache {
    conn: Mutex<Connection>,
}

impl ContentAddressedCache {
    /// Open (or create) the cache file, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create cache dir {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open cache {}", path.display()))?;
        Self::with_connection(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory cache")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).context("create cache schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("cache connection lock poisoned"))
    }

    /// Return the stored payload only when all five key fields match.
    ///
    /// A stored payload that is not a JSON object is logged and treated as a miss.
    pub fn get(&self, key: &CacheKey) -> Result<Option<Map<String, Value>>> {
        let row_number = i64::try_from(key.row_number).context("row number out of range")?;
        let stored: Option<String> = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT payload_json FROM llm_cache
                 WHERE source_id = ?1 AND sheet_name = ?2 AND row_number = ?3
                   AND status_text = ?4 AND comment_hash = ?5",
                params![
                    key.source_id,
                    key.sheet_name,
                    row_number,
                    key.status_text,
                    key.comment_fingerprint
                ],
                |row| row.get(0),
            )
            .optional()
            .context("query cache")?
        };
        let Some(text) = stored else {
            return Ok(None);
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            Ok(_) => {
                tracing::warn!(
                    row = key.row_number,
                    "cached payload is not a JSON object; ignoring"
                );
                Ok(None)
            }
            Err(err) => {
                tracing::warn!(
                    row = key.row_number,
                    error = %err,
                    "cached payload is not valid JSON; ignoring"
                );
                Ok(None)
            }
        }
    }

    /// Upsert the record for the key's row, replacing guard fields and payload.
    pub fn put(&self, key: &CacheKey, payload: &Map<String, Value>) -> Result<()> {
        let row_number = i64::try_from(key.row_number).context("row number out of range")?;
        let payload_json = serde_json::to_string(payload).context("serialize cache payload")?;
        let updated_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("compute timestamp")?
            .as_secs_f64();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO llm_cache (
                 source_id, sheet_name, row_number, status_text,
                 comment_hash, payload_json, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(source_id, sheet_name, row_number) DO UPDATE SET
                 status_text = excluded.status_text,
                 comment_hash = excluded.comment_hash,
                 payload_json = excluded.payload_json,
                 updated_at = excluded.updated_at",
            params![
                key.source_id,
                key.sheet_name,
                row_number,
                key.status_text,
                key.comment_fingerprint,
                payload_json,
                updated_at
            ],
        )
        .context("upsert cache record")?;
        Ok(())
    }

    #[cfg(test)]
    fn write_raw_payload(&self, key: &CacheKey, payload_json: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO llm_cache VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                key.source_id,
                key.sheet_name,
                key.row_number as i64,
                key.status_text,
                key.comment_fingerprint,
                payload_json
            ],
        )?;
        Ok(())
    }

    #[cfg(test)]
    fn record_count(&self) -> Result<i64> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM llm_cache", [], |row| row.get(0))?)
    }
}
