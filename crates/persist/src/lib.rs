//! Settle persistence: durable resource handles in SQLite.
//!
//! A handle maps a caller-chosen key to the resource identifier returned by
//! create, which is the only state kept between invocations.

#![forbid(unsafe_code)]

use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use metrics::{counter, histogram};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handle {
    pub key: String,
    /// Encoded resource identifier.
    pub id: String,
    /// Namespace parameter the resource was created with.
    pub namespace: String,
    pub ts: i64,
}

pub trait HandleStore {
    fn put(&self, handle: &Handle) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<Handle>>;
    /// Returns true when a handle was removed.
    fn remove(&self, key: &str) -> Result<bool>;
    fn list(&self) -> Result<Vec<Handle>>;
}

/// SQLite-backed store. Synchronous; one call per CLI invocation.
pub struct SqliteStore {
    db: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("SETTLE_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.execute(
            "CREATE TABLE IF NOT EXISTS handles (
                key       TEXT PRIMARY KEY,
                id        TEXT NOT NULL,
                namespace TEXT NOT NULL,
                ts        INTEGER NOT NULL
            )",
            [],
        )
        .context("creating handles table")?;
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(path = %path, "handle store open");
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, rusqlite::Connection>> {
        self.db.lock().map_err(|_| anyhow!("handle store lock poisoned"))
    }
}

impl HandleStore for SqliteStore {
    fn put(&self, handle: &Handle) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO handles(key, id, namespace, ts) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET id = excluded.id, namespace = excluded.namespace, ts = excluded.ts",
            (&handle.key, &handle.id, &handle.namespace, handle.ts),
        )
        .with_context(|| format!("storing handle {}", handle.key))?;
        counter!("persist_put_total", 1u64);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Handle>> {
        let db = self.conn()?;
        let row = db
            .query_row("SELECT key, id, namespace, ts FROM handles WHERE key = ?1", [key], |row| {
                Ok(Handle { key: row.get(0)?, id: row.get(1)?, namespace: row.get(2)?, ts: row.get(3)? })
            })
            .optional()
            .with_context(|| format!("loading handle {}", key))?;
        Ok(row)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let db = self.conn()?;
        let n = db.execute("DELETE FROM handles WHERE key = ?1", [key]).with_context(|| format!("removing handle {}", key))?;
        Ok(n > 0)
    }

    fn list(&self) -> Result<Vec<Handle>> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT key, id, namespace, ts FROM handles ORDER BY key")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(Handle { key: row.get(0)?, id: row.get(1)?, namespace: row.get(2)?, ts: row.get(3)? });
        }
        Ok(out)
    }
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".settle");
        let _ = std::fs::create_dir_all(&p);
        p.push("settle.db");
        return p.to_string_lossy().to_string();
    }
    "settle.db".to_string()
}

pub fn now_ts() -> i64 {
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    now.as_secs() as i64
}
