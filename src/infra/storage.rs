//! Usage: Key/value storage seam (trait + in-memory and SQLite backends).
//!
//! The broker and the token coordinator never talk to a concrete store;
//! everything goes through `Storage`, which mirrors the narrow surface the
//! embedding shell provides (get/set/remove/enumerate over strings). Reads
//! and writes are synchronous and never suspend.

use crate::shared::error::AppResult;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub trait Storage: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str);
    fn remove(&mut self, key: &str);
    fn keys(&self) -> Vec<String>;
}

/// Storage handle shared between the broker and the token coordinator.
pub type SharedStorage = Arc<Mutex<dyn Storage + Send>>;

pub fn shared_storage(storage: impl Storage + 'static) -> SharedStorage {
    Arc::new(Mutex::new(storage))
}

/// Volatile backend. Default for tests and for shells that bring their own
/// persistence.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: BTreeMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

/// Durable backend over a single-table SQLite database.
///
/// The `Storage` surface is infallible, so I/O failures are logged and
/// degrade to "missing key" semantics rather than propagating.
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| format!("SYSTEM_ERROR: storage open failed: {e}"))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| format!("SYSTEM_ERROR: storage open failed: {e}"))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> AppResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )
        .map_err(|e| format!("SYSTEM_ERROR: storage schema init failed: {e}"))?;
        Ok(Self { conn })
    }
}

impl Storage for SqliteStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .unwrap_or_else(|e| {
                tracing::error!(key, "storage read failed: {e}");
                None
            })
    }

    fn set(&mut self, key: &str, value: &str) {
        let now = crate::shared::time::now_unix_seconds();
        if let Err(e) = self.conn.execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        ) {
            tracing::error!(key, "storage write failed: {e}");
        }
    }

    fn remove(&mut self, key: &str) {
        if let Err(e) = self
            .conn
            .execute("DELETE FROM kv_store WHERE key = ?1", params![key])
        {
            tracing::error!(key, "storage delete failed: {e}");
        }
    }

    fn keys(&self) -> Vec<String> {
        let mut stmt = match self.conn.prepare("SELECT key FROM kv_store ORDER BY key") {
            Ok(stmt) => stmt,
            Err(e) => {
                tracing::error!("storage key enumeration failed: {e}");
                return Vec::new();
            }
        };
        let rows = stmt.query_map([], |row| row.get::<_, String>(0));
        match rows {
            Ok(rows) => rows.filter_map(Result::ok).collect(),
            Err(e) => {
                tracing::error!("storage key enumeration failed: {e}");
                Vec::new()
            }
        }
    }
}
