//! SQLite-backed store (one database file, one `entries` table per store).
//!
//! Values are stored as JSON text. The whole table is loaded into memory on
//! open; reads never touch the database. Each mutation is a single
//! `INSERT OR REPLACE` or `DELETE`, so the file stays one row per live key.

use super::{KvStore, MemoryKv};
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OpenFlags};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

pub struct SqliteKv<V> {
    path: PathBuf,
    store: MemoryKv<V>,
    /// Held across mutate-then-write so rows land in mutation order.
    conn: Mutex<Connection>,
    /// Last write failed; memory is ahead of disk.
    dirty: AtomicBool,
}

impl<V> SqliteKv<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    /// Open or create the database at `path` and load every row.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open database {}", path.display()))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA synchronous = FULL;
        ",
        )?;
        conn.execute_batch(SCHEMA)
            .with_context(|| format!("failed to create schema in {}", path.display()))?;

        let store = MemoryKv::new();
        {
            let mut stmt = conn.prepare("SELECT key, value FROM entries")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let key: String = row.get(0)?;
                let raw: String = row.get(1)?;
                let value: V = serde_json::from_str(&raw).with_context(|| {
                    format!("failed to parse value for {} in {}", key, path.display())
                })?;
                store.put(&key, value)?;
            }
        }

        tracing::debug!(path = %path.display(), entries = store.len()?, "sqlite store loaded");

        Ok(Self {
            path,
            store,
            conn: Mutex::new(conn),
            dirty: AtomicBool::new(false),
        })
    }

    /// Whether the last write failed.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("sqlite connection lock poisoned"))
    }

    fn write_put(conn: &Connection, key: &str, value: &V) -> Result<()> {
        let json = serde_json::to_string(value).context("failed to serialize value")?;
        conn.execute(
            "INSERT OR REPLACE INTO entries (key, value) VALUES (?1, ?2)",
            params![key, json],
        )?;
        Ok(())
    }

    /// Replace every row with the in-memory state in one transaction.
    fn resync(&self, conn: &mut Connection) -> Result<()> {
        let entries = self.store.entries()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM entries", [])?;
        for (key, value) in &entries {
            Self::write_put(&tx, key, value)?;
        }
        tx.commit()
            .with_context(|| format!("failed to commit resync of {}", self.path.display()))?;
        tracing::debug!(path = %self.path.display(), entries = entries.len(), "sqlite store resynced");
        Ok(())
    }

    /// Run a single-row write, or a full resync when an earlier write failed.
    /// Failures are logged, not returned.
    fn write_logged(&self, conn: &mut Connection, write: impl FnOnce(&Connection) -> Result<()>) {
        let result = if self.is_dirty() {
            self.resync(conn)
        } else {
            write(conn)
        };

        match result {
            Ok(()) => {
                if self.dirty.swap(false, Ordering::SeqCst) {
                    tracing::info!(path = %self.path.display(), "sqlite store caught up after earlier failure");
                }
            }
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                tracing::warn!(path = %self.path.display(), error = ?e, "sqlite write failed; keeping in-memory state");
            }
        }
    }
}

impl<V> KvStore<V> for SqliteKv<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    fn get(&self, key: &str) -> Result<Option<V>> {
        self.store.get(key)
    }

    fn put(&self, key: &str, value: V) -> Result<()> {
        let mut conn = self.lock()?;
        self.store.put(key, value.clone())?;
        self.write_logged(&mut conn, |c| Self::write_put(c, key, &value));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.lock()?;
        let removed = self.store.delete(key)?;
        if removed || self.is_dirty() {
            self.write_logged(&mut conn, |c| {
                c.execute("DELETE FROM entries WHERE key = ?1", params![key])?;
                Ok(())
            });
        }
        Ok(removed)
    }

    fn entries(&self) -> Result<Vec<(String, V)>> {
        self.store.entries()
    }

    fn len(&self) -> Result<usize> {
        self.store.len()
    }

    fn flush(&self) -> Result<()> {
        let mut conn = self.lock()?;
        self.resync(&mut conn)?;
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        self.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }
}
