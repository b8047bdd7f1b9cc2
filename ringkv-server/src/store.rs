//! SQLite-backed local slice of the key space.
//!
//! Each node owns one database file under `<data_dir>/store_<port>/`,
//! created on first use. Keys and values are raw byte strings. The
//! connection is serialized behind a mutex; rusqlite connections must not
//! be shared across tasks without one.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::NodeError;

pub struct Store {
    conn: Mutex<Option<Connection>>,
    path: PathBuf,
}

impl Store {
    /// Open (or create) the per-node database rooted at `data_dir`.
    pub fn open(data_dir: &Path, port: u16) -> Result<Self, NodeError> {
        let dir = data_dir.join(format!("store_{port}"));
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("kv.db");
        let conn = Connection::open(&path)?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path,
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_memory() -> Result<Self, NodeError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: PathBuf::from(":memory:"),
        })
    }

    fn init(conn: &Connection) -> Result<(), NodeError> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE IF NOT EXISTS kv (
                 key    BLOB PRIMARY KEY,
                 value  BLOB NOT NULL
             );",
        )?;
        Ok(())
    }

    fn with_conn<R>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<R>,
    ) -> Result<R, NodeError> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(NodeError::StoreClosed)?;
        Ok(f(conn)?)
    }

    /// Store a key-value pair, overwriting any previous value. Durable on
    /// return.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), NodeError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map(|_| ())
        })
    }

    /// The stored value, or `None` if the key is absent.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, NodeError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
    }

    /// Remove a key. Deleting an absent key is not an error.
    pub fn delete(&self, key: &[u8]) -> Result<(), NodeError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map(|_| ())
        })
    }

    /// Release the underlying connection. Further calls fail with
    /// [`NodeError::StoreClosed`].
    pub fn close(&self) {
        if let Some(conn) = self.conn.lock().take()
            && let Err((_, e)) = conn.close()
        {
            tracing::error!("Failed to close store: {e}");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
