//! SQLite-backed datastore.
//!
//! A single `kv` table holds all DHT state. WAL mode and the pragma set
//! below match the rest of the deployment's SQLite usage.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::{Datastore, DbError, Result};

/// SQLite implementation of [`Datastore`].
///
/// The connection is guarded by a mutex: one mutation at a time, which is
/// all the DHT requires.
pub struct SqliteDatastore {
    conn: Mutex<Connection>,
}

impl SqliteDatastore {
    /// Open or create a datastore at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        configure(&conn)?;
        tracing::debug!(path = %path.display(), "sqlite datastore opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory SQLite datastore (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means a writer panicked mid-statement; the
        // connection itself is still usable for our single-statement ops.
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Configure pragmas and create the schema.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;
         CREATE TABLE IF NOT EXISTS kv (
             key   TEXT PRIMARY KEY,
             value BLOB NOT NULL
         );",
    )?;
    Ok(())
}

impl Datastore for SqliteDatastore {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.lock().execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self
            .lock()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn has(&self, key: &str) -> Result<bool> {
        let count: u32 = self.lock().query_row(
            "SELECT COUNT(*) FROM kv WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.lock()
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn query(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let conn = self.lock();
        // DHT keys are hex-and-slash paths, so a LIKE prefix scan is exact:
        // no SQL wildcard characters ever appear in a key.
        let mut stmt =
            conn.prepare("SELECT key, value FROM kv WHERE key LIKE ?1 || '%' ORDER BY key")?;
        let rows = stmt
            .query_map(params![prefix], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
            .map_err(DbError::Sqlite)?;
        Ok(rows)
    }
}
