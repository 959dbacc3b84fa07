// src/db.rs
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DB_FILE_NAME: &str = "gymlog.sqlite";
const APP_DATA_DIR: &str = "gymlog";
const DATA_ENV_VAR: &str = "GYMLOG_DATA_DIR"; // Environment variable name

// Custom Error type for DB operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database connection failed")]
    Connection(#[source] rusqlite::Error),
    #[error("Failed to get application data directory")]
    DataDir,
    #[error("I/O error accessing database file")]
    Io(#[from] std::io::Error),
    #[error("Database query failed: {0}")]
    QueryFailed(#[source] rusqlite::Error),
    #[error("Database write failed for key '{0}': {1}")]
    WriteFailed(String, #[source] rusqlite::Error),
    #[error("Database delete failed for key '{0}': {1}")]
    DeleteFailed(String, #[source] rusqlite::Error),
}

/// Opaque byte store addressed by key. The fitness store only ever reads and
/// writes whole values.
pub trait KvStore {
    /// # Errors
    /// Backend specific read failure.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;
    /// # Errors
    /// Backend specific write failure.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), Error>;
    /// # Errors
    /// Backend specific delete failure.
    fn remove(&self, key: &str) -> Result<(), Error>;
}

/// Directory holding the database and the image blobs.
/// Creates the directory if it doesn't exist.
pub fn get_data_dir() -> Result<PathBuf, Error> {
    let app_dir = match std::env::var(DATA_ENV_VAR).ok() {
        Some(path_str) => PathBuf::from(path_str),
        None => dirs::data_dir().ok_or(Error::DataDir)?.join(APP_DATA_DIR),
    };
    if !app_dir.exists() {
        std::fs::create_dir_all(&app_dir)?;
    }
    Ok(app_dir)
}

/// Gets the path to the SQLite database file within the app's data directory.
pub fn get_db_path() -> Result<PathBuf, Error> {
    Ok(get_data_dir()?.join(DB_FILE_NAME))
}

/// Opens a connection to the SQLite database.
pub fn open_db<P: AsRef<Path>>(path: P) -> Result<Connection, Error> {
    Connection::open(path).map_err(Error::Connection)
}

/// Initializes the key-value table if it doesn't exist.
pub fn init_db(conn: &Connection) -> Result<(), Error> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY NOT NULL,
            value BLOB NOT NULL,
            updated_at TEXT NOT NULL           -- RFC3339, last write
        )",
        [],
    )
    .map_err(Error::Connection)?;
    Ok(())
}

impl KvStore for Connection {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        self.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get::<_, Vec<u8>>(0)
        })
        .optional()
        .map_err(Error::QueryFailed)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), Error> {
        self.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )
        .map_err(|e| Error::WriteFailed(key.to_string(), e))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        self.execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(|e| Error::DeleteFailed(key.to_string(), e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        conn
    }

    #[test]
    fn get_missing_key_is_none() {
        let conn = memory_db();
        assert_eq!(conn.get("muscles").unwrap(), None);
    }

    #[test]
    fn set_overwrites_existing_value() {
        let conn = memory_db();
        conn.set("locations", b"[\"Home\"]").unwrap();
        conn.set("locations", b"[\"Gym\"]").unwrap();
        assert_eq!(conn.get("locations").unwrap().as_deref(), Some(&b"[\"Gym\"]"[..]));
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn remove_deletes_key() {
        let conn = memory_db();
        conn.set("lastEditedReps", b"8").unwrap();
        conn.remove("lastEditedReps").unwrap();
        assert_eq!(conn.get("lastEditedReps").unwrap(), None);
    }

    #[test]
    fn init_is_idempotent() {
        let conn = memory_db();
        init_db(&conn).unwrap();
    }
}
