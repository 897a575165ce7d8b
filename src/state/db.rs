//! SQLite-backed key-value store.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use super::error::StateError;
use super::schema;
use super::KeyValueStore;

/// SQLite implementation of [`KeyValueStore`].
pub struct SqliteKvStore {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync.
    /// The guard is never held across an await point.
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteKvStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteKvStore {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self, StateError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            if let Some(parent) = path_clone.parent() {
                // Connection::open reports the missing directory below.
                let _ = std::fs::create_dir_all(parent);
            }
            let conn = Connection::open(&path_clone).map_err(|e| StateError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StateError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StateError::Migration)?;

            schema::migrate(&conn)?;

            Ok::<_, StateError>(conn)
        })
        .await??;

        tracing::debug!(path = %path.display(), "Opened state database");
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory database.
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|e| StateError::Query(e.to_string()))
    }
}

#[async_trait]
impl KeyValueStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StateError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM records WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()
        .map_err(StateError::query)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StateError> {
        let updated_at = Utc::now().timestamp();
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO records (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            rusqlite::params![key, value, updated_at],
        )
        .map_err(StateError::query)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StateError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM records WHERE key = ?1", [key])
            .map_err(StateError::query)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_creates_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        let db = SqliteKvStore::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), path);
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let db = SqliteKvStore::open_in_memory().unwrap();
        assert!(db.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let db = SqliteKvStore::open_in_memory().unwrap();
        db.set("progress/ana", "{\"xp\":1}").await.unwrap();
        db.set("progress/ana", "{\"xp\":2}").await.unwrap();
        assert_eq!(
            db.get("progress/ana").await.unwrap().as_deref(),
            Some("{\"xp\":2}")
        );
    }

    #[tokio::test]
    async fn test_delete() {
        let db = SqliteKvStore::open_in_memory().unwrap();
        db.set("k", "v").await.unwrap();
        db.delete("k").await.unwrap();
        assert!(db.get("k").await.unwrap().is_none());
        // Deleting again is fine
        db.delete("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        {
            let db = SqliteKvStore::open(&path).await.unwrap();
            db.set("sync/queue", "[]").await.unwrap();
        }
        let db = SqliteKvStore::open(&path).await.unwrap();
        assert_eq!(db.get("sync/queue").await.unwrap().as_deref(), Some("[]"));
    }
}
