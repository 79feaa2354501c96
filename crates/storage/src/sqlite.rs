use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::traits::{StorageBackend, StorageRecord, Tier};

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
    /// No structured engine in this runtime; every call fails with
    /// `CapabilityUnavailable`.
    Unavailable,
}

/// Structured tier over a single SQLite `records` table.
///
/// The connection is opened on first use and kept for the life of the store.
pub struct SqliteStore {
    location: Location,
    conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::File(path.into()),
            conn: Mutex::new(None),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            conn: Mutex::new(None),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            location: Location::Unavailable,
            conn: Mutex::new(None),
        }
    }

    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    fn connect(&self) -> Result<Connection, StorageError> {
        let conn = match &self.location {
            Location::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| StorageError::CapabilityUnavailable(e.to_string()))?;
                }
                Connection::open(path)
            }
            Location::Memory => Connection::open_in_memory(),
            Location::Unavailable => {
                return Err(StorageError::CapabilityUnavailable(
                    "structured storage is not available".into(),
                ));
            }
        }
        .map_err(|e| StorageError::CapabilityUnavailable(e.to_string()))?;
        crate::schema::init_schema(&conn)?;
        Ok(conn)
    }

    /// Run `f` against the open connection, opening it first if needed.
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            let conn = self.connect().inspect_err(|e| {
                warn!(error = %e, "structured storage failed to open");
            })?;
            debug!(location = ?self.location, "structured storage opened");
            *guard = Some(conn);
        }
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(StorageError::CapabilityUnavailable(
                "structured storage connection missing".into(),
            )),
        }
    }
}

#[async_trait]
impl StorageBackend for SqliteStore {
    fn tier(&self) -> Tier {
        Tier::Structured
    }

    async fn open(&self) -> Result<(), StorageError> {
        self.with_conn(|_| Ok(()))
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let record = StorageRecord::new(key, value);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO records (key, value, written_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, written_at = excluded.written_at",
                rusqlite::params![record.key, record.value, record.written_at],
            )?;
            Ok(())
        })
    }

    async fn load_record(&self, key: &str) -> Result<Option<StorageRecord>, StorageError> {
        self.with_conn(|conn| {
            let record = conn
                .query_row(
                    "SELECT key, value, written_at FROM records WHERE key = ?1",
                    rusqlite::params![key],
                    |row| {
                        Ok(StorageRecord {
                            key: row.get(0)?,
                            value: row.get(1)?,
                            written_at: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(record)
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM records WHERE key = ?1", rusqlite::params![key])?;
            Ok(())
        })
    }

    async fn list_keys(&self) -> Result<Vec<String>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM records ORDER BY key")?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(keys)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_overwrites() {
        let store = SqliteStore::in_memory();
        store.save("k", "one").await.unwrap();
        store.save("k", "two").await.unwrap();
        assert_eq!(store.load("k").await.unwrap().as_deref(), Some("two"));
        assert_eq!(store.list_keys().await.unwrap(), vec!["k"]);
    }

    #[tokio::test]
    async fn open_is_lazy_and_idempotent() {
        let store = SqliteStore::in_memory();
        assert!(!store.is_open());
        store.open().await.unwrap();
        store.open().await.unwrap();
        assert!(store.is_open());
    }

    #[tokio::test]
    async fn missing_key_loads_none() {
        let store = SqliteStore::in_memory();
        assert_eq!(store.load("nope").await.unwrap(), None);
        store.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn unavailable_reports_capability() {
        let store = SqliteStore::unavailable();
        let err = store.save("k", "v").await.unwrap_err();
        assert!(matches!(err, StorageError::CapabilityUnavailable(_)));
        assert!(err.is_fallback());
    }

    #[tokio::test]
    async fn file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.db");
        {
            let store = SqliteStore::at(&path);
            store.save("b", "2").await.unwrap();
            store.save("a", "1").await.unwrap();
        }
        let store = SqliteStore::at(&path);
        assert_eq!(store.list_keys().await.unwrap(), vec!["a", "b"]);
        let record = store.load_record("a").await.unwrap().unwrap();
        assert_eq!(record.value, "1");
        assert!(record.written_at > 0);
    }
}
