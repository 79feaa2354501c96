use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    KeyValue,
    Structured,
    Directory,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeyValue => "key-value",
            Self::Structured => "structured",
            Self::Directory => "directory",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored value as a tier keeps it internally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageRecord {
    pub key: String,
    pub value: String,
    /// Milliseconds since the Unix epoch.
    pub written_at: i64,
}

impl StorageRecord {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            written_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// String key/value contract shared by every tier.
///
/// Each call is scoped to itself; there is no cross-call atomicity.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn tier(&self) -> Tier;

    /// Idempotently prepare the tier. Tiers that need no setup keep the default.
    async fn open(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), StorageError>;

    async fn load_record(&self, key: &str) -> Result<Option<StorageRecord>, StorageError>;

    async fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.load_record(key).await?.map(|r| r.value))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// All keys, sorted.
    async fn list_keys(&self) -> Result<Vec<String>, StorageError>;
}
