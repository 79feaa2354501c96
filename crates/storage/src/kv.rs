//! Capacity-limited key-value tier.
//!
//! Holds every record in memory and, when opened on a path, mirrors the whole
//! map to one JSON file after each write. Writes that would cross the per-value
//! safety threshold or the total quota are refused with `QuotaExceeded`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::traits::{StorageBackend, StorageRecord, Tier};

pub const DEFAULT_MAX_VALUE_BYTES: usize = 2 * 1024 * 1024;
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KvLimits {
    /// Largest single value accepted.
    pub max_value_bytes: usize,
    /// Total size of all keys plus values.
    pub quota_bytes: usize,
}

impl Default for KvLimits {
    fn default() -> Self {
        Self {
            max_value_bytes: DEFAULT_MAX_VALUE_BYTES,
            quota_bytes: DEFAULT_QUOTA_BYTES,
        }
    }
}

pub struct KeyValueStore {
    entries: Mutex<BTreeMap<String, StorageRecord>>,
    path: Option<PathBuf>,
    limits: KvLimits,
}

fn record_size(key: &str, value: &str) -> usize {
    key.len() + value.len()
}

impl KeyValueStore {
    pub fn in_memory(limits: KvLimits) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            path: None,
            limits,
        }
    }

    /// Open a file-backed store. An unreadable file starts the store empty.
    pub fn open(path: &Path, limits: KvLimits) -> Result<Self, StorageError> {
        let entries = match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<Vec<StorageRecord>>(&raw) {
                Ok(records) => records.into_iter().map(|r| (r.key.clone(), r)).collect(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "key-value file unreadable, starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StorageError::Io(e)),
        };
        debug!(path = %path.display(), count = entries.len(), "key-value store opened");
        Ok(Self {
            entries: Mutex::new(entries),
            path: Some(path.to_path_buf()),
            limits,
        })
    }

    pub fn limits(&self) -> KvLimits {
        self.limits
    }

    /// Bytes currently used by keys and values.
    pub fn usage_bytes(&self) -> usize {
        self.entries
            .lock()
            .values()
            .map(|r| record_size(&r.key, &r.value))
            .sum()
    }

    fn persist(&self, entries: &BTreeMap<String, StorageRecord>) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let records: Vec<&StorageRecord> = entries.values().collect();
        let json = serde_json::to_string(&records)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }

    fn save_sync(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if value.len() > self.limits.max_value_bytes {
            return Err(StorageError::QuotaExceeded {
                key: key.to_string(),
                bytes: value.len(),
                limit: self.limits.max_value_bytes,
            });
        }

        let mut entries = self.entries.lock();
        let used: usize = entries
            .values()
            .filter(|r| r.key != key)
            .map(|r| record_size(&r.key, &r.value))
            .sum();
        let needed = used + record_size(key, value);
        if needed > self.limits.quota_bytes {
            return Err(StorageError::QuotaExceeded {
                key: key.to_string(),
                bytes: needed,
                limit: self.limits.quota_bytes,
            });
        }

        let previous = entries.insert(key.to_string(), StorageRecord::new(key, value));
        if let Err(e) = self.persist(&entries) {
            match previous {
                Some(record) => entries.insert(key.to_string(), record),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn delete_sync(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for KeyValueStore {
    fn tier(&self) -> Tier {
        Tier::KeyValue
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.save_sync(key, value)
    }

    async fn load_record(&self, key: &str) -> Result<Option<StorageRecord>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.delete_sync(key)
    }

    async fn list_keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.lock().keys().cloned().collect())
    }
}
