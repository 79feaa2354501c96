//! Tier selection, fallback and lazy migration.
//!
//! Background reads and writes never fail: every tier error degrades to the
//! next tier and is logged. Only the user-initiated directory and export
//! operations return errors.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use scriptdesk_core::KeyNamespace;

use crate::directory::{HostFilesystem, HostSettings};
use crate::error::StorageError;
use crate::migration::{MigrationManager, MigrationReport};
use crate::traits::{StorageBackend, Tier};

/// Where a background write ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored(Tier),
    Dropped,
}

impl WriteOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored(_))
    }
}

pub struct DataGateway {
    keys: KeyNamespace,
    structured: Arc<dyn StorageBackend>,
    key_value: Arc<dyn StorageBackend>,
    host: Option<Arc<dyn HostFilesystem>>,
    directory: RwLock<Option<PathBuf>>,
    migration: MigrationManager,
    migration_gate: OnceCell<MigrationReport>,
}

impl DataGateway {
    pub fn new(
        keys: KeyNamespace,
        structured: Arc<dyn StorageBackend>,
        key_value: Arc<dyn StorageBackend>,
    ) -> Self {
        let migration = MigrationManager::new(
            key_value.clone(),
            structured.clone(),
            keys.migration_marker(),
        );
        Self {
            keys,
            structured,
            key_value,
            host: None,
            directory: RwLock::new(None),
            migration,
            migration_gate: OnceCell::new(),
        }
    }

    pub fn with_host(mut self, host: Arc<dyn HostFilesystem>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn keys(&self) -> &KeyNamespace {
        &self.keys
    }

    /// The configured external directory, if any.
    pub fn directory(&self) -> Option<PathBuf> {
        self.directory.read().clone()
    }

    pub fn migration(&self) -> &MigrationManager {
        &self.migration
    }

    fn active_host(&self) -> Option<Arc<dyn HostFilesystem>> {
        self.directory.read().as_ref()?;
        self.host.clone()
    }

    fn require_host(&self) -> Result<Arc<dyn HostFilesystem>, StorageError> {
        self.host
            .clone()
            .ok_or_else(|| StorageError::CapabilityUnavailable("no host filesystem".into()))
    }

    /// Run the key-value migration at most once per process, and never again
    /// once a previous session recorded completion. Key-value entries written
    /// after that are fallback copies and must not overwrite structured data.
    pub async fn ensure_migrated(&self) -> &MigrationReport {
        self.migration_gate
            .get_or_init(|| async {
                if self.migration.is_completed().await {
                    debug!("key-value migration already recorded, skipping");
                    return MigrationReport::already_complete();
                }
                let report = self.migration.migrate().await;
                if !report.success {
                    warn!(error = ?report.error, "lazy migration failed");
                }
                report
            })
            .await
    }

    pub async fn save(&self, key: &str, data: &str) -> WriteOutcome {
        if let Some(host) = self.active_host() {
            return match host.save_data(key, data).await {
                Ok(()) => WriteOutcome::Stored(Tier::Directory),
                Err(e) => {
                    warn!(key = %key, error = %e, "directory write failed");
                    WriteOutcome::Dropped
                }
            };
        }

        match self.structured.save(key, data).await {
            Ok(()) => return WriteOutcome::Stored(Tier::Structured),
            Err(e) => debug!(key = %key, error = %e, "structured write failed, falling back"),
        }

        match self.key_value.save(key, data).await {
            Ok(()) => return WriteOutcome::Stored(Tier::KeyValue),
            Err(StorageError::QuotaExceeded { bytes, limit, .. }) => {
                let purged = self.purge_expendable().await;
                info!(key = %key, bytes, limit, purged, "key-value quota hit, purged history keys");
            }
            Err(e) => {
                warn!(key = %key, error = %e, "write dropped");
                return WriteOutcome::Dropped;
            }
        }

        match self.key_value.save(key, data).await {
            Ok(()) => WriteOutcome::Stored(Tier::KeyValue),
            Err(e) => {
                warn!(key = %key, error = %e, "write dropped after purge");
                WriteOutcome::Dropped
            }
        }
    }

    /// Delete every history key from the key-value tier. Returns how many went.
    pub async fn purge_expendable(&self) -> usize {
        let keys = match self.key_value.list_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "could not list keys for purge");
                return 0;
            }
        };
        let mut purged = 0;
        for key in keys.iter().filter(|k| self.keys.is_expendable(k)) {
            match self.key_value.delete(key).await {
                Ok(()) => purged += 1,
                Err(e) => warn!(key = %key, error = %e, "purge delete failed"),
            }
        }
        purged
    }

    async fn load_structured(&self, key: &str) -> Option<String> {
        let result = match self.structured.open().await {
            Ok(()) => self.structured.load(key).await,
            Err(e) => Err(e),
        };
        result
            .inspect_err(|e| debug!(key = %key, error = %e, "structured read failed"))
            .ok()
            .flatten()
    }

    async fn load_key_value(&self, key: &str) -> Option<String> {
        self.key_value
            .load(key)
            .await
            .inspect_err(|e| warn!(key = %key, error = %e, "key-value read failed"))
            .ok()
            .flatten()
    }

    pub async fn load(&self, key: &str) -> Option<String> {
        if let Some(host) = self.active_host() {
            return host
                .load_data(key)
                .await
                .inspect_err(|e| warn!(key = %key, error = %e, "directory read failed"))
                .ok()
                .flatten();
        }

        if let Some(value) = self.load_structured(key).await {
            return Some(value);
        }
        let fallback = self.load_key_value(key).await?;
        self.ensure_migrated().await;
        match self.load_structured(key).await {
            Some(migrated) => Some(migrated),
            None => Some(fallback),
        }
    }

    pub async fn delete(&self, key: &str) {
        if let Some(host) = self.active_host() {
            if let Err(e) = host.delete_data(key).await {
                warn!(key = %key, error = %e, "directory delete failed");
            }
            return;
        }

        if self.load_key_value(key).await.is_some() {
            self.ensure_migrated().await;
        }
        if let Err(e) = self.structured.delete(key).await {
            debug!(key = %key, error = %e, "structured delete failed");
        }
        if let Err(e) = self.key_value.delete(key).await {
            warn!(key = %key, error = %e, "key-value delete failed");
        }
    }

    async fn structured_keys(&self) -> Vec<String> {
        let result = match self.structured.open().await {
            Ok(()) => self.structured.list_keys().await,
            Err(e) => Err(e),
        };
        result
            .inspect_err(|e| debug!(error = %e, "structured list failed"))
            .unwrap_or_default()
    }

    /// Sorted union of both tiers' keys, without the migration marker.
    pub async fn list_keys(&self) -> Vec<String> {
        if let Some(host) = self.active_host() {
            return host
                .list_data_keys()
                .await
                .inspect_err(|e| warn!(error = %e, "directory list failed"))
                .unwrap_or_default();
        }

        let mut structured = self.structured_keys().await;
        let key_value = self
            .key_value
            .list_keys()
            .await
            .inspect_err(|e| warn!(error = %e, "key-value list failed"))
            .unwrap_or_default();

        if key_value.iter().any(|k| structured.binary_search(k).is_err()) {
            self.ensure_migrated().await;
            structured = self.structured_keys().await;
        }

        let marker = self.keys.migration_marker();
        let mut keys: Vec<String> = structured.into_iter().chain(key_value).collect();
        keys.retain(|k| *k != marker);
        keys.sort();
        keys.dedup();
        keys
    }

    /// Read the stored directory preference and switch mode to match.
    pub async fn resolve_save_location(&self) -> Result<Option<PathBuf>, StorageError> {
        let Some(host) = self.host.clone() else {
            return Ok(None);
        };
        let settings = host.load_settings().await?;
        *self.directory.write() = settings.data_directory.clone();
        if let Some(dir) = &settings.data_directory {
            info!(directory = %dir.display(), "using external data directory");
        }
        Ok(settings.data_directory)
    }

    /// Ask the host for a directory and switch to it. `None` when cancelled.
    pub async fn choose_directory(&self) -> Result<Option<PathBuf>, StorageError> {
        let host = self.require_host()?;
        let Some(path) = host.select_directory().await? else {
            return Ok(None);
        };
        self.set_directory(&path).await?;
        Ok(Some(path))
    }

    pub async fn set_directory(&self, path: &Path) -> Result<(), StorageError> {
        let host = self.require_host()?;
        tokio::fs::create_dir_all(path).await?;
        host.save_settings(HostSettings {
            data_directory: Some(path.to_path_buf()),
        })
        .await?;
        *self.directory.write() = Some(path.to_path_buf());
        info!(directory = %path.display(), "data directory set");
        Ok(())
    }

    pub async fn clear_directory(&self) -> Result<(), StorageError> {
        let host = self.require_host()?;
        host.save_settings(HostSettings::default()).await?;
        *self.directory.write() = None;
        info!("data directory cleared");
        Ok(())
    }

    /// Explicit write to the configured directory. Failures are returned.
    pub async fn save_to_directory(&self, key: &str, data: &str) -> Result<(), StorageError> {
        let host = self.active_host().ok_or_else(|| {
            StorageError::CapabilityUnavailable("no data directory configured".into())
        })?;
        host.save_data(key, data).await
    }

    pub async fn export_file(&self, path: &Path, contents: &str) -> Result<(), StorageError> {
        self.require_host()?.export_file(path, contents).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::LocalDirectory;
    use crate::kv::{KeyValueStore, KvLimits};
    use crate::sqlite::SqliteStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn keys() -> KeyNamespace {
        KeyNamespace::new("app")
    }

    fn gateway_with(structured: SqliteStore, kv: Arc<KeyValueStore>) -> DataGateway {
        DataGateway::new(keys(), Arc::new(structured), kv)
    }

    #[tokio::test]
    async fn saves_to_structured_when_available() {
        let kv = Arc::new(KeyValueStore::in_memory(KvLimits::default()));
        let gw = gateway_with(SqliteStore::in_memory(), kv.clone());
        assert_eq!(gw.save("k", "v").await, WriteOutcome::Stored(Tier::Structured));
        assert_eq!(gw.load("k").await.as_deref(), Some("v"));
        assert_eq!(kv.load("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn falls_back_to_key_value() {
        let kv = Arc::new(KeyValueStore::in_memory(KvLimits::default()));
        let gw = gateway_with(SqliteStore::unavailable(), kv.clone());
        assert_eq!(gw.save("k", "v").await, WriteOutcome::Stored(Tier::KeyValue));
        assert_eq!(gw.load("k").await.as_deref(), Some("v"));
        assert_eq!(gw.list_keys().await, vec!["k"]);
        gw.delete("k").await;
        assert_eq!(gw.load("k").await, None);
    }

    #[tokio::test]
    async fn read_miss_migrates_everything_once() {
        let kv = Arc::new(KeyValueStore::in_memory(KvLimits::default()));
        kv.save("a", "1").await.unwrap();
        kv.save("b", "2").await.unwrap();
        let sql = Arc::new(SqliteStore::in_memory());
        let gw = DataGateway::new(keys(), sql.clone(), kv);

        assert_eq!(gw.load("a").await.as_deref(), Some("1"));
        assert_eq!(sql.load("b").await.unwrap().as_deref(), Some("2"));
        assert!(gw.migration().is_completed().await);
        assert!(gw.ensure_migrated().await.success);
    }

    #[tokio::test]
    async fn migrated_value_is_preferred_over_key_value() {
        let kv = Arc::new(KeyValueStore::in_memory(KvLimits::default()));
        kv.save("k", "old").await.unwrap();
        let sql = Arc::new(SqliteStore::in_memory());
        let gw = DataGateway::new(keys(), sql.clone(), kv.clone());

        gw.ensure_migrated().await;
        sql.save("k", "new").await.unwrap();
        assert_eq!(gw.load("k").await.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn completed_migration_is_not_rerun_in_a_later_session() {
        let kv = Arc::new(KeyValueStore::in_memory(KvLimits::default()));
        kv.save("app_project_A", "old").await.unwrap();
        let sql = Arc::new(SwitchableStore(SqliteStore::in_memory(), AtomicBool::new(false)));

        let first = DataGateway::new(keys(), sql.clone(), kv.clone());
        assert_eq!(first.load("app_project_A").await.as_deref(), Some("old"));
        assert!(first.migration().is_completed().await);
        assert_eq!(first.save("app_project_A", "new").await, WriteOutcome::Stored(Tier::Structured));

        // an outage pushes one write into the key-value tier
        sql.1.store(true, Ordering::SeqCst);
        assert_eq!(first.save("app_lastProject", "A").await, WriteOutcome::Stored(Tier::KeyValue));
        sql.1.store(false, Ordering::SeqCst);

        let second = DataGateway::new(keys(), sql.clone(), kv);
        assert_eq!(second.load("app_lastProject").await.as_deref(), Some("A"));
        assert!(second.ensure_migrated().await.success);
        assert_eq!(second.ensure_migrated().await.migrated_count, 0);
        assert_eq!(second.load("app_project_A").await.as_deref(), Some("new"));
    }

    /// Structured tier whose saves can be switched off.
    struct SwitchableStore(SqliteStore, AtomicBool);

    #[async_trait::async_trait]
    impl StorageBackend for SwitchableStore {
        fn tier(&self) -> Tier {
            Tier::Structured
        }

        async fn open(&self) -> Result<(), StorageError> {
            self.0.open().await
        }

        async fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if self.1.load(Ordering::SeqCst) {
                return Err(StorageError::CapabilityUnavailable("offline".into()));
            }
            self.0.save(key, value).await
        }

        async fn load_record(&self, key: &str) -> Result<Option<crate::StorageRecord>, StorageError> {
            self.0.load_record(key).await
        }

        async fn delete(&self, key: &str) -> Result<(), StorageError> {
            self.0.delete(key).await
        }

        async fn list_keys(&self) -> Result<Vec<String>, StorageError> {
            self.0.list_keys().await
        }
    }

    #[tokio::test]
    async fn list_keys_hides_marker_and_merges_tiers() {
        let kv = Arc::new(KeyValueStore::in_memory(KvLimits::default()));
        kv.save("b", "2").await.unwrap();
        let sql = Arc::new(SqliteStore::in_memory());
        sql.save("a", "1").await.unwrap();
        let gw = DataGateway::new(keys(), sql, kv);
        assert_eq!(gw.list_keys().await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn delete_removes_from_both_tiers() {
        let kv = Arc::new(KeyValueStore::in_memory(KvLimits::default()));
        kv.save("k", "v").await.unwrap();
        let sql = Arc::new(SqliteStore::in_memory());
        let gw = DataGateway::new(keys(), sql.clone(), kv.clone());

        gw.delete("k").await;
        assert_eq!(gw.load("k").await, None);
        assert_eq!(kv.load("k").await.unwrap(), None);
        assert_eq!(sql.load("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn quota_purges_history_then_retries() {
        let limits = KvLimits {
            max_value_bytes: 100,
            quota_bytes: 200,
        };
        let kv = Arc::new(KeyValueStore::in_memory(limits));
        kv.save("app_project_P_undo", &"u".repeat(90)).await.unwrap();
        kv.save("app_project_P", &"p".repeat(40)).await.unwrap();
        let gw = gateway_with(SqliteStore::unavailable(), kv.clone());

        let outcome = gw.save("app_characters", &"c".repeat(60)).await;
        assert_eq!(outcome, WriteOutcome::Stored(Tier::KeyValue));
        assert_eq!(kv.load("app_project_P_undo").await.unwrap(), None);
        assert!(kv.load("app_project_P").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn oversized_write_is_dropped_then_small_write_succeeds() {
        let limits = KvLimits {
            max_value_bytes: 100,
            quota_bytes: 1000,
        };
        let kv = Arc::new(KeyValueStore::in_memory(limits));
        let gw = gateway_with(SqliteStore::unavailable(), kv);

        assert_eq!(gw.save("app_project_P_redo", &"x".repeat(101)).await, WriteOutcome::Dropped);
        assert!(gw.save("app_project_P_redo", "[]").await.is_stored());
        assert_eq!(gw.load("app_project_P_redo").await.as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn directory_mode_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(KeyValueStore::in_memory(KvLimits::default()));
        let sql = Arc::new(SqliteStore::in_memory());
        sql.save("elsewhere", "1").await.unwrap();
        let host = Arc::new(LocalDirectory::new(dir.path().join("settings.json"), None));
        let gw = DataGateway::new(keys(), sql.clone(), kv).with_host(host);

        assert_eq!(gw.resolve_save_location().await.unwrap(), None);
        gw.set_directory(&dir.path().join("data")).await.unwrap();

        assert_eq!(gw.save("k", "v").await, WriteOutcome::Stored(Tier::Directory));
        assert_eq!(gw.load("k").await.as_deref(), Some("v"));
        assert_eq!(gw.load("elsewhere").await, None);
        assert_eq!(gw.list_keys().await, vec!["k"]);
        assert_eq!(sql.load("k").await.unwrap(), None);

        gw.clear_directory().await.unwrap();
        assert_eq!(gw.load("elsewhere").await.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn user_operations_report_missing_host() {
        let kv = Arc::new(KeyValueStore::in_memory(KvLimits::default()));
        let gw = gateway_with(SqliteStore::in_memory(), kv);
        assert!(gw.choose_directory().await.is_err());
        assert!(gw.save_to_directory("k", "v").await.is_err());
        assert!(gw.export_file(Path::new("out.txt"), "x").await.is_err());
    }
}
