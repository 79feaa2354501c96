//! Fixtures for cross-crate tests: a temp-directory workspace that can be
//! reopened to simulate a restart, and a backend wrapper that counts and can
//! fail calls.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use scriptdesk_engine::{EngineConfig, EngineError, ProjectStore};
use scriptdesk_storage::{
    DataGateway, KeyValueStore, KvLimits, LocalDirectory, SqliteStore, StorageBackend,
    StorageError, StorageRecord, Tier,
};

/// Files for one simulated installation. Every `gateway()` call opens the
/// tiers afresh, as a new process would.
pub struct TestWorkspace {
    dir: TempDir,
    config: EngineConfig,
    limits: KvLimits,
    structured: bool,
}

impl TestWorkspace {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
            config: EngineConfig {
                save_debounce_ms: 20,
                history_debounce_ms: 10,
                ..EngineConfig::default()
            },
            limits: KvLimits::default(),
            structured: true,
        })
    }

    /// A runtime without the structured tier.
    pub fn key_value_only() -> std::io::Result<Self> {
        Ok(Self {
            structured: false,
            ..Self::new()?
        })
    }

    pub fn with_limits(mut self, limits: KvLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn database_path(&self) -> PathBuf {
        self.path().join("scriptdesk.db")
    }

    pub fn key_value_path(&self) -> PathBuf {
        self.path().join("kv.json")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.path().join("settings.json")
    }

    /// Directory `select_directory` answers with.
    pub fn suggested_directory(&self) -> PathBuf {
        self.path().join("external")
    }

    pub fn structured(&self) -> SqliteStore {
        if self.structured {
            SqliteStore::at(self.database_path())
        } else {
            SqliteStore::unavailable()
        }
    }

    pub fn key_value(&self) -> Result<KeyValueStore, StorageError> {
        KeyValueStore::open(&self.key_value_path(), self.limits)
    }

    pub fn gateway(&self) -> Result<Arc<DataGateway>, StorageError> {
        let host = LocalDirectory::new(self.settings_path(), Some(self.suggested_directory()));
        let gateway = DataGateway::new(
            self.config.keys(),
            Arc::new(self.structured()),
            Arc::new(self.key_value()?),
        )
        .with_host(Arc::new(host));
        Ok(Arc::new(gateway))
    }

    /// A store that has not been activated yet.
    pub fn store(&self) -> Result<ProjectStore, StorageError> {
        Ok(ProjectStore::new(self.config.clone(), self.gateway()?))
    }

    pub async fn open_store(&self) -> Result<ProjectStore, EngineError> {
        let mut store = self.store()?;
        store.activate().await?;
        Ok(store)
    }
}

/// Wraps a backend, counting saves per key. Calls can be made to fail, and
/// saves can be slowed down to keep a write in flight.
pub struct FlakyBackend {
    inner: Arc<dyn StorageBackend>,
    failing: AtomicBool,
    save_delay: Mutex<Duration>,
    saves: Mutex<BTreeMap<String, usize>>,
}

impl FlakyBackend {
    pub fn new(inner: Arc<dyn StorageBackend>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
            save_delay: Mutex::new(Duration::ZERO),
            saves: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay applied to every save that starts after this call.
    pub fn set_save_delay(&self, delay: Duration) {
        *self.save_delay.lock() = delay;
    }

    pub fn save_count(&self, key: &str) -> usize {
        self.saves.lock().get(key).copied().unwrap_or(0)
    }

    pub fn total_saves(&self) -> usize {
        self.saves.lock().values().sum()
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::CapabilityUnavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FlakyBackend {
    fn tier(&self) -> Tier {
        self.inner.tier()
    }

    async fn open(&self) -> Result<(), StorageError> {
        self.check()?;
        self.inner.open().await
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check()?;
        let delay = *self.save_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.inner.save(key, value).await?;
        *self.saves.lock().entry(key.to_string()).or_default() += 1;
        Ok(())
    }

    async fn load_record(&self, key: &str) -> Result<Option<StorageRecord>, StorageError> {
        self.check()?;
        self.inner.load_record(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn list_keys(&self) -> Result<Vec<String>, StorageError> {
        self.check()?;
        self.inner.list_keys().await
    }
}
