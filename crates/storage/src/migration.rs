use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::StorageError;
use crate::traits::StorageBackend;

/// Completion marker written to the structured tier after a migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationMarker {
    pub completed: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub migrated_count: usize,
    pub source_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub success: bool,
    pub migrated_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MigrationReport {
    /// A run that found the marker and copied nothing.
    pub fn already_complete() -> Self {
        Self {
            success: true,
            migrated_count: 0,
            error: None,
        }
    }

    fn failed(migrated_count: usize, error: &StorageError) -> Self {
        Self {
            success: false,
            migrated_count,
            error: Some(error.to_string()),
        }
    }
}

/// Copies the key-value tier into the structured tier.
pub struct MigrationManager {
    source: Arc<dyn StorageBackend>,
    target: Arc<dyn StorageBackend>,
    marker_key: String,
}

impl MigrationManager {
    pub fn new(
        source: Arc<dyn StorageBackend>,
        target: Arc<dyn StorageBackend>,
        marker_key: impl Into<String>,
    ) -> Self {
        Self {
            source,
            target,
            marker_key: marker_key.into(),
        }
    }

    pub fn marker_key(&self) -> &str {
        &self.marker_key
    }

    /// Copy every key-value entry into the structured tier, overwriting.
    ///
    /// Safe to re-run: the copy is idempotent and the marker is only written
    /// the first time.
    pub async fn migrate(&self) -> MigrationReport {
        let keys = match self.prepare().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "migration could not start");
                return MigrationReport::failed(0, &e);
            }
        };

        let mut migrated = 0;
        for key in &keys {
            let result = match self.source.load(key).await {
                Ok(Some(value)) => self.target.save(key, &value).await.map(|_| true),
                Ok(None) => Ok(false),
                Err(e) => Err(e),
            };
            match result {
                Ok(true) => migrated += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(key = %key, migrated, error = %e, "migration aborted");
                    return MigrationReport::failed(migrated, &e);
                }
            }
        }

        if let Err(e) = self.write_marker(&keys, migrated).await {
            warn!(error = %e, "migration marker not written");
            return MigrationReport::failed(migrated, &e);
        }

        info!(migrated, "key-value migration complete");
        MigrationReport {
            success: true,
            migrated_count: migrated,
            error: None,
        }
    }

    async fn prepare(&self) -> Result<Vec<String>, StorageError> {
        self.target.open().await?;
        let keys = self.source.list_keys().await?;
        Ok(keys.into_iter().filter(|k| *k != self.marker_key).collect())
    }

    async fn write_marker(&self, keys: &[String], migrated: usize) -> Result<(), StorageError> {
        if self.target.load(&self.marker_key).await?.is_some() {
            return Ok(());
        }
        let marker = MigrationMarker {
            completed: true,
            timestamp: chrono::Utc::now().timestamp_millis(),
            migrated_count: migrated,
            source_keys: keys.to_vec(),
        };
        self.target
            .save(&self.marker_key, &serde_json::to_string(&marker)?)
            .await
    }

    pub async fn marker(&self) -> Option<MigrationMarker> {
        let raw = self.target.load(&self.marker_key).await.ok()??;
        serde_json::from_str(&raw).ok()
    }

    /// False when the tier is unavailable or the marker is absent or unparsable.
    pub async fn is_completed(&self) -> bool {
        self.marker().await.is_some_and(|m| m.completed)
    }
}
