//! External directory tier.
//!
//! When the user points the application at a directory, that directory becomes
//! the only tier in use. Access goes through [`HostFilesystem`] so an embedding
//! shell can substitute its own primitives.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StorageError;

/// Persisted directory preference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_directory: Option<PathBuf>,
}

#[async_trait]
pub trait HostFilesystem: Send + Sync {
    /// Ask the user for a directory. `None` means the choice was cancelled.
    async fn select_directory(&self) -> Result<Option<PathBuf>, StorageError>;

    async fn save_data(&self, key: &str, data: &str) -> Result<(), StorageError>;

    async fn load_data(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn delete_data(&self, key: &str) -> Result<(), StorageError>;

    async fn list_data_keys(&self) -> Result<Vec<String>, StorageError>;

    async fn save_settings(&self, settings: HostSettings) -> Result<(), StorageError>;

    async fn load_settings(&self) -> Result<HostSettings, StorageError>;

    async fn export_file(&self, path: &Path, contents: &str) -> Result<(), StorageError>;
}

const DATA_EXTENSION: &str = ".json";

fn is_plain(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-')
}

/// Map a key to a file stem. Bytes outside `[A-Za-z0-9_.-]` become `%XX`.
pub fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if is_plain(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// Inverse of [`escape_key`]. Returns `None` for stems that were not produced by it.
pub fn unescape_key(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = stem.get(i + 1..i + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b if is_plain(b) => {
                out.push(b);
                i += 1;
            }
            _ => return None,
        }
    }
    String::from_utf8(out).ok()
}

/// [`HostFilesystem`] over the local disk.
pub struct LocalDirectory {
    settings_path: PathBuf,
    suggested: Option<PathBuf>,
    settings: RwLock<HostSettings>,
}

impl LocalDirectory {
    /// `settings_path` holds the directory preference; `suggested` is what
    /// `select_directory` answers with.
    pub fn new(settings_path: impl Into<PathBuf>, suggested: Option<PathBuf>) -> Self {
        Self {
            settings_path: settings_path.into(),
            suggested,
            settings: RwLock::new(HostSettings::default()),
        }
    }

    fn data_dir(&self) -> Result<PathBuf, StorageError> {
        self.settings
            .read()
            .data_directory
            .clone()
            .ok_or_else(|| StorageError::CapabilityUnavailable("no data directory configured".into()))
    }

    fn data_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.data_dir()?.join(format!("{}{DATA_EXTENSION}", escape_key(key))))
    }
}

#[async_trait]
impl HostFilesystem for LocalDirectory {
    async fn select_directory(&self) -> Result<Option<PathBuf>, StorageError> {
        Ok(self.suggested.clone())
    }

    async fn save_data(&self, key: &str, data: &str) -> Result<(), StorageError> {
        let path = self.data_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        debug!(key = %key, path = %path.display(), "directory write");
        Ok(())
    }

    async fn load_data(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.data_path(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_data(&self, key: &str) -> Result<(), StorageError> {
        let path = self.data_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_data_keys(&self) -> Result<Vec<String>, StorageError> {
        let dir = self.data_dir()?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(DATA_EXTENSION)) else {
                continue;
            };
            match unescape_key(stem) {
                Some(key) => keys.push(key),
                None => warn!(file = %stem, "skipping unrecognised file in data directory"),
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn save_settings(&self, settings: HostSettings) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(&settings)?;
        if let Some(parent) = self.settings_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.settings_path, json).await?;
        *self.settings.write() = settings;
        Ok(())
    }

    async fn load_settings(&self) -> Result<HostSettings, StorageError> {
        let settings = match tokio::fs::read_to_string(&self.settings_path).await {
            Ok(raw) => serde_json::from_str::<HostSettings>(&raw).unwrap_or_else(|e| {
                warn!(path = %self.settings_path.display(), error = %e, "settings unreadable, using defaults");
                HostSettings::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HostSettings::default(),
            Err(e) => return Err(e.into()),
        };
        *self.settings.write() = settings.clone();
        Ok(settings)
    }

    async fn export_file(&self, path: &Path, contents: &str) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await?;
        Ok(())
    }
}
