use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use scriptdesk_core::KeyNamespace;
use scriptdesk_core::script_ops::MAX_SCENES;

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Prefix for every storage key.
    pub app_prefix: String,
    /// Project used when nothing else is available. It cannot be deleted.
    pub default_project_id: String,
    pub save_debounce_ms: u64,
    pub history_debounce_ms: u64,
    pub undo_limit: usize,
    pub max_scenes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_prefix: "scriptdesk".into(),
            default_project_id: "Untitled".into(),
            save_debounce_ms: 2000,
            history_debounce_ms: 1000,
            undo_limit: 50,
            max_scenes: MAX_SCENES,
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(EngineError::Config(format!("{}: {e}", path.display()))),
        };
        serde_json::from_str(&raw)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    pub fn history_debounce(&self) -> Duration {
        Duration::from_millis(self.history_debounce_ms)
    }

    pub fn keys(&self) -> KeyNamespace {
        KeyNamespace::new(&self.app_prefix)
    }
}
