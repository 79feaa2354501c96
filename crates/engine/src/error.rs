use scriptdesk_core::CoreError;
use scriptdesk_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("project store is not ready")]
    NotReady,

    #[error("project already exists: {0}")]
    ProjectExists(String),

    #[error("project cannot be deleted: {0}")]
    ProtectedProject(String),

    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("could not persist {0}")]
    PersistFailed(String),

    #[error("config error: {0}")]
    Config(String),
}
