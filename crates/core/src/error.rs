use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("scene name already in use: {0}")]
    DuplicateSceneName(String),

    #[error("scene limit reached (max {max})")]
    SceneLimit { max: usize },

    #[error("scene not found: {0}")]
    SceneNotFound(String),
}
