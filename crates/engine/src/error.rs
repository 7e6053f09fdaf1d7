use std::path::PathBuf;

use cxguard_core::SchemaError;

/// Errors surfaced by the scoring engine.
///
/// `Schema` is per-record; everything else is fatal to the call that raised it.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("unknown model '{requested}' (available: {available})")]
    UnknownModel { requested: String, available: String },

    #[error("invalid ensemble strategy '{0}' (expected average, max or voting)")]
    InvalidStrategy(String),

    #[error("invalid model selector: {0}")]
    InvalidSelector(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to load artifact bundle {path}: {reason}")]
    ArtifactLoad { path: PathBuf, reason: String },

    #[error("no artifact bundle is loaded")]
    NotLoaded,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Notify watcher error: {0}")]
    Notify(#[from] notify::Error),
}

impl EngineError {
    pub(crate) fn artifact(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        EngineError::ArtifactLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        EngineError::InvalidConfig(reason.into())
    }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
