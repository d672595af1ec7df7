use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchpostError {
    #[error("not initialized: run 'watchpost init'")]
    NotInitialized,

    #[error("invalid name '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidName(String),

    #[error("no claim recorded for {kind}/{id}")]
    NotClaimed { kind: String, id: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WatchpostError>;

/// Collapse any redb error into [`WatchpostError::Store`].
pub(crate) fn store_err(e: impl std::fmt::Display) -> WatchpostError {
    WatchpostError::Store(e.to_string())
}
