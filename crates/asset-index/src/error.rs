use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AssetIndexError>;

#[derive(Error, Debug)]
pub enum AssetIndexError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Directory walk failed: {0}")]
    WalkError(#[from] walkdir::Error),

    #[error("Invalid glob pattern: {0}")]
    GlobError(#[from] globset::Error),

    #[error("Config error: {0}")]
    ConfigError(#[from] toml::de::Error),

    #[error("Watcher error: {0}")]
    WatchError(#[from] notify::Error),

    #[error("Background task failed: {0}")]
    TaskError(#[from] tokio::task::JoinError),

    #[error("Invalid project path: {0}")]
    InvalidPath(String),

    /// Failure of a coalesced scan, shared by every caller that awaited it.
    #[error(transparent)]
    Shared(#[from] Arc<AssetIndexError>),

    #[error("{0}")]
    Other(String),
}
