use std::fs;
use std::path::PathBuf;

use crate::types::VolumeId;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to watch volume {volume} at {root}: {message}")]
    WatchRegistration {
        volume: VolumeId,
        root: PathBuf,
        message: String,
    },

    #[error("failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("scan of volume {0} was cancelled")]
    ScanCancelled(VolumeId),

    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("watcher reported missed events for volume {0}")]
    EventOverflow(VolumeId),

    #[error("unknown volume: {0}")]
    UnknownVolume(VolumeId),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SearchError {
    /// Wraps a metadata failure, folding permission errors into `PermissionDenied`.
    pub fn stat(path: PathBuf, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            Self::PermissionDenied(path)
        } else {
            Self::Stat { path, source }
        }
    }

    /// Cancellation is an expected outcome, not a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::ScanCancelled(_))
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;

/// Canonicalizes a path, returning the original if canonicalization fails.
pub fn canonicalize_existing_path(path: PathBuf) -> PathBuf {
    fs::canonicalize(&path).unwrap_or(path)
}
