//! Error types for the updater core.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, UpdaterError>;

#[derive(Error, Debug)]
pub enum UpdaterError {
    /// Timeout, refused connection, non-success status
    #[error("Network error: {0}")]
    Network(String),

    /// Manifest body did not have the expected shape
    #[error("Malformed manifest: {0}")]
    Format(String),

    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to launch {}: {source}", path.display())]
    Launch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cache lock unavailable: {0}")]
    Lock(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl UpdaterError {
    pub fn fs(path: impl Into<PathBuf>, source: io::Error) -> Self {
        UpdaterError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable kind, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            UpdaterError::Network(_) => "network",
            UpdaterError::Format(_) => "format",
            UpdaterError::Filesystem { .. } => "filesystem",
            UpdaterError::Launch { .. } => "launch",
            UpdaterError::Lock(_) => "lock",
            UpdaterError::Config(_) => "config",
        }
    }
}

impl From<reqwest::Error> for UpdaterError {
    fn from(e: reqwest::Error) -> Self {
        UpdaterError::Network(e.to_string())
    }
}
