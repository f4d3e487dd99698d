//! Error types for the watcher

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Watch root does not exist: {0}")]
    RootMissing(PathBuf),

    #[error("Watch root is not a directory: {0}")]
    RootNotDirectory(PathBuf),

    #[error("Failed to subscribe to '{root}': {source}")]
    Subscribe {
        root: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("Notification backend failed: {0}")]
    Notify(#[from] notify::Error),

    #[error("Notification channel closed unexpectedly")]
    ChannelClosed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl WatchError {
    /// Errors raised before the subscription exists (fatal at startup).
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            WatchError::RootMissing(_) | WatchError::RootNotDirectory(_) | WatchError::Subscribe { .. }
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, WatchError>;
