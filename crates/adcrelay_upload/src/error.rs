use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by a remote session primitive.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SessionError(pub String);

impl SessionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<ssh2::Error> for SessionError {
    fn from(err: ssh2::Error) -> Self {
        Self(err.to_string())
    }
}

impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> Self {
        Self(err.to_string())
    }
}

/// Upload failure, classified by the step that failed.
///
/// Only `Connection` is transient (retry eligible). Everything else is
/// permanent for the attempt and the task is dropped.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Cannot read local file {path}: {source}")]
    LocalRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Connection to {endpoint} failed: {message}")]
    Connection { endpoint: String, message: String },

    #[error("Cannot create remote directory {path}: {message}")]
    RemoteDirectory { path: String, message: String },

    #[error("Transfer to {path} failed: {message}")]
    Transfer { path: String, message: String },

    #[error("Upload cancelled")]
    Cancelled,
}

impl UploadError {
    /// Check if this error is transient (eligible for retry)
    pub fn is_transient(&self) -> bool {
        matches!(self, UploadError::Connection { .. })
    }

    /// Short label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::LocalRead { .. } => "local_read",
            UploadError::Connection { .. } => "connection",
            UploadError::RemoteDirectory { .. } => "remote_directory",
            UploadError::Transfer { .. } => "transfer",
            UploadError::Cancelled => "cancelled",
        }
    }
}
