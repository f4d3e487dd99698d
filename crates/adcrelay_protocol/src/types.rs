//! Value types passed between observer, detector and uploader.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::defaults::DEFAULT_SSH_PORT;

pub const CAPTURE_FILE_PREFIX: &str = "adc_data_Raw_";
pub const CAPTURE_FILE_SUFFIX: &str = ".bin";

static CAPTURE_FILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^adc_data_Raw_(\d+)\.bin$").unwrap());

// ============================================================================
// Capture files
// ============================================================================

/// One indexed output file of a capture run.
///
/// Not stored anywhere: it is derived from a filename of the form
/// `adc_data_Raw_<N>.bin`. The directory is the run directory the producer
/// writes into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaptureFile {
    pub directory: PathBuf,
    pub index: u64,
}

impl CaptureFile {
    pub fn new(directory: impl Into<PathBuf>, index: u64) -> Self {
        Self {
            directory: directory.into(),
            index,
        }
    }

    /// Parse a full path. Returns `None` when the base name does not match the
    /// capture pattern or the index does not fit in a `u64`.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let index = Self::parse_file_name(name)?;
        let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Some(Self { directory, index })
    }

    /// Extract the sequence index from a bare file name.
    pub fn parse_file_name(name: &str) -> Option<u64> {
        let caps = CAPTURE_FILE_RE.captures(name)?;
        caps.get(1)?.as_str().parse::<u64>().ok()
    }

    /// Canonical file name for an index (no zero padding).
    pub fn file_name_for(index: u64) -> String {
        format!("{}{}{}", CAPTURE_FILE_PREFIX, index, CAPTURE_FILE_SUFFIX)
    }

    pub fn file_name(&self) -> String {
        Self::file_name_for(self.index)
    }

    pub fn path(&self) -> PathBuf {
        self.directory.join(self.file_name())
    }

    /// The file written immediately before this one, if any.
    pub fn predecessor(&self) -> Option<CaptureFile> {
        let index = self.index.checked_sub(1)?;
        Some(CaptureFile {
            directory: self.directory.clone(),
            index,
        })
    }
}

impl fmt::Display for CaptureFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path().display())
    }
}

// ============================================================================
// Events and tasks
// ============================================================================

/// Raw "path appeared" signal emitted by the directory observer.
///
/// May be duplicated or reordered by the notification backend; consumers
/// must confirm state against the filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationEvent {
    pub path: PathBuf,
    pub is_directory: bool,
    pub timestamp: DateTime<Utc>,
}

impl CreationEvent {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            is_directory: false,
            timestamp: Utc::now(),
        }
    }

    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            is_directory: true,
            timestamp: Utc::now(),
        }
    }
}

/// A local file that is known complete and ready for upload.
///
/// `remote_directory_name` mirrors the base name of the local parent
/// directory so each capture run lands in its own remote directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferTask {
    pub local_path: PathBuf,
    pub remote_directory_name: String,
}

impl TransferTask {
    /// Build a task for a local file. `None` if the path has no file name or
    /// no named parent directory.
    pub fn for_local_file(local_path: impl Into<PathBuf>) -> Option<Self> {
        let local_path = local_path.into();
        local_path.file_name()?;
        let remote_directory_name = local_path
            .parent()?
            .file_name()?
            .to_string_lossy()
            .into_owned();
        Some(Self {
            local_path,
            remote_directory_name,
        })
    }

    pub fn file_name(&self) -> String {
        self.local_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl fmt::Display for TransferTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}/",
            self.local_path.display(),
            self.remote_directory_name
        )
    }
}

// ============================================================================
// Remote identity
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub host: String,
    pub port: u16,
}

impl RemoteEndpoint {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

impl fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Authentication material. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub enum Secret {
    Password(String),
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl Secret {
    pub fn kind(&self) -> &'static str {
        match self {
            Secret::Password(_) => "password",
            Secret::KeyFile { .. } => "key-file",
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Secret::Password(_) => f.write_str("Password(<redacted>)"),
            Secret::KeyFile { path, passphrase } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// Resolved remote identity. Read-only once built; shared across upload workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub endpoint: RemoteEndpoint,
    pub username: String,
    pub secret: Secret,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_capture_file_names() {
        assert_eq!(CaptureFile::parse_file_name("adc_data_Raw_0.bin"), Some(0));
        assert_eq!(CaptureFile::parse_file_name("adc_data_Raw_42.bin"), Some(42));
        assert_eq!(CaptureFile::parse_file_name("adc_data_Raw_007.bin"), Some(7));
    }

    #[test]
    fn rejects_non_capture_names() {
        for name in [
            "notes.txt",
            "adc_data_Raw_abc.bin",
            "adc_data_Raw_.bin",
            "adc_data_Raw_1.bin.tmp",
            "xadc_data_Raw_1.bin",
            "adc_data_Raw_-1.bin",
            "adc_data_Raw_99999999999999999999999.bin",
        ] {
            assert_eq!(CaptureFile::parse_file_name(name), None, "{name}");
        }
    }

    #[test]
    fn predecessor_stays_in_directory() {
        let file = CaptureFile::from_path(Path::new("/data/run1/adc_data_Raw_5.bin")).unwrap();
        let prev = file.predecessor().unwrap();
        assert_eq!(prev.path(), PathBuf::from("/data/run1/adc_data_Raw_4.bin"));
        assert!(CaptureFile::new("/data/run1", 0).predecessor().is_none());
    }

    #[test]
    fn predecessor_name_is_unpadded() {
        let file = CaptureFile::from_path(Path::new("/data/run1/adc_data_Raw_010.bin")).unwrap();
        assert_eq!(file.predecessor().unwrap().file_name(), "adc_data_Raw_9.bin");
    }

    #[test]
    fn task_uses_parent_directory_name() {
        let task = TransferTask::for_local_file("/data/run1/adc_data_Raw_0.bin").unwrap();
        assert_eq!(task.remote_directory_name, "run1");
        assert_eq!(task.file_name(), "adc_data_Raw_0.bin");
        assert!(TransferTask::for_local_file("adc_data_Raw_0.bin").is_none());
    }

    #[test]
    fn secret_is_redacted() {
        let creds = Credentials {
            endpoint: RemoteEndpoint::new("10.0.0.5"),
            username: "operator".to_string(),
            secret: Secret::Password("hunter2".to_string()),
        };
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("operator"));

        let key = Secret::KeyFile {
            path: PathBuf::from("/home/op/.ssh/id_ed25519"),
            passphrase: Some("swordfish".to_string()),
        };
        assert!(!format!("{:?}", key).contains("swordfish"));
    }

    #[test]
    fn creation_event_serializes() {
        let event = CreationEvent::file("/data/run1/adc_data_Raw_3.bin");
        let json = serde_json::to_string(&event).unwrap();
        let parsed: CreationEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
