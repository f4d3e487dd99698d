use crate::types::CaptureFile;
use std::fmt;
use std::path::{Path, PathBuf};

/// Stable key for "this capture file has been handed to the uploader".
///
/// Components:
/// - run directory
/// - sequence index
///
/// Rendered as the canonical path of the file, so two events naming the same
/// index (duplicates, or zero-padded variants) collapse onto one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DispatchKey(PathBuf);

impl DispatchKey {
    pub fn for_capture(file: &CaptureFile) -> Self {
        Self(file.path())
    }

    /// Key for an arbitrary local path. Capture files are normalized to their
    /// canonical name; anything else keys on the path as given.
    pub fn for_path(path: &Path) -> Self {
        match CaptureFile::from_path(path) {
            Some(file) => Self::for_capture(&file),
            None => Self(path.to_path_buf()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}
