//! Completion inference for indexed capture files.
//!
//! Rule: the appearance of index `N` means index `N-1` is finished. The
//! predecessor must exist on disk at the moment `N` is processed; if it does
//! not, it is never revisited. The final file of a run has no successor and
//! is only flushed by an explicit end-of-run marker when one is configured.

use crate::ledger::DispatchLedger;
use adcrelay_protocol::{CaptureFile, CreationEvent, DispatchKey, TransferTask};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Outcome of observing one creation event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Not a capture file (or a directory).
    Ignored,
    /// Index 0 has nothing before it.
    NoPredecessor(CaptureFile),
    /// Predecessor absent on disk when its successor appeared.
    MissingPredecessor(PathBuf),
    /// Predecessor already handed off.
    AlreadyDispatched(PathBuf),
    /// Predecessor is complete; upload it.
    Dispatch(TransferTask),
    /// End-of-run marker seen in a directory with no capture file left to flush.
    RunEndedWithoutCapture(PathBuf),
}

impl Decision {
    pub fn task(&self) -> Option<&TransferTask> {
        match self {
            Decision::Dispatch(task) => Some(task),
            _ => None,
        }
    }
}

/// Single-consumer detector; feed it events in arrival order.
#[derive(Debug, Default)]
pub struct CompletionDetector {
    ledger: DispatchLedger,
    /// Predecessors found missing; never released afterwards.
    skipped: HashSet<DispatchKey>,
    end_of_run_marker: Option<String>,
}

impl CompletionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ledger(ledger: DispatchLedger) -> Self {
        Self {
            ledger,
            skipped: HashSet::new(),
            end_of_run_marker: None,
        }
    }

    /// File name that, when created in a run directory, flushes that run's
    /// last capture file.
    pub fn with_end_of_run_marker(mut self, marker: impl Into<String>) -> Self {
        self.end_of_run_marker = Some(marker.into());
        self
    }

    pub fn ledger(&self) -> &DispatchLedger {
        &self.ledger
    }

    pub fn observe(&mut self, event: &CreationEvent) -> Decision {
        if event.is_directory {
            return Decision::Ignored;
        }

        if self.is_end_of_run_marker(&event.path) {
            let dir = event.path.parent().unwrap_or_else(|| Path::new(""));
            return self.on_run_ended(dir);
        }

        let Some(file) = CaptureFile::from_path(&event.path) else {
            trace!(path = %event.path.display(), "Ignoring non-capture file");
            return Decision::Ignored;
        };

        let Some(predecessor) = file.predecessor() else {
            debug!(path = %event.path.display(), "First capture of run, nothing to release yet");
            return Decision::NoPredecessor(file);
        };

        let prev_path = predecessor.path();
        let key = DispatchKey::for_capture(&predecessor);
        if self.skipped.contains(&key) {
            trace!(missing = %prev_path.display(), "Predecessor already skipped");
            return Decision::MissingPredecessor(prev_path);
        }
        if !prev_path.is_file() {
            warn!(
                observed = %event.path.display(),
                missing = %prev_path.display(),
                "Predecessor not found on disk, skipping"
            );
            self.skipped.insert(key);
            return Decision::MissingPredecessor(prev_path);
        }

        self.dispatch(&predecessor)
    }

    fn is_end_of_run_marker(&self, path: &Path) -> bool {
        match (&self.end_of_run_marker, path.file_name()) {
            (Some(marker), Some(name)) => name.to_str() == Some(marker.as_str()),
            _ => false,
        }
    }

    fn on_run_ended(&mut self, dir: &Path) -> Decision {
        match last_capture_in(dir) {
            Some(last) => {
                debug!(dir = %dir.display(), index = last.index, "End-of-run marker, flushing last capture");
                self.dispatch(&last)
            }
            None => {
                debug!(dir = %dir.display(), "End-of-run marker with no capture files");
                Decision::RunEndedWithoutCapture(dir.to_path_buf())
            }
        }
    }

    fn dispatch(&mut self, file: &CaptureFile) -> Decision {
        let key = DispatchKey::for_capture(file);
        if self.skipped.contains(&key) {
            return Decision::MissingPredecessor(key.path().to_path_buf());
        }
        if self.ledger.contains(&key) {
            trace!(path = %key, "Already dispatched");
            return Decision::AlreadyDispatched(key.path().to_path_buf());
        }

        let Some(task) = TransferTask::for_local_file(file.path()) else {
            warn!(path = %key, "Capture file has no named parent directory, skipping");
            return Decision::Ignored;
        };

        self.ledger.insert(key);
        Decision::Dispatch(task)
    }
}

/// Highest-indexed capture file present in `dir`.
fn last_capture_in(dir: &Path) -> Option<CaptureFile> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to list run directory");
            return None;
        }
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| {
            let name = entry.file_name();
            let index = CaptureFile::parse_file_name(name.to_str()?)?;
            // Only canonical names are reachable by the successor rule.
            (CaptureFile::file_name_for(index) == name.to_str()?).then_some(index)
        })
        .max()
        .map(|index| CaptureFile::new(dir, index))
}
