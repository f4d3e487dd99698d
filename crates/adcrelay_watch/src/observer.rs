//! Recursive directory observer backed by `notify`.
//!
//! The notification thread only classifies paths and pushes them into an
//! unbounded channel; it never waits on the consumer.

use crate::error::{Result, WatchError};
use adcrelay_protocol::{CaptureFile, CreationEvent};
use notify::event::CreateKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

pub type EventSender = mpsc::UnboundedSender<Result<CreationEvent>>;

/// Receiving end of an observer subscription.
///
/// Yields `Err` when the backend reports a failure; yields `None` once the
/// subscription has been released.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Result<CreationEvent>>,
}

impl EventStream {
    /// Stream fed by hand instead of by a filesystem subscription.
    pub fn channel() -> (EventSender, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, EventStream { rx })
    }

    pub async fn next(&mut self) -> Option<Result<CreationEvent>> {
        self.rx.recv().await
    }
}

/// Owns the OS-level subscription on a watch root.
pub struct DirectoryObserver {
    root: PathBuf,
    watcher: Option<RecommendedWatcher>,
}

impl DirectoryObserver {
    /// Subscribe to file creations anywhere under `root`.
    ///
    /// Fails immediately if `root` is missing, not a directory, or the
    /// backend refuses the subscription.
    pub fn start(root: &Path) -> Result<(Self, EventStream)> {
        match fs::metadata(root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(WatchError::RootNotDirectory(root.to_path_buf())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WatchError::RootMissing(root.to_path_buf()))
            }
            Err(e) => return Err(WatchError::Io(e)),
        }

        let (tx, stream) = EventStream::channel();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| forward(&tx, result),
            Config::default(),
        )
        .map_err(|source| WatchError::Subscribe {
            root: root.to_path_buf(),
            source,
        })?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Subscribe {
                root: root.to_path_buf(),
                source,
            })?;

        info!(root = %root.display(), "Watching for capture files");

        Ok((
            Self {
                root: root.to_path_buf(),
                watcher: Some(watcher),
            },
            stream,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Release the subscription. The paired stream ends once buffered
    /// events are drained.
    pub fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(e) = watcher.unwatch(&self.root) {
                // Root may already be gone.
                debug!(root = %self.root.display(), error = %e, "Unwatch failed");
            }
            info!(root = %self.root.display(), "Stopped watching");
        }
    }
}

impl Drop for DirectoryObserver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn forward(tx: &EventSender, result: notify::Result<Event>) {
    let event = match result {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "Notification backend error");
            let _ = tx.send(Err(WatchError::Notify(e)));
            return;
        }
    };

    let EventKind::Create(kind) = event.kind else {
        return;
    };

    for path in event.paths {
        let is_directory = match kind {
            CreateKind::Folder => true,
            CreateKind::File => false,
            _ => path.is_dir(),
        };

        if is_directory {
            trace!(path = %path.display(), "Directory created");
            catch_up(tx, &path);
            continue;
        }

        if tx.send(Ok(CreationEvent::file(path))).is_err() {
            trace!("Event stream dropped, discarding notification");
            return;
        }
    }
}

/// Files written into a new directory before its watch was installed never
/// produce events. Replay whatever is already there, capture files in index
/// order; the detector dedupes.
fn catch_up(tx: &EventSender, dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    let mut files: Vec<(Option<u64>, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| {
            let index = entry
                .file_name()
                .to_str()
                .and_then(CaptureFile::parse_file_name);
            (index, entry.path())
        })
        .collect();
    files.sort();

    if !files.is_empty() {
        debug!(dir = %dir.display(), count = files.len(), "Replaying files found in new directory");
    }
    for (_, path) in files {
        if tx.send(Ok(CreationEvent::file(path))).is_err() {
            return;
        }
    }
}
