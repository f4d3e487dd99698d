//! In-memory remote store.
//!
//! Same session contract as SFTP, with counters for connects and closes and
//! switches for injecting failures at each step. Used by the test suites of
//! this crate and of the relay.

use crate::error::SessionError;
use crate::session::{RemoteSession, SessionConnector};
use adcrelay_protocol::Credentials;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct RemoteState {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    connects: usize,
    closes: usize,
    open_sessions: usize,
    max_open_sessions: usize,
    // Fault injection
    failing_connects: u32,
    fail_mkdir: bool,
    fail_write_after: Option<usize>,
    rename_needs_absent_target: bool,
    fail_rename: bool,
    write_delay: Option<Duration>,
}

/// Shared handle on the in-memory remote. Clones see the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            remote: self.clone(),
        }
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    pub fn file_paths(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.lock().dirs.contains(path)
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    /// Highest number of sessions that were open at the same time.
    pub fn max_open_sessions(&self) -> usize {
        self.lock().max_open_sessions
    }

    /// Refuse the next `count` connection attempts.
    pub fn fail_next_connects(&self, count: u32) {
        self.lock().failing_connects = count;
    }

    pub fn fail_mkdir(&self, fail: bool) {
        self.lock().fail_mkdir = fail;
    }

    /// Break every file stream once it has accepted `bytes` bytes.
    pub fn fail_writes_after(&self, bytes: Option<usize>) {
        self.lock().fail_write_after = bytes;
    }

    /// Emulate servers whose rename cannot overwrite.
    pub fn rename_needs_absent_target(&self, strict: bool) {
        self.lock().rename_needs_absent_target = strict;
    }

    pub fn fail_rename(&self, fail: bool) {
        self.lock().fail_rename = fail;
    }

    /// Slow every write call down, to keep uploads in flight.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        self.lock().write_delay = delay;
    }
}

/// Connector over a [`MemoryRemote`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    remote: MemoryRemote,
}

impl SessionConnector for MemoryConnector {
    type Session = MemorySession;

    fn connect(&self, credentials: &Credentials) -> Result<MemorySession, SessionError> {
        let mut state = self.remote.lock();
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(SessionError::new(format!(
                "connection refused by {}",
                credentials.endpoint
            )));
        }
        state.connects += 1;
        state.open_sessions += 1;
        state.max_open_sessions = state.max_open_sessions.max(state.open_sessions);
        Ok(MemorySession {
            remote: self.remote.clone(),
        })
    }
}

pub struct MemorySession {
    remote: MemoryRemote,
}

impl RemoteSession for MemorySession {
    fn ensure_dir(&mut self, path: &str) -> Result<(), SessionError> {
        let mut state = self.remote.lock();
        if state.fail_mkdir {
            return Err(SessionError::new(format!("permission denied: {}", path)));
        }
        let absolute = path.starts_with('/');
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if absolute || !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);
            state.dirs.insert(current.clone());
        }
        Ok(())
    }

    fn create_file<'a>(&'a mut self, path: &str) -> Result<Box<dyn Write + 'a>, SessionError> {
        let mut state = self.remote.lock();
        let parent = path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        if !parent.is_empty() && !state.dirs.contains(parent) {
            return Err(SessionError::new(format!("no such directory: {}", parent)));
        }
        state.files.insert(path.to_string(), Vec::new());
        Ok(Box::new(MemoryFile {
            remote: self.remote.clone(),
            path: path.to_string(),
            written: 0,
        }))
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), SessionError> {
        let mut state = self.remote.lock();
        if state.fail_rename {
            return Err(SessionError::new("rename not permitted"));
        }
        if state.rename_needs_absent_target && state.files.contains_key(to) {
            return Err(SessionError::new(format!("target exists: {}", to)));
        }
        let data = state
            .files
            .remove(from)
            .ok_or_else(|| SessionError::new(format!("no such file: {}", from)))?;
        state.files.insert(to.to_string(), data);
        Ok(())
    }

    fn remove_file(&mut self, path: &str) -> Result<(), SessionError> {
        self.remote
            .lock()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| SessionError::new(format!("no such file: {}", path)))
    }

    fn exists(&mut self, path: &str) -> Result<bool, SessionError> {
        let state = self.remote.lock();
        Ok(state.files.contains_key(path) || state.dirs.contains(path))
    }

    // Counts every call so a double close shows up in `closes()`.
    fn close(&mut self) {
        let mut state = self.remote.lock();
        state.closes += 1;
        state.open_sessions = state.open_sessions.saturating_sub(1);
    }
}

struct MemoryFile {
    remote: MemoryRemote,
    path: String,
    written: usize,
}

impl Write for MemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let delay = self.remote.lock().write_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.remote.lock();
        let accept = match state.fail_write_after {
            Some(limit) if self.written >= limit => {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel closed"));
            }
            Some(limit) => buf.len().min(limit - self.written),
            None => buf.len(),
        };
        state
            .files
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(&buf[..accept]);
        self.written += accept;
        Ok(accept)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
