//! The seam between the upload algorithm and a concrete remote.

use crate::error::SessionError;
use adcrelay_protocol::Credentials;
use std::io::Write;
use std::ops::{Deref, DerefMut};

/// An authenticated connection plus its file-transfer channel.
///
/// Remote paths are POSIX strings.
pub trait RemoteSession {
    /// Create `path` and any missing parents. Succeeds if it already exists.
    fn ensure_dir(&mut self, path: &str) -> Result<(), SessionError>;

    /// Open `path` for writing, truncating any existing file.
    fn create_file<'a>(&'a mut self, path: &str) -> Result<Box<dyn Write + 'a>, SessionError>;

    /// Move `from` onto `to`, replacing `to` where the server allows it.
    fn rename(&mut self, from: &str, to: &str) -> Result<(), SessionError>;

    fn remove_file(&mut self, path: &str) -> Result<(), SessionError>;

    /// Whether a file or directory is present at `path`.
    fn exists(&mut self, path: &str) -> Result<bool, SessionError>;

    /// Release the connection. Called exactly once, by [`SessionGuard`].
    fn close(&mut self);
}

/// Opens sessions for a resolved identity.
pub trait SessionConnector: Send + Sync {
    type Session: RemoteSession;

    fn connect(&self, credentials: &Credentials) -> Result<Self::Session, SessionError>;
}

/// Scoped ownership of a session: closes it when dropped.
pub struct SessionGuard<S: RemoteSession> {
    session: S,
}

impl<S: RemoteSession> SessionGuard<S> {
    pub fn new(session: S) -> Self {
        Self { session }
    }
}

impl<S: RemoteSession> Deref for SessionGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S: RemoteSession> DerefMut for SessionGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

impl<S: RemoteSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        self.session.close();
    }
}

/// Join remote path segments with `/`, collapsing duplicate separators.
pub fn remote_join(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if base.is_empty() {
        format!("/{}", name)
    } else {
        format!("{}/{}", base, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_remote_paths() {
        assert_eq!(remote_join("/srv/captures", "run1"), "/srv/captures/run1");
        assert_eq!(remote_join("/srv/captures/", "/run1"), "/srv/captures/run1");
        assert_eq!(remote_join("/", "run1"), "/run1");
        assert_eq!(remote_join("captures", "run1"), "captures/run1");
    }
}
