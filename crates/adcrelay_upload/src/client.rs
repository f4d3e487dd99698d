use crate::cancel::CancellationToken;
use crate::error::{SessionError, UploadError};
use crate::retry::RetryPolicy;
use crate::session::{remote_join, RemoteSession, SessionConnector, SessionGuard};
use adcrelay_protocol::defaults::PARTIAL_UPLOAD_SUFFIX;
use adcrelay_protocol::{Credentials, TransferTask};
use std::fs::File;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const CHUNK_SIZE: usize = 64 * 1024;

/// Anything that can ship a [`TransferTask`]. Blocking.
pub trait Uploader: Send + Sync + 'static {
    fn upload(
        &self,
        task: &TransferTask,
        cancel: &CancellationToken,
    ) -> Result<UploadReceipt, UploadError>;
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Remote directory under which one subdirectory per run is created.
    pub remote_root: String,
    /// Write to `.<name>.part` and rename into place once complete.
    pub atomic_rename: bool,
    pub retry: RetryPolicy,
}

impl UploadOptions {
    pub fn new(remote_root: impl Into<String>) -> Self {
        Self {
            remote_root: remote_root.into(),
            atomic_rename: true,
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub remote_path: String,
    pub bytes: u64,
    pub attempts: u32,
}

/// Uploads one file per call over sessions opened by `C`.
pub struct UploadClient<C: SessionConnector> {
    connector: C,
    credentials: Arc<Credentials>,
    options: UploadOptions,
}

impl<C: SessionConnector> UploadClient<C> {
    pub fn new(connector: C, credentials: Arc<Credentials>, options: UploadOptions) -> Self {
        Self {
            connector,
            credentials,
            options,
        }
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Final remote location for a task.
    pub fn remote_path_for(&self, task: &TransferTask) -> String {
        let dir = remote_join(&self.options.remote_root, &task.remote_directory_name);
        remote_join(&dir, &task.file_name())
    }

    fn attempt(
        &self,
        task: &TransferTask,
        cancel: &CancellationToken,
    ) -> Result<(String, u64), UploadError> {
        let mut local = File::open(&task.local_path).map_err(|source| UploadError::LocalRead {
            path: task.local_path.clone(),
            source,
        })?;

        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let endpoint = self.credentials.endpoint.to_string();
        let session = self
            .connector
            .connect(&self.credentials)
            .map_err(|e| UploadError::Connection {
                endpoint: endpoint.clone(),
                message: e.to_string(),
            })?;
        let mut session = SessionGuard::new(session);
        debug!(%endpoint, user = %self.credentials.username, "Session opened");

        let remote_dir = remote_join(&self.options.remote_root, &task.remote_directory_name);
        session
            .ensure_dir(&remote_dir)
            .map_err(|e| UploadError::RemoteDirectory {
                path: remote_dir.clone(),
                message: e.to_string(),
            })?;

        let file_name = task.file_name();
        let final_path = remote_join(&remote_dir, &file_name);
        let write_path = if self.options.atomic_rename {
            remote_join(&remote_dir, &format!(".{}{}", file_name, PARTIAL_UPLOAD_SUFFIX))
        } else {
            final_path.clone()
        };

        let streamed = stream_to(&mut *session, &mut local, &write_path, cancel);
        let bytes = match streamed {
            Ok(bytes) => bytes,
            Err(e) => {
                if self.options.atomic_rename {
                    discard_partial(&mut *session, &write_path);
                }
                return Err(e);
            }
        };

        if self.options.atomic_rename {
            if let Err(e) = publish(&mut *session, &write_path, &final_path) {
                discard_partial(&mut *session, &write_path);
                return Err(e);
            }
        }

        Ok((final_path, bytes))
    }
}

impl<C: SessionConnector + 'static> Uploader for UploadClient<C> {
    fn upload(
        &self,
        task: &TransferTask,
        cancel: &CancellationToken,
    ) -> Result<UploadReceipt, UploadError> {
        let started = Instant::now();
        let mut attempt = 1;
        loop {
            match self.attempt(task, cancel) {
                Ok((remote_path, bytes)) => {
                    info!(
                        local = %task.local_path.display(),
                        remote = %remote_path,
                        bytes,
                        attempts = attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Upload complete"
                    );
                    return Ok(UploadReceipt {
                        remote_path,
                        bytes,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_transient() && self.options.retry.allows_retry_after(attempt) => {
                    let delay = self.options.retry.backoff_after(attempt);
                    warn!(
                        local = %task.local_path.display(),
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Upload failed (transient), retrying"
                    );
                    if !cancel.sleep(delay) {
                        return Err(UploadError::Cancelled);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn stream_to<S: RemoteSession>(
    session: &mut S,
    local: &mut File,
    remote_path: &str,
    cancel: &CancellationToken,
) -> Result<u64, UploadError> {
    let transfer_err = |message: String| UploadError::Transfer {
        path: remote_path.to_string(),
        message,
    };

    let mut remote = session
        .create_file(remote_path)
        .map_err(|e| transfer_err(e.to_string()))?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        let n = local
            .read(&mut buf)
            .map_err(|e| transfer_err(format!("local read: {}", e)))?;
        if n == 0 {
            break;
        }
        remote
            .write_all(&buf[..n])
            .map_err(|e| transfer_err(e.to_string()))?;
        total += n as u64;
    }
    remote.flush().map_err(|e| transfer_err(e.to_string()))?;
    Ok(total)
}

/// Rename the partial file into place. Servers without overwrite-on-rename
/// need the target removed first.
fn publish<S: RemoteSession>(session: &mut S, from: &str, to: &str) -> Result<(), UploadError> {
    let first = match session.rename(from, to) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    let rename_failed = |e: &SessionError| UploadError::Transfer {
        path: to.to_string(),
        message: format!("rename from {} failed: {}", from, e),
    };

    // Only a present target justifies replacing it; anything else keeps the published copy.
    match session.exists(to) {
        Ok(true) => {}
        Ok(false) => return Err(rename_failed(&first)),
        Err(e) => {
            debug!(path = to, error = %e, "Could not stat rename target");
            return Err(rename_failed(&first));
        }
    }

    debug!(from, to, error = %first, "Rename refused over existing target, replacing it");
    session.remove_file(to).map_err(|e| rename_failed(&e))?;
    session.rename(from, to).map_err(|e| rename_failed(&e))
}

fn discard_partial<S: RemoteSession>(session: &mut S, path: &str) {
    if let Err(e) = session.remove_file(path) {
        debug!(path, error = %e, "Could not remove partial upload");
    }
}
