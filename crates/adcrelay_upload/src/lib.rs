//! Upload client: one local file to `<remote_root>/<run>/<name>` per call.
//!
//! Design principles:
//! - Credentials resolved once, shared read-only via `Arc`
//! - Session opened per upload and closed by a scope guard on every exit path
//! - Bytes land under a temporary name and are renamed into place
//! - Only connection-class failures are retried
//! - Blocking; callers run it off the event path

pub mod cancel;
pub mod client;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod retry;
pub mod session;
pub mod ssh;

pub use cancel::CancellationToken;
pub use client::{UploadClient, UploadOptions, UploadReceipt, Uploader};
pub use error::{SessionError, UploadError};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::{MemoryConnector, MemoryRemote};
pub use retry::RetryPolicy;
pub use session::{RemoteSession, SessionConnector, SessionGuard};
pub use ssh::{SshConnector, SshSession};
