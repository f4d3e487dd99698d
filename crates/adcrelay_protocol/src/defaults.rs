//! Canonical default values shared by the watcher, the uploader and the launcher.

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 3;
pub const DEFAULT_MAX_UPLOAD_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 8_000;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

/// Environment variable that overrides the configured remote password.
pub const REMOTE_SECRET_ENV: &str = "ADCRELAY_REMOTE_SECRET";

/// Suffix appended to the temporary remote name while bytes are in flight.
pub const PARTIAL_UPLOAD_SUFFIX: &str = ".part";
