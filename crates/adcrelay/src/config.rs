//! Configuration for the relay

use adcrelay_protocol::defaults::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_INITIAL_BACKOFF_MS, DEFAULT_MAX_BACKOFF_MS,
    DEFAULT_MAX_CONCURRENT_UPLOADS, DEFAULT_MAX_UPLOAD_ATTEMPTS, DEFAULT_SHUTDOWN_GRACE_SECS,
    DEFAULT_SSH_PORT, REMOTE_SECRET_ENV,
};
use adcrelay_upload::{RetryPolicy, UploadOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration for the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Directory watched recursively for capture files
    #[serde(default)]
    pub watch_root: Option<PathBuf>,

    /// How long in-flight uploads get to finish on shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// File name that marks a run directory as finished
    #[serde(default)]
    pub end_of_run_marker: Option<String>,

    pub remote: RemoteConfig,

    #[serde(default)]
    pub uploads: UploadConfig,
}

/// Remote SFTP endpoint
#[derive(Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    #[serde(default)]
    pub key_file: Option<PathBuf>,

    #[serde(default, skip_serializing)]
    pub key_passphrase: Option<String>,

    /// Remote directory that receives one subdirectory per run
    pub remote_root: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_file", &self.key_file)
            .field("key_passphrase", &self.key_passphrase.as_ref().map(|_| "<redacted>"))
            .field("remote_root", &self.remote_root)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Upload worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Connection attempts per file (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Upload under a temporary name and rename into place
    #[serde(default = "default_atomic_rename")]
    pub atomic_rename: bool,
}

fn default_shutdown_grace() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_SECS
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT_UPLOADS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_UPLOAD_ATTEMPTS
}

fn default_initial_backoff() -> u64 {
    DEFAULT_INITIAL_BACKOFF_MS
}

fn default_max_backoff() -> u64 {
    DEFAULT_MAX_BACKOFF_MS
}

fn default_atomic_rename() -> bool {
    true
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            atomic_rename: default_atomic_rename(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file, apply the secret override from
    /// the environment, then validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let Ok(secret) = std::env::var(REMOTE_SECRET_ENV) {
            config.apply_secret_override(secret);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Replace the configured secret with a password from outside the file.
    pub fn apply_secret_override(&mut self, password: String) {
        self.remote.password = Some(password);
        self.remote.key_file = None;
        self.remote.key_passphrase = None;
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let remote = &self.remote;
        if remote.host.trim().is_empty() {
            return Err(ConfigError::Invalid("remote.host must not be empty".into()));
        }
        if remote.username.trim().is_empty() {
            return Err(ConfigError::Invalid("remote.username must not be empty".into()));
        }
        if remote.remote_root.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "remote.remote_root must not be empty".into(),
            ));
        }
        match (&remote.password, &remote.key_file) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(
                    "set either remote.password or remote.key_file, not both".into(),
                ))
            }
            (None, None) => {
                return Err(ConfigError::Invalid(format!(
                    "no secret configured: set remote.password, remote.key_file or {}",
                    REMOTE_SECRET_ENV
                )))
            }
            _ => {}
        }
        if self.uploads.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "uploads.max_concurrent must be at least 1".into(),
            ));
        }
        if self.uploads.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "uploads.max_attempts must be at least 1".into(),
            ));
        }
        if let Some(marker) = &self.end_of_run_marker {
            if marker.is_empty() || marker.contains(['/', '\\']) {
                return Err(ConfigError::Invalid(format!(
                    "end_of_run_marker must be a plain file name, got {:?}",
                    marker
                )));
            }
        }
        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.connect_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.uploads.max_attempts,
            initial_backoff: Duration::from_millis(self.uploads.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.uploads.max_backoff_ms),
        }
    }

    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            remote_root: self.remote.remote_root.clone(),
            atomic_rename: self.uploads.atomic_rename,
            retry: self.retry_policy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [remote]
        host = "10.5.20.128"
        username = "operator"
        password = "hunter2"
        remote_root = "/srv/captures"
    "#;

    #[test]
    fn test_defaults_applied() {
        let config = RelayConfig::from_toml(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.watch_root, None);
        assert_eq!(config.shutdown_grace_secs, 10);
        assert_eq!(config.end_of_run_marker, None);
        assert_eq!(config.remote.port, 22);
        assert_eq!(config.remote.connect_timeout_secs, 15);
        assert_eq!(config.uploads.max_concurrent, 3);
        assert_eq!(config.uploads.max_attempts, 3);
        assert!(config.uploads.atomic_rename);

        let retry = config.retry_policy();
        assert_eq!(retry.initial_backoff, Duration::from_millis(500));
        assert_eq!(retry.max_backoff, Duration::from_millis(8_000));
    }

    #[test]
    fn test_full_config() {
        let config = RelayConfig::from_toml(
            r#"
            watch_root = "/data"
            shutdown_grace_secs = 30
            end_of_run_marker = "capture.done"

            [remote]
            host = "daq-store"
            port = 2222
            username = "operator"
            key_file = "/home/operator/.ssh/id_ed25519"
            key_passphrase = "pp"
            remote_root = "captures"
            connect_timeout_secs = 5

            [uploads]
            max_concurrent = 1
            max_attempts = 1
            initial_backoff_ms = 100
            max_backoff_ms = 200
            atomic_rename = false
            "#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.watch_root, Some(PathBuf::from("/data")));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(30));
        assert_eq!(config.end_of_run_marker.as_deref(), Some("capture.done"));
        assert_eq!(config.remote.port, 2222);
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));

        let options = config.upload_options();
        assert_eq!(options.remote_root, "captures");
        assert!(!options.atomic_rename);
        assert_eq!(options.retry.max_attempts, 1);
    }

    #[test]
    fn test_missing_remote_section_fails_to_parse() {
        assert!(RelayConfig::from_toml("watch_root = \"/data\"").is_err());
    }

    fn invalid(mutate: impl FnOnce(&mut RelayConfig)) -> String {
        let mut config = RelayConfig::from_toml(MINIMAL).unwrap();
        mutate(&mut config);
        match config.validate() {
            Err(ConfigError::Invalid(msg)) => msg,
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(invalid(|c| c.remote.host = "  ".into()).contains("host"));
        assert!(invalid(|c| c.remote.username = String::new()).contains("username"));
        assert!(invalid(|c| c.remote.remote_root = String::new()).contains("remote_root"));
        assert!(invalid(|c| c.uploads.max_concurrent = 0).contains("max_concurrent"));
        assert!(invalid(|c| c.uploads.max_attempts = 0).contains("max_attempts"));
        assert!(invalid(|c| c.end_of_run_marker = Some("a/b".into())).contains("end_of_run_marker"));
    }

    #[test]
    fn test_validation_requires_exactly_one_secret() {
        assert!(invalid(|c| c.remote.key_file = Some("/k".into())).contains("not both"));
        assert!(invalid(|c| c.remote.password = None).contains(REMOTE_SECRET_ENV));
    }

    #[test]
    fn test_secret_override_replaces_key_file() {
        let mut config = RelayConfig::from_toml(MINIMAL).unwrap();
        config.remote.password = None;
        config.remote.key_file = Some("/k".into());

        config.apply_secret_override("from-env".into());
        config.validate().unwrap();
        assert_eq!(config.remote.password.as_deref(), Some("from-env"));
        assert!(config.remote.key_file.is_none());
    }

    #[test]
    fn test_debug_and_serialization_hide_secrets() {
        let config = RelayConfig::from_toml(MINIMAL).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(!toml_str.contains("hunter2"));
    }

    #[test]
    fn test_load_reports_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("relay.toml");
        std::fs::write(&path, "not = [valid").unwrap();

        let err = RelayConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("relay.toml"));

        let err = RelayConfig::load(&tmp.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
