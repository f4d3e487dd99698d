//! Credential resolution.
//!
//! Resolved once at startup into an immutable [`Credentials`] that upload
//! workers share through an `Arc`. Nothing here logs the secret.

use crate::config::{ConfigError, RemoteConfig};
use adcrelay_protocol::{Credentials, RemoteEndpoint, Secret};
use std::sync::Arc;

/// Anything that can produce the remote identity.
pub trait CredentialSource {
    fn resolve(&self) -> Result<Credentials, ConfigError>;
}

/// Credentials taken from the `[remote]` section of the config file.
pub struct ConfigCredentials<'a> {
    remote: &'a RemoteConfig,
}

impl<'a> ConfigCredentials<'a> {
    pub fn new(remote: &'a RemoteConfig) -> Self {
        Self { remote }
    }
}

impl CredentialSource for ConfigCredentials<'_> {
    fn resolve(&self) -> Result<Credentials, ConfigError> {
        let remote = self.remote;
        let secret = match (&remote.password, &remote.key_file) {
            (Some(password), None) => Secret::Password(password.clone()),
            (None, Some(path)) => Secret::KeyFile {
                path: path.clone(),
                passphrase: remote.key_passphrase.clone(),
            },
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(
                    "set either remote.password or remote.key_file, not both".into(),
                ))
            }
            (None, None) => return Err(ConfigError::Invalid("no remote secret configured".into())),
        };

        Ok(Credentials {
            endpoint: RemoteEndpoint::new(remote.host.trim()).with_port(remote.port),
            username: remote.username.clone(),
            secret,
        })
    }
}

/// Resolve once and freeze for sharing.
pub fn resolve_shared(source: &dyn CredentialSource) -> Result<Arc<Credentials>, ConfigError> {
    source.resolve().map(Arc::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use std::path::PathBuf;

    fn remote(extra: &str) -> RemoteConfig {
        let toml_str = format!(
            "[remote]\nhost = \" daq-store \"\nport = 2200\nusername = \"op\"\nremote_root = \"/r\"\n{}",
            extra
        );
        RelayConfig::from_toml(&toml_str).unwrap().remote
    }

    #[test]
    fn test_password_credentials() {
        let remote = remote("password = \"s3cret\"");
        let creds = resolve_shared(&ConfigCredentials::new(&remote)).unwrap();

        assert_eq!(creds.endpoint.to_string(), "daq-store:2200");
        assert_eq!(creds.username, "op");
        assert_eq!(creds.secret, Secret::Password("s3cret".into()));
        assert!(!format!("{:?}", creds).contains("s3cret"));
    }

    #[test]
    fn test_key_file_credentials() {
        let remote = remote("key_file = \"/keys/id\"\nkey_passphrase = \"pp\"");
        let creds = ConfigCredentials::new(&remote).resolve().unwrap();

        assert_eq!(
            creds.secret,
            Secret::KeyFile {
                path: PathBuf::from("/keys/id"),
                passphrase: Some("pp".into()),
            }
        );
    }

    #[test]
    fn test_missing_secret() {
        let remote = remote("");
        assert!(ConfigCredentials::new(&remote).resolve().is_err());
    }
}
