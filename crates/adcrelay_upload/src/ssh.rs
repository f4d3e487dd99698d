//! SFTP sessions over `ssh2`.

use crate::error::SessionError;
use crate::session::{RemoteSession, SessionConnector};
use adcrelay_protocol::defaults::DEFAULT_CONNECT_TIMEOUT_SECS;
use adcrelay_protocol::{Credentials, Secret};
use ssh2::{ErrorCode, RenameFlags, Session, Sftp};
use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, trace};

// libssh2 SSH_FX_NO_SUCH_FILE
const LIBSSH2_FX_NO_SUCH_FILE: i32 = 2;

/// Opens password- or key-authenticated SFTP sessions.
///
/// The host key is not checked against `known_hosts`.
#[derive(Debug, Clone)]
pub struct SshConnector {
    connect_timeout: Duration,
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
    }
}

impl SshConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl SessionConnector for SshConnector {
    type Session = SshSession;

    fn connect(&self, credentials: &Credentials) -> Result<SshSession, SessionError> {
        let endpoint = &credentials.endpoint;
        let addr = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| SessionError::new(format!("cannot resolve {}", endpoint)))?;

        let tcp = TcpStream::connect_timeout(&addr, self.connect_timeout)?;
        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.set_timeout(self.connect_timeout.as_millis().min(u32::MAX as u128) as u32);
        session.handshake()?;

        match &credentials.secret {
            Secret::Password(password) => {
                session.userauth_password(&credentials.username, password)?;
            }
            Secret::KeyFile { path, passphrase } => {
                session.userauth_pubkey_file(
                    &credentials.username,
                    None,
                    path,
                    passphrase.as_deref(),
                )?;
            }
        }
        if !session.authenticated() {
            return Err(SessionError::new(format!(
                "authentication rejected for {}@{}",
                credentials.username, endpoint
            )));
        }

        let sftp = session.sftp()?;
        debug!(%endpoint, "SFTP channel open");
        Ok(SshSession {
            session,
            sftp: Some(sftp),
        })
    }
}

pub struct SshSession {
    session: Session,
    sftp: Option<Sftp>,
}

impl SshSession {
    fn sftp(&self) -> Result<&Sftp, SessionError> {
        self.sftp
            .as_ref()
            .ok_or_else(|| SessionError::new("session already closed"))
    }
}

impl RemoteSession for SshSession {
    fn ensure_dir(&mut self, path: &str) -> Result<(), SessionError> {
        let sftp = self.sftp()?;
        let absolute = path.starts_with('/');
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if absolute || !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);

            let dir = Path::new(&current);
            match sftp.stat(dir) {
                Ok(stat) if stat.is_dir() => continue,
                Ok(_) => {
                    return Err(SessionError::new(format!("{} exists and is not a directory", current)))
                }
                Err(_) => {}
            }
            if let Err(e) = sftp.mkdir(dir, 0o755) {
                // Lost a race with another uploader creating the same run directory.
                match sftp.stat(dir) {
                    Ok(stat) if stat.is_dir() => {}
                    _ => return Err(SessionError::from(e)),
                }
            }
            trace!(dir = %current, "Remote directory ready");
        }
        Ok(())
    }

    fn create_file<'a>(&'a mut self, path: &str) -> Result<Box<dyn Write + 'a>, SessionError> {
        let file = self.sftp()?.create(Path::new(path))?;
        Ok(Box::new(file))
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), SessionError> {
        self.sftp()?.rename(
            Path::new(from),
            Path::new(to),
            Some(RenameFlags::OVERWRITE | RenameFlags::ATOMIC | RenameFlags::NATIVE),
        )?;
        Ok(())
    }

    fn remove_file(&mut self, path: &str) -> Result<(), SessionError> {
        self.sftp()?.unlink(Path::new(path))?;
        Ok(())
    }

    fn exists(&mut self, path: &str) -> Result<bool, SessionError> {
        match self.sftp()?.stat(Path::new(path)) {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.code(), ErrorCode::SFTP(LIBSSH2_FX_NO_SUCH_FILE)) => Ok(false),
            Err(e) => Err(SessionError::from(e)),
        }
    }

    fn close(&mut self) {
        // SFTP channel must go before the transport.
        drop(self.sftp.take());
        if let Err(e) = self
            .session
            .disconnect(None, "adcrelay upload finished", None)
        {
            debug!(error = %e, "SSH disconnect failed");
        }
    }
}
