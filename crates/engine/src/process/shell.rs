//! Remote command execution.

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use ssh2::Session;

use crate::error::SessionError;
use crate::registry::{Credentials, RemoteSession};

/// A remote command-execution channel
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run `command` remotely and return its standard output
    async fn exec(&self, command: &str) -> Result<String, SessionError>;
}

/// [`RemoteShell`] over SSH.
///
/// The session is opened on first use and reused for later commands. Any
/// failure drops it so the next command reconnects.
pub struct SshShell {
    config: Arc<RemoteSession>,
    session: Arc<Mutex<Option<Session>>>,
}

impl SshShell {
    pub fn new(config: RemoteSession) -> Self {
        Self { config: Arc::new(config), session: Arc::new(Mutex::new(None)) }
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn exec(&self, command: &str) -> Result<String, SessionError> {
        let config = Arc::clone(&self.config);
        let session = Arc::clone(&self.session);
        let command = command.to_string();

        tokio::task::spawn_blocking(move || {
            let mut cached = session.lock();
            let result = match cached.take() {
                Some(existing) => Ok(existing),
                None => connect(&config),
            }
            .and_then(|ssh| {
                let output = run(&ssh, &command)?;
                Ok((ssh, output))
            });

            match result {
                Ok((ssh, output)) => {
                    *cached = Some(ssh);
                    Ok(output)
                }
                Err(err) => Err(err),
            }
        })
        .await
        .map_err(|err| SessionError::Aborted(err.to_string()))?
    }
}

fn connect(config: &RemoteSession) -> Result<Session, SessionError> {
    let address = config.address();
    let connect_error = |source| SessionError::Connect { address: address.clone(), source };

    let socket_addr = (config.server.as_str(), config.port)
        .to_socket_addrs()
        .map_err(connect_error)?
        .next()
        .ok_or_else(|| {
            connect_error(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no address for ssh server",
            ))
        })?;

    let tcp = match config.command_timeout {
        Some(timeout) => TcpStream::connect_timeout(&socket_addr, timeout),
        None => TcpStream::connect(socket_addr),
    }
    .map_err(connect_error)?;

    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    if let Some(timeout) = config.command_timeout {
        session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
    }
    session.handshake()?;

    match &config.credentials {
        Credentials::Password(password) => session.userauth_password(&config.user, password)?,
        Credentials::KeyFile(path) => session.userauth_pubkey_file(&config.user, None, path, None)?,
    }
    if !session.authenticated() {
        return Err(SessionError::Authentication { user: config.user.clone() });
    }

    tracing::debug!(server = %address, user = %config.user, "ssh session established");
    Ok(session)
}

fn run(session: &Session, command: &str) -> Result<String, SessionError> {
    let mut channel = session.channel_session()?;
    channel.exec(command)?;

    let mut stdout = String::new();
    channel.read_to_string(&mut stdout)?;
    let mut stderr = String::new();
    channel.stderr().read_to_string(&mut stderr)?;
    channel.wait_close()?;

    let status = channel.exit_status()?;
    tracing::trace!(command, status, "remote command finished");
    command_output(status, stdout, stderr)
}

/// Map a finished command to its output.
///
/// Status 1 is how `pgrep` reports "no match" and yields the (empty) output.
/// Any other non-zero status means the command itself could not run, such as
/// a bad pattern (2) or a missing binary (127).
pub fn command_output(
    status: i32,
    stdout: String,
    stderr: String,
) -> Result<String, SessionError> {
    match status {
        0 | 1 => Ok(stdout),
        status => Err(SessionError::CommandFailed { status, stderr: stderr.trim().to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output() {
        assert_eq!(command_output(0, "311\n".into(), String::new()).unwrap(), "311\n");
        assert_eq!(command_output(1, String::new(), String::new()).unwrap(), "");
    }

    #[test]
    fn test_failed_command_is_a_session_error() {
        let err = command_output(127, String::new(), "sh: pgrep: not found\n".into()).unwrap_err();
        assert!(matches!(
            &err,
            SessionError::CommandFailed { status: 127, stderr } if stderr == "sh: pgrep: not found"
        ));

        let err = command_output(2, String::new(), "pgrep: invalid option".into()).unwrap_err();
        assert_eq!(err.to_string(), "remote command exited with status 2: pgrep: invalid option");
    }
}
