//! Target registry: the probe targets configured at startup.
//!
//! Targets are validated and resolved once, then never change. Both lists keep
//! registration order so sweeps emit events deterministically.

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::icmp::IpFamily;

/// Port used when a remote session does not name one
pub const DEFAULT_SSH_PORT: u16 = 22;

/// A host to ping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingTarget {
    /// Display name from the configuration
    pub name: String,

    /// Address as configured (hostname or literal IP)
    pub host_address: String,

    /// Address the echo requests are sent to
    pub resolved_ip: IpAddr,
}

impl PingTarget {
    /// Resolve `host_address` and build a target.
    ///
    /// Literal IPs skip DNS entirely. Hostnames take the first address the
    /// resolver returns.
    pub async fn resolve(
        name: impl Into<String>,
        host_address: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let host_address = host_address.into();

        if let Ok(ip) = host_address.parse::<IpAddr>() {
            return Ok(Self::with_ip(name, host_address, ip));
        }

        let ip = tokio::net::lookup_host((host_address.clone(), 0))
            .await
            .map_err(|source| ConfigError::Resolve { address: host_address.clone(), source })?
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| ConfigError::NoAddress { address: host_address.clone() })?;

        tracing::info!(target_name = %name, address = %host_address, %ip, "resolved ping target");
        Ok(Self::with_ip(name, host_address, ip))
    }

    /// Build a target from an already resolved address
    pub fn with_ip(name: impl Into<String>, host_address: impl Into<String>, ip: IpAddr) -> Self {
        Self { name: name.into(), host_address: host_address.into(), resolved_ip: ip }
    }

    pub fn family(&self) -> IpFamily {
        IpFamily::of(&self.resolved_ip)
    }

    pub fn is_ipv4(&self) -> bool {
        self.resolved_ip.is_ipv4()
    }
}

/// How a remote session authenticates
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Password(String),
    KeyFile(PathBuf),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password(_) => f.write_str("Password(***)"),
            Credentials::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
        }
    }
}

/// A program whose process must be running on the remote host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramCheck {
    /// Display name
    pub name: String,

    /// Pattern handed to `pgrep`
    pub process: String,
}

impl ProgramCheck {
    pub fn new(name: impl Into<String>, process: impl Into<String>) -> Self {
        Self { name: name.into(), process: process.into() }
    }
}

/// Unvalidated remote session descriptor, as read from configuration
#[derive(Debug, Clone, Default)]
pub struct RemoteSessionConfig {
    pub server: String,
    pub user: String,
    pub password: Option<String>,
    pub key: Option<PathBuf>,
    pub port: Option<u16>,
    pub command_timeout: Option<Duration>,
    pub programs: Vec<ProgramCheck>,
}

/// Validated remote session with its ordered program checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSession {
    pub server: String,
    pub user: String,
    pub credentials: Credentials,
    pub port: u16,
    pub command_timeout: Option<Duration>,
    pub programs: Vec<ProgramCheck>,
}

impl RemoteSessionConfig {
    /// Check the descriptor and turn it into a [`RemoteSession`].
    ///
    /// Exactly one of password or key file must be set, and a key file must
    /// exist on disk.
    pub fn validate(self) -> Result<RemoteSession, ConfigError> {
        if self.server.trim().is_empty() {
            return Err(ConfigError::MissingServer);
        }
        if self.user.trim().is_empty() {
            return Err(ConfigError::MissingUser { server: self.server });
        }

        let password = self.password.filter(|p| !p.is_empty());
        let key = self.key.filter(|k| !k.as_os_str().is_empty());

        let credentials = match (password, key) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::AmbiguousCredentials { server: self.server });
            }
            (None, None) => return Err(ConfigError::MissingCredentials { server: self.server }),
            (Some(password), None) => Credentials::Password(password),
            (None, Some(path)) => {
                if !path.exists() {
                    return Err(ConfigError::KeyFileMissing { path });
                }
                Credentials::KeyFile(path)
            }
        };

        Ok(RemoteSession {
            server: self.server,
            user: self.user,
            credentials,
            port: self.port.unwrap_or(DEFAULT_SSH_PORT),
            command_timeout: self.command_timeout,
            programs: self.programs,
        })
    }
}

impl RemoteSession {
    /// `host:port` string used to connect
    pub fn address(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }
}

/// All configured targets, in registration order
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    ping_targets: Vec<PingTarget>,
    sessions: Vec<RemoteSession>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ping_target(&mut self, target: PingTarget) {
        self.ping_targets.push(target);
    }

    pub fn add_session(&mut self, session: RemoteSession) {
        self.sessions.push(session);
    }

    pub fn ping_targets(&self) -> &[PingTarget] {
        &self.ping_targets
    }

    pub fn sessions(&self) -> &[RemoteSession] {
        &self.sessions
    }

    pub fn is_empty(&self) -> bool {
        self.ping_targets.is_empty() && self.sessions.is_empty()
    }

    /// Split into owned parts for handing to the probers
    pub fn into_parts(self) -> (Vec<PingTarget>, Vec<RemoteSession>) {
        (self.ping_targets, self.sessions)
    }
}
