//! Error types for the probe engine.
//!
//! Only [`ConfigError`] is allowed to stop the process. Every other error is
//! rendered into the `cause` of a [`FailureEvent`](crate::FailureEvent) by the
//! prober that observed it.

use std::io::Error as IoError;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::icmp::IpFamily;

/// Startup validation failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("must provide either a password or a key file for ssh server {server}")]
    MissingCredentials { server: String },

    #[error("ssh server {server} has both a password and a key file, only one is allowed")]
    AmbiguousCredentials { server: String },

    #[error("key file for ssh does not exist: {}", path.display())]
    KeyFileMissing { path: PathBuf },

    #[error("must specify an ssh server")]
    MissingServer,

    #[error("must specify an ssh user for server {server}")]
    MissingUser { server: String },

    #[error("could not resolve address {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: IoError,
    },

    #[error("address {address} did not resolve to any IP")]
    NoAddress { address: String },

    #[error("could not open {family} ICMP socket: {source}")]
    Socket {
        family: IpFamily,
        #[source]
        source: IoError,
    },

    #[error("probe interval must be greater than zero")]
    ZeroInterval,
}

/// Failure of a single echo probe
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no echo reply within {0:?}")]
    Timeout(Duration),

    #[error("could not send ping to {target}: {source}")]
    Send {
        target: IpAddr,
        #[source]
        source: IoError,
    },

    #[error("{family} listener failed: {reason}")]
    Listener { family: IpFamily, reason: String },

    #[error("{0} listener is no longer running")]
    ListenerStopped(IpFamily),
}

/// Malformed ICMP message
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("message truncated: {0} bytes")]
    Truncated(usize),

    #[error("malformed IPv4 header")]
    BadIpHeader,
}

/// Failure of the remote command-execution session itself
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("could not connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: IoError,
    },

    #[error("ssh: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("authentication rejected for user {user}")]
    Authentication { user: String },

    #[error("remote command exited with status {status}: {stderr}")]
    CommandFailed { status: i32, stderr: String },

    #[error("{0:#}")]
    Io(#[from] IoError),

    #[error("remote command task aborted: {0}")]
    Aborted(String),
}

/// Failure to deliver a report
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook responded with status {0}")]
    Status(u16),

    #[error("smtp delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("could not build email: {0}")]
    Email(#[from] lettre::error::Error),

    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("no email recipients configured")]
    NoRecipients,

    #[error("{failed} of {total} notifiers failed")]
    Partial { failed: usize, total: usize },
}
