use serde::{Deserialize, Serialize};

/// Tag of a [`FailureEvent`] variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    HostUnreachable,
    ProcessMissing,
    RemoteSessionError,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::HostUnreachable => write!(f, "host_unreachable"),
            FailureKind::ProcessMissing => write!(f, "process_missing"),
            FailureKind::RemoteSessionError => write!(f, "remote_session_error"),
        }
    }
}

/// A failed check, produced by a prober and consumed once by the notifier.
///
/// Every variant carries enough context to render a report on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureEvent {
    /// A ping target did not answer an echo request
    HostUnreachable {
        target_name: String,
        address: String,
        cause: String,
    },

    /// The remote session worked but no process matched the pattern
    ProcessMissing {
        program_name: String,
        process_pattern: String,
        server_address: String,
    },

    /// The remote session could not run the presence check
    RemoteSessionError {
        server_address: String,
        program_name: String,
        process_pattern: String,
        cause: String,
    },
}

impl FailureEvent {
    pub fn kind(&self) -> FailureKind {
        match self {
            FailureEvent::HostUnreachable { .. } => FailureKind::HostUnreachable,
            FailureEvent::ProcessMissing { .. } => FailureKind::ProcessMissing,
            FailureEvent::RemoteSessionError { .. } => FailureKind::RemoteSessionError,
        }
    }

    /// Host name or address the failure was observed on
    pub fn subject(&self) -> &str {
        match self {
            FailureEvent::HostUnreachable { target_name, .. } => target_name,
            FailureEvent::ProcessMissing { server_address, .. }
            | FailureEvent::RemoteSessionError { server_address, .. } => server_address,
        }
    }
}
