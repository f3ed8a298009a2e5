//! watchpost engine - periodic reachability and process checks
//!
//! This library runs heterogeneous probers on a schedule and streams the
//! failures they find to a notifier:
//! - ICMP echo probes against configured hosts
//! - `pgrep` presence checks on remote hosts over SSH
//!
//! Reports go to the log, a webhook or an SMTP relay.

pub mod error;
pub mod event;
pub mod icmp;
pub mod notifier;
pub mod process;
pub mod registry;
pub mod render;
pub mod scheduler;

use std::sync::Arc;

// Re-export main types
pub use error::{ConfigError, NotifyError, PacketError, ProbeError, SessionError};
pub use event::{FailureEvent, FailureKind};
pub use icmp::{IcmpConfig, IcmpProber, IpFamily, SocketKind, SystemSocketFactory};
pub use notifier::{
    FanoutNotifier, LogNotifier, Notifier, SmtpNotifier, SmtpSettings, WebhookNotifier,
};
pub use process::{ProcessProber, RemoteShell, SshShell};
pub use registry::{
    Credentials, PingTarget, ProgramCheck, RemoteSession, RemoteSessionConfig, TargetRegistry,
};
pub use render::{Report, render};
pub use scheduler::{Probe, Scheduler, SweepSummary};

/// Build the probers for everything in `registry`, ICMP first, then one
/// process prober per remote session in registration order.
pub fn probes_for(
    registry: TargetRegistry,
    icmp: IcmpConfig,
    sockets: Arc<dyn icmp::SocketFactory>,
) -> Result<Vec<Arc<dyn Probe>>, ConfigError> {
    let (ping_targets, sessions) = registry.into_parts();
    let mut probes: Vec<Arc<dyn Probe>> = Vec::new();

    if !ping_targets.is_empty() {
        probes.push(Arc::new(IcmpProber::start(ping_targets, icmp, sockets)?));
    }
    for session in sessions {
        probes.push(Arc::new(ProcessProber::ssh(session)));
    }

    Ok(probes)
}
