/// ICMP reachability prober
///
/// This module is responsible for:
/// - Owning one listener task per IP family for the prober's lifetime
/// - Matching echo replies to the probe waiting on that address
/// - Pinging every registered target in order and reporting the silent ones
pub mod correlation;
pub mod listener;
pub mod packet;
pub mod socket;

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, info, warn};

use crate::error::{ConfigError, ProbeError};
use crate::event::FailureEvent;
use crate::registry::PingTarget;
use crate::scheduler::{EVENT_BUFFER, Probe};

use correlation::PendingReplies;
use listener::EndpointHandle;
use packet::{ECHO_PAYLOAD, ECHO_SEQUENCE, Echo};
pub use socket::{IcmpSocket, SocketFactory, SocketKind, SystemSocketFactory};

/// Default time to wait for an echo reply
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// IP address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => IpFamily::V4,
            IpAddr::V6(_) => IpFamily::V6,
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::V4 => write!(f, "IPv4"),
            IpFamily::V6 => write!(f, "IPv6"),
        }
    }
}

/// Settings for the ICMP prober
#[derive(Debug, Clone)]
pub struct IcmpConfig {
    /// How long a probe waits for its echo reply
    pub timeout: Duration,

    /// Echo identifier put on every request
    pub identifier: u16,
}

impl Default for IcmpConfig {
    fn default() -> Self {
        Self { timeout: DEFAULT_TIMEOUT, identifier: packet::process_identifier() }
    }
}

impl IcmpConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Pings registered targets one at a time over long-lived ICMP sockets
pub struct IcmpProber {
    targets: Vec<PingTarget>,
    config: IcmpConfig,
    pending: Arc<PendingReplies>,
    v4: Option<EndpointHandle>,
    v6: Option<EndpointHandle>,
    errors: Mutex<mpsc::UnboundedReceiver<ProbeError>>,
    listeners: Vec<JoinHandle<()>>,
    span: Span,
}

impl IcmpProber {
    /// Open sockets and start listeners for every family the targets use.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        targets: Vec<PingTarget>,
        config: IcmpConfig,
        factory: Arc<dyn SocketFactory>,
    ) -> Result<Self, ConfigError> {
        let span = tracing::info_span!("icmp_prober");
        let _enter = span.enter();

        let pending = PendingReplies::new();
        let (errors_tx, errors) = mpsc::unbounded_channel();
        let mut listeners = Vec::new();

        let mut open = |family: IpFamily| -> Result<Option<EndpointHandle>, ConfigError> {
            if !targets.iter().any(|target| target.family() == family) {
                return Ok(None);
            }
            let (handle, task) = listener::spawn(
                family,
                Arc::clone(&factory),
                Arc::clone(&pending),
                errors_tx.clone(),
            )?;
            listeners.push(task);
            Ok(Some(handle))
        };

        let v4 = open(IpFamily::V4)?;
        let v6 = open(IpFamily::V6)?;
        info!(targets = targets.len(), timeout = ?config.timeout, "ICMP prober started");
        drop(_enter);

        Ok(Self { targets, config, pending, v4, v6, errors: Mutex::new(errors), listeners, span })
    }

    pub fn targets(&self) -> &[PingTarget] {
        &self.targets
    }

    /// Ping one target and wait for its reply, or for the listener to report
    /// a timeout or failure.
    pub async fn probe(&self, target: &PingTarget) -> Result<(), ProbeError> {
        let family = target.family();
        let endpoint = match family {
            IpFamily::V4 => self.v4.as_ref(),
            IpFamily::V6 => self.v6.as_ref(),
        }
        .ok_or(ProbeError::ListenerStopped(family))?;

        // Holding the receiver for the whole probe keeps probes sequential.
        let mut errors = self.errors.lock().await;
        while let Ok(stale) = errors.try_recv() {
            debug!(error = %stale, "discarding stale listener error");
        }

        let mut waiter = self.pending.register(target.resolved_ip);
        let request =
            Echo::new(self.config.identifier, ECHO_SEQUENCE, ECHO_PAYLOAD).to_request(family);
        endpoint.send(request, target.resolved_ip, self.config.timeout).await?;

        tokio::select! {
            biased;
            reply = waiter.wait() => reply.map_err(|_| ProbeError::ListenerStopped(family)),
            error = errors.recv() => Err(error.unwrap_or(ProbeError::ListenerStopped(family))),
        }
    }
}

impl Probe for IcmpProber {
    fn name(&self) -> String {
        "icmp".to_string()
    }

    fn run(self: Arc<Self>) -> mpsc::Receiver<FailureEvent> {
        let (events, stream) = mpsc::channel(EVENT_BUFFER);
        let span = self.span.clone();

        tokio::spawn(
            async move {
                for target in &self.targets {
                    info!(target_name = %target.name, address = %target.host_address, "pinging");
                    let Err(err) = self.probe(target).await else {
                        continue;
                    };

                    warn!(target_name = %target.name, error = %err, "host did not respond");
                    let event = FailureEvent::HostUnreachable {
                        target_name: target.name.clone(),
                        address: target.host_address.clone(),
                        cause: err.to_string(),
                    };
                    if events.send(event).await.is_err() {
                        debug!("event consumer went away, stopping early");
                        break;
                    }
                }
            }
            .instrument(span),
        );

        stream
    }
}

impl Drop for IcmpProber {
    fn drop(&mut self) {
        for task in &self.listeners {
            task.abort();
        }
    }
}
