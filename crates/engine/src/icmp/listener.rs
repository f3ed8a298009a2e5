//! Per-family listener task.
//!
//! The task owns its socket exclusively. Probes hand it echo requests through
//! [`EndpointHandle::send`], which also arms the read deadline; the task
//! delivers replies into the [`PendingReplies`] table. Read and parse errors
//! reopen the socket, backing off while they keep coming, and are reported on
//! the shared error channel only when a probe is waiting. An expired deadline
//! is reported the same way. The task only stops once every handle is dropped.

use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{Instrument, debug, error, info, warn};

use super::correlation::PendingReplies;
use super::packet::{self, Message};
use super::socket::{IcmpSocket, SocketFactory};
use super::IpFamily;
use crate::error::{ConfigError, ProbeError};

const MAX_MESSAGE_LEN: usize = 1500;
const COMMAND_BUFFER: usize = 8;
const REOPEN_BACKOFF_START: Duration = Duration::from_millis(100);
const REOPEN_BACKOFF_MAX: Duration = Duration::from_secs(30);

struct SendRequest {
    message: Vec<u8>,
    target: IpAddr,
    timeout: Duration,
    ack: oneshot::Sender<io::Result<()>>,
}

/// Sending side of a listener task
#[derive(Clone)]
pub struct EndpointHandle {
    family: IpFamily,
    commands: mpsc::Sender<SendRequest>,
}

impl EndpointHandle {
    /// Send `message` to `target` and arm the read deadline to `timeout`
    pub async fn send(
        &self,
        message: Vec<u8>,
        target: IpAddr,
        timeout: Duration,
    ) -> Result<(), ProbeError> {
        let (ack, sent) = oneshot::channel();
        self.commands
            .send(SendRequest { message, target, timeout, ack })
            .await
            .map_err(|_| ProbeError::ListenerStopped(self.family))?;

        sent.await
            .map_err(|_| ProbeError::ListenerStopped(self.family))?
            .map_err(|source| ProbeError::Send { target, source })
    }

    pub fn family(&self) -> IpFamily {
        self.family
    }
}

/// Open the socket for `family` and start its listener task.
///
/// Failing to open the first socket is a startup error; later failures are
/// retried by the task itself.
pub fn spawn(
    family: IpFamily,
    factory: Arc<dyn SocketFactory>,
    pending: Arc<PendingReplies>,
    errors: mpsc::UnboundedSender<ProbeError>,
) -> Result<(EndpointHandle, JoinHandle<()>), ConfigError> {
    let socket = factory.open(family).map_err(|source| ConfigError::Socket { family, source })?;
    let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);

    let listener = Listener {
        family,
        factory,
        socket,
        pending,
        errors,
        commands,
        armed: None,
        failures: 0,
        backoff: REOPEN_BACKOFF_START,
    };
    let span = tracing::info_span!("icmp_listener", %family);
    let task = tokio::spawn(listener.run().instrument(span));

    Ok((EndpointHandle { family, commands: commands_tx }, task))
}

struct Armed {
    deadline: Instant,
    timeout: Duration,
    target: IpAddr,
}

struct Listener {
    family: IpFamily,
    factory: Arc<dyn SocketFactory>,
    socket: Arc<dyn IcmpSocket>,
    pending: Arc<PendingReplies>,
    errors: mpsc::UnboundedSender<ProbeError>,
    commands: mpsc::Receiver<SendRequest>,
    armed: Option<Armed>,
    /// Read or parse failures since the last good message
    failures: u32,
    backoff: Duration,
}

impl Listener {
    async fn run(mut self) {
        let mut buf = vec![0u8; MAX_MESSAGE_LEN];
        debug!("listening for echo replies");

        loop {
            let deadline = self.armed.as_ref().map(|armed| armed.deadline);
            let socket = Arc::clone(&self.socket);

            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(request) => self.send(request).await,
                    None => break,
                },
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => self.handle_message(&buf[..len], from).await,
                    Err(err) => self.recover(format!("could not read from socket: {err}")).await,
                },
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.expire();
                }
            }
        }

        debug!("all senders gone, listener stopped");
    }

    async fn send(&mut self, request: SendRequest) {
        let result = self.socket.send_to(&request.message, request.target).await;
        match &result {
            Ok(()) => {
                self.armed = Some(Armed {
                    deadline: Instant::now() + request.timeout,
                    timeout: request.timeout,
                    target: request.target,
                });
            }
            Err(err) => warn!(target_ip = %request.target, error = %err, "could not send ping"),
        }
        let _ = request.ack.send(result);
    }

    async fn handle_message(&mut self, data: &[u8], from: IpAddr) {
        let message = packet::parse(self.family, data);
        if message.is_ok() {
            self.failures = 0;
            self.backoff = REOPEN_BACKOFF_START;
        }

        match message {
            Ok(Message::EchoReply(echo)) => {
                if self.pending.resolve(from) {
                    info!(%from, "got ping reply");
                    if self.armed.as_ref().is_some_and(|armed| armed.target == from) {
                        self.armed = None;
                    }
                } else {
                    debug!(%from, identifier = echo.identifier, "dropping unexpected ping reply");
                }
            }
            Ok(Message::Other { kind, code }) => {
                debug!(%from, kind, code, "ignoring ICMP message");
            }
            Err(err) => self.recover(format!("could not parse ping message: {err}")).await,
        }
    }

    fn expire(&mut self) {
        if let Some(armed) = self.armed.take() {
            warn!(target_ip = %armed.target, timeout = ?armed.timeout, "read deadline expired");
            self.report(ProbeError::Timeout(armed.timeout));
        }
    }

    async fn recover(&mut self, reason: String) {
        match self.armed.take() {
            Some(armed) => {
                warn!(%reason, target_ip = %armed.target, "listener error, reopening socket");
                self.report(ProbeError::Listener { family: self.family, reason });
            }
            None => warn!(%reason, "listener error with no probe waiting, reopening socket"),
        }

        if self.failures > 0 {
            debug!(failures = self.failures, wait = ?self.backoff, "backing off before reopen");
            self.back_off().await;
        }
        self.failures += 1;
        self.socket = self.reopen().await;
    }

    async fn reopen(&mut self) -> Arc<dyn IcmpSocket> {
        loop {
            match self.factory.open(self.family) {
                Ok(socket) => return socket,
                Err(err) => {
                    error!(error = %err, retry_in = ?self.backoff, "could not reopen ICMP socket");
                    self.back_off().await;
                }
            }
        }
    }

    async fn back_off(&mut self) {
        sleep(self.backoff).await;
        self.backoff = (self.backoff * 2).min(REOPEN_BACKOFF_MAX);
    }

    fn report(&self, error: ProbeError) {
        // Nobody listening means the prober is gone; the error has already been logged.
        let _ = self.errors.send(error);
    }
}
