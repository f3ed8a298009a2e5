//! Shared test doubles: a simulated ICMP network, a scripted remote shell and
//! a recording notifier.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use watchpost_engine::icmp::packet::Echo;
use watchpost_engine::icmp::{IcmpSocket, SocketFactory};
use watchpost_engine::{FailureEvent, IpFamily, Notifier, NotifyError, RemoteShell, SessionError};

type Incoming = io::Result<(Vec<u8>, IpAddr)>;

/// In-memory network where chosen addresses answer echo requests.
///
/// Clones share the same network.
#[derive(Clone, Default)]
pub struct SimulatedNetwork {
    state: Arc<NetworkState>,
}

#[derive(Default)]
struct NetworkState {
    responders: Mutex<HashSet<IpAddr>>,
    broken: Mutex<HashSet<IpFamily>>,
    inboxes: Mutex<HashMap<IpFamily, mpsc::UnboundedSender<Incoming>>>,
    opened: Mutex<HashMap<IpFamily, usize>>,
    sent: Mutex<Vec<(IpAddr, Vec<u8>)>>,
}

impl SimulatedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory handle to give to the prober
    pub fn factory(&self) -> Arc<dyn SocketFactory> {
        Arc::new(self.clone())
    }

    pub fn respond_from(&self, ip: IpAddr) {
        self.state.responders.lock().insert(ip);
    }

    /// Make the current socket of `family` fail its next read
    pub fn inject_read_error(&self, family: IpFamily) {
        self.deliver(family, Err(io::Error::new(io::ErrorKind::ConnectionReset, "simulated")));
    }

    /// Make every read on `family` fail immediately, including on reopened sockets
    pub fn break_reads(&self, family: IpFamily) {
        self.state.broken.lock().insert(family);
    }

    /// Deliver bytes that do not parse as ICMP
    pub fn inject_garbage(&self, family: IpFamily, from: IpAddr) {
        self.deliver(family, Ok((vec![0xff], from)));
    }

    /// Deliver an echo reply nobody asked for
    pub fn inject_reply(&self, family: IpFamily, from: IpAddr) {
        self.deliver(family, Ok((Echo::new(1, 1, b"late").to_reply(family), from)));
    }

    pub fn opened(&self, family: IpFamily) -> usize {
        self.state.opened.lock().get(&family).copied().unwrap_or(0)
    }

    pub fn sent(&self) -> Vec<(IpAddr, Vec<u8>)> {
        self.state.sent.lock().clone()
    }

    /// Wait until `family` has been opened `count` times
    pub async fn wait_for_open(&self, family: IpFamily, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.opened(family) < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("socket was not reopened");
    }

    fn deliver(&self, family: IpFamily, incoming: Incoming) {
        if let Some(inbox) = self.state.inboxes.lock().get(&family) {
            let _ = inbox.send(incoming);
        }
    }
}

impl SocketFactory for SimulatedNetwork {
    fn open(&self, family: IpFamily) -> io::Result<Arc<dyn IcmpSocket>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.inboxes.lock().insert(family, tx.clone());
        *self.state.opened.lock().entry(family).or_default() += 1;

        Ok(Arc::new(SimulatedSocket {
            family,
            network: self.clone(),
            replies: tx,
            inbox: tokio::sync::Mutex::new(rx),
        }))
    }
}

struct SimulatedSocket {
    family: IpFamily,
    network: SimulatedNetwork,
    replies: mpsc::UnboundedSender<Incoming>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Incoming>>,
}

#[async_trait]
impl IcmpSocket for SimulatedSocket {
    async fn send_to(&self, message: &[u8], target: IpAddr) -> io::Result<()> {
        self.network.state.sent.lock().push((target, message.to_vec()));

        if self.network.state.responders.lock().contains(&target) && message.len() >= 8 {
            let identifier = u16::from_be_bytes([message[4], message[5]]);
            let sequence = u16::from_be_bytes([message[6], message[7]]);
            let reply = Echo::new(identifier, sequence, &message[8..]).to_reply(self.family);
            let _ = self.replies.send(Ok((reply, target)));
        }
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, IpAddr)> {
        if self.network.state.broken.lock().contains(&self.family) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated broken socket"));
        }

        let mut inbox = self.inbox.lock().await;
        match inbox.recv().await {
            Some(incoming) => {
                let (bytes, from) = incoming?;
                let len = bytes.len().min(buf.len());
                buf[..len].copy_from_slice(&bytes[..len]);
                Ok((len, from))
            }
            None => std::future::pending().await,
        }
    }
}

/// Remote shell that replays canned results in order
pub struct ScriptedShell {
    replies: Mutex<Vec<Result<String, SessionError>>>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedShell {
    pub fn new(mut replies: Vec<Result<String, SessionError>>) -> Arc<Self> {
        replies.reverse();
        Arc::new(Self { replies: Mutex::new(replies), commands: Mutex::new(Vec::new()) })
    }

    /// Shell that reports every process as running, forever
    pub fn healthy() -> Arc<Self> {
        Self::new(Vec::new())
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }
}

#[async_trait]
impl RemoteShell for ScriptedShell {
    async fn exec(&self, command: &str) -> Result<String, SessionError> {
        self.commands.lock().push(command.to_string());
        self.replies.lock().pop().unwrap_or_else(|| Ok("4242\n".to_string()))
    }
}

/// Notifier that keeps every event it receives
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<FailureEvent>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take(&self) -> Vec<FailureEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

#[async_trait]
impl Notifier for Recorder {
    async fn notify(&self, event: &FailureEvent) -> Result<(), NotifyError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Drain a probe stream into a vector
pub async fn collect(mut stream: mpsc::Receiver<FailureEvent>) -> Vec<FailureEvent> {
    let mut events = Vec::new();
    while let Some(event) = stream.recv().await {
        events.push(event);
    }
    events
}
