//! Request-correlation table matching echo replies to waiting probes.
//!
//! Entries are keyed by the target's IP and are single use: a reply consumes
//! the entry, and a waiter that gives up removes its own entry when dropped.
//! At most one entry exists per address.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::oneshot;

struct Pending {
    ticket: u64,
    signal: oneshot::Sender<()>,
}

/// Address-keyed table of probes waiting for an echo reply
#[derive(Default)]
pub struct PendingReplies {
    entries: RwLock<HashMap<IpAddr, Pending>>,
    next_ticket: AtomicU64,
}

impl PendingReplies {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a waiter for `ip`, replacing any previous entry
    pub fn register(self: &Arc<Self>, ip: IpAddr) -> ReplyWaiter {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (signal, reply) = oneshot::channel();

        if self.entries.write().insert(ip, Pending { ticket, signal }).is_some() {
            tracing::debug!(%ip, "replaced stale pending reply");
        }

        ReplyWaiter { table: Arc::clone(self), ip, ticket, reply }
    }

    /// Deliver a reply from `ip`; returns false when nobody was waiting
    pub fn resolve(&self, ip: IpAddr) -> bool {
        if !self.entries.read().contains_key(&ip) {
            return false;
        }
        match self.entries.write().remove(&ip) {
            // The waiter may have been dropped in between; that still counts as matched.
            Some(pending) => {
                let _ = pending.signal.send(());
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, ip: IpAddr, ticket: u64) {
        let mut entries = self.entries.write();
        if entries.get(&ip).is_some_and(|pending| pending.ticket == ticket) {
            entries.remove(&ip);
        }
    }
}

/// Handle held by a probe while it waits for its reply
pub struct ReplyWaiter {
    table: Arc<PendingReplies>,
    ip: IpAddr,
    ticket: u64,
    reply: oneshot::Receiver<()>,
}

impl ReplyWaiter {
    /// Wait for the listener to deliver a reply.
    ///
    /// Errors only if the entry was replaced or the table dropped it.
    pub async fn wait(&mut self) -> Result<(), oneshot::error::RecvError> {
        (&mut self.reply).await
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }
}

impl Drop for ReplyWaiter {
    fn drop(&mut self) {
        self.table.release(self.ip, self.ticket);
    }
}
