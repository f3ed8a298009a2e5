//! ICMP socket seam.
//!
//! The listener only talks to sockets through [`IcmpSocket`], and reopens them
//! through a [`SocketFactory`], so the network can be simulated in tests.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use super::IpFamily;

/// An open ICMP endpoint for one address family
#[async_trait]
pub trait IcmpSocket: Send + Sync {
    /// Send one ICMP message to `target`
    async fn send_to(&self, message: &[u8], target: IpAddr) -> io::Result<()>;

    /// Receive one ICMP message and the address it came from.
    ///
    /// Must be cancel safe: the listener polls it inside `select!`.
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, IpAddr)>;
}

/// Opens (and reopens) ICMP sockets
pub trait SocketFactory: Send + Sync {
    fn open(&self, family: IpFamily) -> io::Result<Arc<dyn IcmpSocket>>;
}

/// Kind of operating-system socket used for ICMP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketKind {
    /// Unprivileged ping socket (`SOCK_DGRAM`); on Linux needs
    /// `net.ipv4.ping_group_range` to cover the process group
    #[default]
    Datagram,
    /// Raw socket; needs `CAP_NET_RAW`
    Raw,
}

/// Factory for real sockets driven by the tokio reactor
#[derive(Debug, Clone, Default)]
pub struct SystemSocketFactory {
    kind: SocketKind,
    device: Option<String>,
}

impl SystemSocketFactory {
    pub fn new(kind: SocketKind) -> Self {
        Self { kind, device: None }
    }

    /// Bind both sockets to a network interface (Linux only)
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    fn bind_device(&self, socket: &Socket) -> io::Result<()> {
        #[cfg(any(target_os = "linux", target_os = "android", target_os = "fuchsia"))]
        if let Some(device) = &self.device {
            socket.bind_device(Some(device.as_bytes()))?;
        }

        #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "fuchsia")))]
        if let Some(device) = &self.device {
            let _ = socket;
            tracing::warn!(%device, "binding to a device is not supported on this platform");
        }

        Ok(())
    }
}

impl SocketFactory for SystemSocketFactory {
    fn open(&self, family: IpFamily) -> io::Result<Arc<dyn IcmpSocket>> {
        let (domain, protocol, local) = match family {
            IpFamily::V4 => (
                Domain::IPV4,
                Protocol::ICMPV4,
                SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            ),
            IpFamily::V6 => (
                Domain::IPV6,
                Protocol::ICMPV6,
                SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
            ),
        };
        let ty = match self.kind {
            SocketKind::Datagram => Type::DGRAM,
            SocketKind::Raw => Type::RAW,
        };

        let socket = Socket::new(domain, ty, Some(protocol))?;
        socket.set_nonblocking(true)?;
        self.bind_device(&socket)?;
        socket.bind(&local.into())?;

        let socket = UdpSocket::from_std(std::net::UdpSocket::from(socket))?;
        tracing::debug!(%family, kind = ?self.kind, "opened ICMP socket");
        Ok(Arc::new(SystemSocket { socket }))
    }
}

struct SystemSocket {
    socket: UdpSocket,
}

#[async_trait]
impl IcmpSocket for SystemSocket {
    async fn send_to(&self, message: &[u8], target: IpAddr) -> io::Result<()> {
        self.socket.send_to(message, SocketAddr::new(target, 0)).await.map(|_| ())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, IpAddr)> {
        let (len, peer) = self.socket.recv_from(buf).await?;
        Ok((len, peer.ip()))
    }
}
