//! Datagram network backends.
//!
//! The engine only ever talks to [`Network`] and [`DatagramSocket`], so the
//! same state machine runs over real UDP ([`UdpNetwork`]) or the in-memory
//! broadcast domain in [`crate::mock`].

use std::io;
use std::net::{SocketAddr, SocketAddrV4};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::debug;

/// A bound datagram socket.
///
/// `recv_from` must be cancel-safe: the engine races both sockets against
/// the pulse timer and drops whichever receive did not complete.
#[async_trait]
pub trait DatagramSocket: Send + Sync + 'static {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Something that can open datagram sockets.
#[async_trait]
pub trait Network: Send + Sync + 'static {
    /// Bind a socket; port 0 asks for an ephemeral port. `broadcast` enables
    /// sending to broadcast addresses.
    async fn bind(
        &self,
        addr: SocketAddrV4,
        broadcast: bool,
    ) -> io::Result<Box<dyn DatagramSocket>>;
}

/// Real UDP over tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpNetwork;

#[async_trait]
impl Network for UdpNetwork {
    async fn bind(
        &self,
        addr: SocketAddrV4,
        broadcast: bool,
    ) -> io::Result<Box<dyn DatagramSocket>> {
        let socket = UdpSocket::bind(addr).await?;
        if broadcast {
            socket.set_broadcast(true)?;
        }
        debug!(addr = %socket.local_addr()?, broadcast, "UDP socket bound");
        Ok(Box::new(socket))
    }
}

#[async_trait]
impl DatagramSocket for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}
