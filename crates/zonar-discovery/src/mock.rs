//! In-memory broadcast domain for testing.
//!
//! A [`MockLan`] stands in for one subnet. Each [`MockHost`] on it is a
//! [`Network`] with its own IPv4 address. Datagrams sent to an address whose
//! last octet is 255 (or to 255.255.255.255) reach every socket bound to the
//! destination port on any host, including the sender's own. Everything else
//! is unicast. Nothing is queued for unbound ports.
//!
//! Loss is simulated with a drop filter: the send succeeds and the datagram
//! vanishes. A send-error filter instead fails `send_to` itself.

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::net::{DatagramSocket, Network};

/// First port handed out for ephemeral binds.
const EPHEMERAL_PORT_START: u16 = 49152;

type Inbox = mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>;
type DatagramFilter = Box<dyn Fn(&MockDatagram) -> bool + Send>;

/// A datagram as seen on the mock wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDatagram {
    pub from: SocketAddrV4,
    pub to: SocketAddrV4,
    pub data: Vec<u8>,
}

impl MockDatagram {
    pub fn is_broadcast(&self) -> bool {
        is_broadcast(*self.to.ip())
    }

    /// The datagram as text, for matching on protocol tokens.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

#[derive(Default)]
struct LanState {
    sockets: HashMap<SocketAddrV4, (u64, Inbox)>,
    next_port: HashMap<Ipv4Addr, u16>,
    next_token: u64,
    history: Vec<MockDatagram>,
    drop_filter: Option<DatagramFilter>,
    send_error: Option<DatagramFilter>,
}

impl LanState {
    fn allocate_port(&mut self, ip: Ipv4Addr) -> io::Result<u16> {
        let next = self.next_port.entry(ip).or_insert(EPHEMERAL_PORT_START);
        for _ in EPHEMERAL_PORT_START..=u16::MAX {
            let candidate = *next;
            *next = if candidate == u16::MAX {
                EPHEMERAL_PORT_START
            } else {
                candidate + 1
            };
            if !self.sockets.contains_key(&SocketAddrV4::new(ip, candidate)) {
                return Ok(candidate);
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            "no ephemeral ports left",
        ))
    }

    fn deliver(&mut self, datagram: MockDatagram) {
        self.history.push(datagram.clone());
        if self
            .drop_filter
            .as_ref()
            .is_some_and(|drop| drop(&datagram))
        {
            return;
        }

        let from = SocketAddr::V4(datagram.from);
        if datagram.is_broadcast() {
            for (addr, (_, inbox)) in &self.sockets {
                if addr.port() == datagram.to.port() {
                    let _ = inbox.send((datagram.data.clone(), from));
                }
            }
        } else if let Some((_, inbox)) = self.sockets.get(&datagram.to) {
            let _ = inbox.send((datagram.data, from));
        }
    }
}

/// One simulated broadcast domain.
#[derive(Clone, Default)]
pub struct MockLan {
    state: Arc<Mutex<LanState>>,
}

impl MockLan {
    pub fn new() -> Self {
        Self::default()
    }

    /// A host on this LAN with the given address.
    pub fn host(&self, addr: Ipv4Addr) -> MockHost {
        MockHost {
            lan: self.clone(),
            addr,
        }
    }

    /// Silently lose every datagram for which `filter` returns true.
    pub fn set_drop_filter(&self, filter: impl Fn(&MockDatagram) -> bool + Send + 'static) {
        self.state().drop_filter = Some(Box::new(filter));
    }

    pub fn clear_drop_filter(&self) {
        self.state().drop_filter = None;
    }

    /// Fail every `send_to` whose datagram matches `filter`. Failed sends
    /// never reach the wire or the history.
    pub fn set_send_error(&self, filter: impl Fn(&MockDatagram) -> bool + Send + 'static) {
        self.state().send_error = Some(Box::new(filter));
    }

    pub fn clear_send_error(&self) {
        self.state().send_error = None;
    }

    /// Every datagram sent so far, dropped ones included.
    pub fn history(&self) -> Vec<MockDatagram> {
        self.state().history.clone()
    }

    /// Whether anything is bound at `addr`.
    pub fn is_bound(&self, addr: SocketAddrV4) -> bool {
        self.state().sockets.contains_key(&addr)
    }

    fn state(&self) -> MutexGuard<'_, LanState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for MockLan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("MockLan")
            .field("sockets", &state.sockets.len())
            .field("history", &state.history.len())
            .finish_non_exhaustive()
    }
}

/// A host on a [`MockLan`].
#[derive(Debug, Clone)]
pub struct MockHost {
    lan: MockLan,
    addr: Ipv4Addr,
}

impl MockHost {
    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }
}

#[async_trait]
impl Network for MockHost {
    async fn bind(
        &self,
        addr: SocketAddrV4,
        broadcast: bool,
    ) -> io::Result<Box<dyn DatagramSocket>> {
        if !addr.ip().is_unspecified() && *addr.ip() != self.addr {
            return Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{} is not an address of host {}", addr.ip(), self.addr),
            ));
        }

        let mut state = self.lan.state();
        let port = match addr.port() {
            0 => state.allocate_port(self.addr)?,
            port => port,
        };
        let local = SocketAddrV4::new(self.addr, port);
        if state.sockets.contains_key(&local) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{local} already in use"),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let token = state.next_token;
        state.next_token += 1;
        state.sockets.insert(local, (token, tx));

        Ok(Box::new(MockSocket {
            lan: self.lan.clone(),
            local,
            token,
            broadcast,
            inbox: tokio::sync::Mutex::new(rx),
        }))
    }
}

struct MockSocket {
    lan: MockLan,
    local: SocketAddrV4,
    token: u64,
    broadcast: bool,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
}

#[async_trait]
impl DatagramSocket for MockSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        let SocketAddr::V4(to) = target else {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "mock LAN is IPv4 only",
            ));
        };
        if is_broadcast(*to.ip()) && !self.broadcast {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "broadcast not enabled on socket",
            ));
        }

        let datagram = MockDatagram {
            from: self.local,
            to,
            data: buf.to_vec(),
        };
        let mut state = self.lan.state();
        if state
            .send_error
            .as_ref()
            .is_some_and(|fail| fail(&datagram))
        {
            return Err(io::Error::other(format!("injected send failure to {to}")));
        }
        state.deliver(datagram);
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut inbox = self.inbox.lock().await;
        let (data, from) = inbox
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket closed"))?;
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok((len, from))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::V4(self.local))
    }
}

impl Drop for MockSocket {
    fn drop(&mut self) {
        let mut state = self.lan.state();
        if state
            .sockets
            .get(&self.local)
            .is_some_and(|(token, _)| *token == self.token)
        {
            state.sockets.remove(&self.local);
        }
    }
}

fn is_broadcast(ip: Ipv4Addr) -> bool {
    ip.is_broadcast() || ip.octets()[3] == 255
}
