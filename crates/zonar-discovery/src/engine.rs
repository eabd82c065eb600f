//! Discovery engine: sockets, pulse timer and the announcement handshake.
//!
//! While broadcasting, a single task owns both sockets, the pulse timer and
//! the registry, so every mutation happens on one execution context:
//!
//! - broadcast socket (bound to the shared scan port): peer announcements.
//!   A `NEW` announcement is answered with a unicast `ONE` to the sender's
//!   reply port, and every announcement updates the registry.
//! - listen socket (ephemeral port): unicast `ONE` replies.
//! - pulse timer: re-broadcast (`ALIVE` after the initial `NEW`), then sweep
//!   expired peers.

use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace};
use zonar_protocol::{Announcement, Message, ProtocolError, MAX_DATAGRAM_SIZE};
use zonar_types::{NodeId, Status};

use crate::config::{DiscoveryConfig, Settings};
use crate::error::DiscoveryError;
use crate::events::{DiscoveryEvent, EventKind, EventSink};
use crate::net::{DatagramSocket, Network, UdpNetwork};
use crate::registry::{Members, NodeRecord, Registry};
use crate::state::EngineState;

/// A peer-presence engine for one node.
///
/// `start` and `stop` complete once their sockets are set up or torn down;
/// the caller must not race them against each other. Dropping a running
/// engine ends its event loop without announcing `QUIT`.
pub struct DiscoveryEngine {
    settings: Arc<Settings>,
    network: Arc<dyn Network>,
    id: NodeId,
    sink: Arc<Mutex<EventSink>>,
    members: watch::Receiver<Members>,
    reply_port: Option<u16>,
    lifecycle: Lifecycle,
}

enum Lifecycle {
    Inactive(Session),
    /// Transitional: the session is lent to `start` or `stop`.
    Starting,
    Broadcasting(Running),
}

struct Running {
    stop: oneshot::Sender<()>,
    task: JoinHandle<(Session, io::Result<()>)>,
}

struct Sockets {
    broadcast: Box<dyn DatagramSocket>,
    listen: Box<dyn DatagramSocket>,
}

impl DiscoveryEngine {
    /// Create an engine that talks real UDP.
    pub fn new(config: &DiscoveryConfig) -> Result<Self, DiscoveryError> {
        Self::with_network(config, UdpNetwork)
    }

    /// Create an engine over the given network backend.
    pub fn with_network(
        config: &DiscoveryConfig,
        network: impl Network,
    ) -> Result<Self, DiscoveryError> {
        let settings = Arc::new(config.validate()?);
        let id = NodeId::random(settings.id_bits);
        let sink = Arc::new(Mutex::new(EventSink::new()));
        let (session, members) = Session::new(settings.clone(), id.clone(), sink.clone());

        debug!(name = %settings.name, id = %id, broadcast = %settings.broadcast, "discovery engine created");
        Ok(Self {
            settings,
            network: Arc::new(network),
            id,
            sink,
            members,
            reply_port: None,
            lifecycle: Lifecycle::Inactive(session),
        })
    }

    /// Open both sockets, announce `NEW` and start pulsing.
    ///
    /// A no-op returning `Ok` unless the engine is inactive. On error the
    /// engine stays inactive and no socket is left open.
    pub async fn start(&mut self) -> Result<(), DiscoveryError> {
        let mut session = match mem::replace(&mut self.lifecycle, Lifecycle::Starting) {
            Lifecycle::Inactive(session) => session,
            other => {
                self.lifecycle = other;
                debug!(state = %self.state(), "start ignored");
                return Ok(());
            }
        };

        let sockets = match open(&*self.network, &mut session).await {
            Ok(sockets) => sockets,
            Err(e) => {
                self.lifecycle = Lifecycle::Inactive(session);
                return Err(e);
            }
        };

        let reply_port = session.node.reply_port;
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run(session, sockets, stop_rx));
        self.reply_port = Some(reply_port);
        self.lifecycle = Lifecycle::Broadcasting(Running { stop, task });

        info!(
            name = %self.settings.name,
            id = %self.id,
            reply_port,
            broadcast = %self.settings.broadcast,
            "discovery started"
        );
        Ok(())
    }

    /// Announce `QUIT`, then close both sockets.
    ///
    /// Sockets are released even when the `QUIT` send fails; the failure is
    /// still returned. A no-op returning `Ok` unless broadcasting.
    pub async fn stop(&mut self) -> Result<(), DiscoveryError> {
        let running = match mem::replace(&mut self.lifecycle, Lifecycle::Starting) {
            Lifecycle::Broadcasting(running) => running,
            other => {
                self.lifecycle = other;
                debug!(state = %self.state(), "stop ignored");
                return Ok(());
            }
        };

        let _ = running.stop.send(());
        match running.task.await {
            Ok((session, quit)) => {
                self.lifecycle = Lifecycle::Inactive(session);
                info!(name = %self.settings.name, "discovery stopped");
                quit.map_err(|source| DiscoveryError::Send {
                    status: Status::Quit,
                    source,
                })
            }
            Err(e) => {
                let (session, members) =
                    Session::new(self.settings.clone(), self.id.clone(), self.sink.clone());
                self.members = members;
                self.lifecycle = Lifecycle::Inactive(session);
                Err(DiscoveryError::TaskFailed(e))
            }
        }
    }

    /// Current membership, ordered by name. Empty until a peer is found.
    pub fn get_list(&self) -> Members {
        self.members.borrow().clone()
    }

    /// Watch membership; the value changes on every registry update.
    pub fn members(&self) -> watch::Receiver<Members> {
        self.members.clone()
    }

    pub fn state(&self) -> EngineState {
        match self.lifecycle {
            Lifecycle::Inactive(_) => EngineState::Inactive,
            Lifecycle::Starting => EngineState::Starting,
            Lifecycle::Broadcasting(_) => EngineState::Broadcasting,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Normalized node name.
    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// Port of the listen socket, once the engine has started.
    pub fn reply_port(&self) -> Option<u16> {
        self.reply_port
    }

    pub fn pulse_interval(&self) -> Duration {
        self.settings.pulse_interval
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        self.settings.keep_alive_timeout
    }

    pub fn on(&self, kind: EventKind, handler: impl FnMut(&NodeRecord) + Send + 'static) {
        self.sink().on(kind, handler);
    }

    pub fn on_found(&self, handler: impl FnMut(&NodeRecord) + Send + 'static) {
        self.on(EventKind::Found, handler);
    }

    pub fn on_lost(&self, handler: impl FnMut(&NodeRecord) + Send + 'static) {
        self.on(EventKind::Lost, handler);
    }

    pub fn on_dropped(&self, handler: impl FnMut(&NodeRecord) + Send + 'static) {
        self.on(EventKind::Dropped, handler);
    }

    /// Receive every future membership event on a channel.
    pub fn subscribe(&self) -> tokio::sync::mpsc::Receiver<DiscoveryEvent> {
        self.sink().subscribe()
    }

    fn sink(&self) -> std::sync::MutexGuard<'_, EventSink> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for DiscoveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryEngine")
            .field("name", &self.settings.name)
            .field("id", &self.id)
            .field("state", &self.state())
            .field("reply_port", &self.reply_port)
            .finish_non_exhaustive()
    }
}

/// Bind the listen socket, then the broadcast socket, then announce `NEW`.
///
/// The listen port must be known before the first broadcast, since peers
/// reply to it.
async fn open(network: &dyn Network, session: &mut Session) -> Result<Sockets, DiscoveryError> {
    let listen = network
        .bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0), false)
        .await
        .map_err(|source| DiscoveryError::Bind {
            socket: "listen",
            source,
        })?;
    session.node.reply_port = listen
        .local_addr()
        .map_err(|source| DiscoveryError::Bind {
            socket: "listen",
            source,
        })?
        .port();

    let broadcast = network
        .bind(
            SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, session.settings.scan_port),
            true,
        )
        .await
        .map_err(|source| DiscoveryError::Bind {
            socket: "broadcast",
            source,
        })?;

    session.pending = Status::New;
    let hello = session.next_pulse();
    broadcast
        .send_to(&hello, session.settings.broadcast)
        .await
        .map_err(|source| DiscoveryError::Send {
            status: Status::New,
            source,
        })?;
    session.sweep(Instant::now());

    Ok(Sockets { broadcast, listen })
}

/// The event loop. Returns the session and the outcome of the `QUIT` send.
async fn run(
    mut session: Session,
    sockets: Sockets,
    mut stop: oneshot::Receiver<()>,
) -> (Session, io::Result<()>) {
    let period = session.settings.pulse_interval;
    let target = session.settings.broadcast;
    let mut pulse = time::interval_at(Instant::now() + period, period);
    pulse.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut broadcast_buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut listen_buf = vec![0u8; MAX_DATAGRAM_SIZE];

    let quit = loop {
        tokio::select! {
            received = sockets.broadcast.recv_from(&mut broadcast_buf) => match received {
                Ok((len, from)) => {
                    let now = Instant::now();
                    if let Some((reply, to)) = session.on_broadcast(&broadcast_buf[..len], from, now) {
                        if let Err(e) = sockets.broadcast.send_to(&reply, to).await {
                            debug!(to = %to, error = %e, "ONE reply failed");
                        }
                    }
                }
                Err(e) => debug!(error = %e, "broadcast socket receive failed"),
            },
            received = sockets.listen.recv_from(&mut listen_buf) => match received {
                Ok((len, from)) => session.on_unicast(&listen_buf[..len], from, Instant::now()),
                Err(e) => debug!(error = %e, "listen socket receive failed"),
            },
            _ = pulse.tick() => {
                let announcement = session.next_pulse();
                trace!(name = %session.node.name, "pulse");
                if let Err(e) = sockets.broadcast.send_to(&announcement, target).await {
                    debug!(error = %e, "pulse send failed");
                }
                session.sweep(Instant::now());
            }
            signal = &mut stop => {
                if signal.is_err() {
                    debug!(name = %session.node.name, "engine dropped, closing sockets");
                    break Ok(());
                }
                let goodbye = session.announce(Status::Quit);
                break sockets.broadcast.send_to(&goodbye, target).await.map(|_| ());
            }
        }
    };

    drop(sockets);
    (session, quit)
}

/// Everything the event loop mutates.
struct Session {
    settings: Arc<Settings>,
    node: Announcement,
    registry: Registry,
    members: watch::Sender<Members>,
    sink: Arc<Mutex<EventSink>>,
    /// Status of the next pulse: `NEW` once after start, then `ALIVE`.
    pending: Status,
}

impl Session {
    fn new(
        settings: Arc<Settings>,
        id: NodeId,
        sink: Arc<Mutex<EventSink>>,
    ) -> (Self, watch::Receiver<Members>) {
        let (members, members_rx) = watch::channel(Members::new());
        let session = Self {
            node: Announcement {
                net: settings.net.clone(),
                id,
                name: settings.name.clone(),
                reply_port: 0,
                payload: settings.payload.clone(),
            },
            registry: Registry::new(settings.keep_alive_timeout),
            members,
            sink,
            pending: Status::New,
            settings,
        };
        (session, members_rx)
    }

    fn announce(&self, status: Status) -> Vec<u8> {
        self.settings.codec.encode(status, &self.node)
    }

    fn next_pulse(&mut self) -> Vec<u8> {
        let announcement = self.announce(self.pending);
        self.pending = Status::Alive;
        announcement
    }

    /// Decode a datagram, dropping foreign, malformed and self-sent ones.
    fn accept(&self, buf: &[u8], from: SocketAddr) -> Option<Message> {
        match self.settings.codec.decode(buf, from.ip()) {
            Ok(message) if message.id == self.node.id => None,
            Ok(message) => Some(message),
            Err(e @ ProtocolError::ProtocolMismatch { .. }) => {
                trace!(from = %from, error = %e, "discarding foreign datagram");
                None
            }
            Err(e) => {
                debug!(from = %from, error = %e, "discarding datagram");
                None
            }
        }
    }

    /// Handle a datagram from the broadcast socket. Returns the unicast
    /// `ONE` reply owed to a `NEW` sender.
    fn on_broadcast(
        &mut self,
        buf: &[u8],
        from: SocketAddr,
        now: Instant,
    ) -> Option<(Vec<u8>, SocketAddr)> {
        let message = self.accept(buf, from)?;
        let reply = (message.status == Status::New)
            .then(|| (self.announce(Status::One), message.reply_addr()));
        self.apply(message, now);
        reply
    }

    /// Handle a datagram from the listen socket; only `ONE` counts there.
    fn on_unicast(&mut self, buf: &[u8], from: SocketAddr, now: Instant) {
        let Some(message) = self.accept(buf, from) else {
            return;
        };
        if message.status != Status::One {
            debug!(from = %from, status = %message.status, "ignoring non-ONE unicast");
            return;
        }
        self.apply(message, now);
    }

    fn apply(&mut self, message: Message, now: Instant) {
        debug!(peer = %message.name, status = %message.status, address = %message.address, "announcement received");
        if let Some(event) = self.registry.update(message, now) {
            self.publish(&event);
        }
        self.members.send_replace(self.registry.snapshot());
    }

    fn sweep(&mut self, now: Instant) {
        let lost = self.registry.sweep(now);
        if lost.is_empty() {
            return;
        }
        for event in &lost {
            self.publish(event);
        }
        self.members.send_replace(self.registry.snapshot());
    }

    fn publish(&self, event: &DiscoveryEvent) {
        let record = event.record();
        info!(event = %event.kind(), peer = %record.name, id = %record.id, address = %record.address, "membership changed");
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .publish(event);
    }
}
