//! Membership events and the sink that delivers them.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::registry::NodeRecord;

/// Capacity of each channel handed out by [`EventSink::subscribe`].
pub const SUBSCRIBER_CAPACITY: usize = 1024;

/// A change in membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A peer was heard from for the first time.
    Found(NodeRecord),
    /// A peer went silent for longer than the keep-alive timeout.
    Lost(NodeRecord),
    /// A peer announced its departure.
    Dropped(NodeRecord),
}

impl DiscoveryEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Found(_) => EventKind::Found,
            Self::Lost(_) => EventKind::Lost,
            Self::Dropped(_) => EventKind::Dropped,
        }
    }

    pub fn record(&self) -> &NodeRecord {
        match self {
            Self::Found(record) | Self::Lost(record) | Self::Dropped(record) => record,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Found,
    Lost,
    Dropped,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Found => write!(f, "found"),
            Self::Lost => write!(f, "lost"),
            Self::Dropped => write!(f, "dropped"),
        }
    }
}

type Handler = Box<dyn FnMut(&NodeRecord) + Send>;

/// Fan-out point for membership events.
///
/// Handlers are registered per [`EventKind`] and run synchronously, in
/// registration order, on the engine's event loop. Channel subscribers get
/// every event; a full channel loses the event, a closed one is forgotten.
#[derive(Default)]
pub struct EventSink {
    found: Vec<Handler>,
    lost: Vec<Handler>,
    dropped: Vec<Handler>,
    subscribers: Vec<mpsc::Sender<DiscoveryEvent>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one kind of event.
    pub fn on(&mut self, kind: EventKind, handler: impl FnMut(&NodeRecord) + Send + 'static) {
        let handlers = match kind {
            EventKind::Found => &mut self.found,
            EventKind::Lost => &mut self.lost,
            EventKind::Dropped => &mut self.dropped,
        };
        handlers.push(Box::new(handler));
    }

    pub fn on_found(&mut self, handler: impl FnMut(&NodeRecord) + Send + 'static) {
        self.on(EventKind::Found, handler);
    }

    pub fn on_lost(&mut self, handler: impl FnMut(&NodeRecord) + Send + 'static) {
        self.on(EventKind::Lost, handler);
    }

    pub fn on_dropped(&mut self, handler: impl FnMut(&NodeRecord) + Send + 'static) {
        self.on(EventKind::Dropped, handler);
    }

    /// Receive every future event on a channel.
    pub fn subscribe(&mut self) -> mpsc::Receiver<DiscoveryEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.subscribers.push(tx);
        rx
    }

    pub fn publish(&mut self, event: &DiscoveryEvent) {
        let handlers = match event.kind() {
            EventKind::Found => &mut self.found,
            EventKind::Lost => &mut self.lost,
            EventKind::Dropped => &mut self.dropped,
        };
        for handler in handlers.iter_mut() {
            handler(event.record());
        }

        self.subscribers
            .retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(kind = %event.kind(), "event subscriber full, event lost");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("found", &self.found.len())
            .field("lost", &self.lost.len())
            .field("dropped", &self.dropped.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
