//! Peer registry: known nodes keyed by name.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use tokio::time::Instant;
use zonar_protocol::Message;
use zonar_types::{NodeId, Status};

use crate::events::DiscoveryEvent;

/// Snapshot of the registry, ordered by node name.
pub type Members = BTreeMap<String, NodeRecord>;

/// A peer as last heard from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub net: String,
    pub id: NodeId,
    pub name: String,
    pub reply_port: u16,
    pub payload: String,
    pub address: IpAddr,
    /// When the last message from this peer was received.
    pub timestamp: Instant,
}

impl NodeRecord {
    fn from_message(message: Message, now: Instant) -> Self {
        Self {
            net: message.net,
            id: message.id,
            name: message.name,
            reply_port: message.reply_port,
            payload: message.payload,
            address: message.address,
            timestamp: now,
        }
    }
}

/// Known peers keyed by name.
///
/// The key is the node name, not its id or address: two processes configured
/// with the same name share one entry, and the most recent message wins.
#[derive(Debug, Clone)]
pub struct Registry {
    nodes: Members,
    keep_alive_timeout: Duration,
}

impl Registry {
    pub fn new(keep_alive_timeout: Duration) -> Self {
        Self {
            nodes: BTreeMap::new(),
            keep_alive_timeout,
        }
    }

    /// Apply a message from a peer.
    ///
    /// `QUIT` removes the named entry. Any other status inserts or refreshes
    /// it. Returns the event the change produced, if any.
    pub fn update(&mut self, message: Message, now: Instant) -> Option<DiscoveryEvent> {
        if message.status == Status::Quit {
            return self.nodes.remove(&message.name).map(DiscoveryEvent::Dropped);
        }

        match self.nodes.entry(message.name.clone()) {
            Entry::Occupied(mut entry) => {
                *entry.get_mut() = NodeRecord::from_message(message, now);
                None
            }
            Entry::Vacant(entry) => {
                let record = entry.insert(NodeRecord::from_message(message, now));
                Some(DiscoveryEvent::Found(record.clone()))
            }
        }
    }

    /// Remove every entry not heard from within the keep-alive timeout.
    pub fn sweep(&mut self, now: Instant) -> Vec<DiscoveryEvent> {
        let timeout = self.keep_alive_timeout;
        let mut lost = Vec::new();
        self.nodes.retain(|_, node| {
            if now.saturating_duration_since(node.timestamp) >= timeout {
                lost.push(DiscoveryEvent::Lost(node.clone()));
                false
            } else {
                true
            }
        });
        lost
    }

    pub fn snapshot(&self) -> Members {
        self.nodes.clone()
    }

    pub fn get(&self, name: &str) -> Option<&NodeRecord> {
        self.nodes.get(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        self.keep_alive_timeout
    }
}
