//! Decoded and outgoing message types.

use std::net::{IpAddr, SocketAddr};

use zonar_types::{NodeId, Status};

/// What a node says about itself in every datagram it sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// Namespace tag, informational only.
    pub net: String,
    pub id: NodeId,
    /// Normalized node name; peers key their registries on it.
    pub name: String,
    /// Port of the sender's listen socket, where `ONE` replies go.
    pub reply_port: u16,
    /// Opaque application payload.
    pub payload: String,
}

/// A datagram that passed the compatibility gate and parsed cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub identifier: String,
    pub version: String,
    pub net: String,
    pub id: NodeId,
    pub name: String,
    pub reply_port: u16,
    pub status: Status,
    pub payload: String,
    /// Source address of the datagram, not a wire field.
    pub address: IpAddr,
}

impl Message {
    /// Where a unicast reply to this message should be sent.
    #[must_use]
    pub fn reply_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.reply_port)
    }
}
