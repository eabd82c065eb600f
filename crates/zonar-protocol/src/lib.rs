//! Text wire protocol for zonar.
//!
//! Every announcement is a single UDP datagram holding space-separated ASCII
//! tokens followed by one length-prefixed payload:
//!
//! ```text
//! <identifier> <version> <net> <id> <name> <reply-port> <status> <len>:<payload>
//! ```
//!
//! The identifier and version pair is the only compatibility gate: datagrams
//! carrying any other pair are rejected as [`ProtocolError::ProtocolMismatch`]
//! so different namespaces and releases can share a broadcast domain.

pub mod error;
pub mod message;
pub mod wire;

pub use error::ProtocolError;
pub use message::{Announcement, Message};
pub use wire::{Codec, MAX_DATAGRAM_SIZE};
