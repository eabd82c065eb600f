//! UDP broadcast peer discovery for zonar.
//!
//! Each [`DiscoveryEngine`] periodically announces its node on the shared
//! scan port, answers newcomers with a direct `ONE` reply, and keeps a
//! [`Registry`] of peers keyed by name. Peers that announce `QUIT` are
//! dropped at once; peers that fall silent for longer than the keep-alive
//! timeout (`pulse interval × 1.1`) are reported lost on the next pulse.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod net;
pub mod registry;
pub mod state;

pub use config::{load_config, DiscoveryConfig, Settings};
pub use engine::DiscoveryEngine;
pub use error::DiscoveryError;
pub use events::{DiscoveryEvent, EventKind, EventSink};
pub use net::{DatagramSocket, Network, UdpNetwork};
pub use registry::{Members, NodeRecord, Registry};
pub use state::EngineState;
