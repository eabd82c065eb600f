//! Shared types for zonar.
//!
//! This crate contains the types shared across the zonar workspace: node
//! identity, announcement status and name normalization.

pub mod name;
pub mod node;
pub mod status;

pub use name::normalize_name;
pub use node::{NodeId, DEFAULT_ID_BITS};
pub use status::{Status, UnknownStatus};
