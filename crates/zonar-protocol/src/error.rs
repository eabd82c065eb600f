//! Codec errors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("foreign protocol {identifier:?} version {version:?}")]
    ProtocolMismatch { identifier: String, version: String },

    #[error("malformed datagram: {0}")]
    Malformed(String),
}

impl ProtocolError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }
}
