//! Discovery subsystem errors.

use thiserror::Error;
use zonar_types::Status;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to bind {socket} socket: {source}")]
    Bind {
        socket: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send {status} announcement: {source}")]
    Send {
        status: Status,
        #[source]
        source: std::io::Error,
    },

    #[error("discovery task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}
