//! Announcement status carried by every datagram.

use std::str::FromStr;

use thiserror::Error;

/// Why a node is sending a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// First announcement after start; running peers answer with [`Status::One`].
    New,
    /// Unicast answer to a [`Status::New`] announcement.
    One,
    /// Periodic liveness pulse.
    Alive,
    /// Explicit departure.
    Quit,
}

impl Status {
    /// Wire token for this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::One => "ONE",
            Self::Alive => "ALIVE",
            Self::Quit => "QUIT",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status token that is not one of the four known values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown status {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for Status {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(Self::New),
            "ONE" => Ok(Self::One),
            "ALIVE" => Ok(Self::Alive),
            "QUIT" => Ok(Self::Quit),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}
