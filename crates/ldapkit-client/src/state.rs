//! Connection state.

use std::fmt;

/// Lifecycle state of a [`Connection`](crate::Connection).
///
/// A connection starts `Open` and moves to `Closed` exactly once, on an
/// explicit close, a fatal transport error or a server Notice of
/// Disconnection. There is no way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// The transport is up and requests can be sent.
    Open,
    /// The transport is gone.
    Closed,
}

impl ConnectionState {
    /// Whether requests can be sent.
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Closed => "closed",
        })
    }
}
