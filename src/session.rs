//! Session roles and observable session state.

use std::fmt;

/// The role a session plays on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Role {
    /// Scans, connects and acts as GATT client.
    Central,
    /// Advertises, accepts a connection and acts as GATT server.
    Peripheral,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Central => write!(f, "central"),
            Self::Peripheral => write!(f, "peripheral"),
        }
    }
}

/// Combined state of a session, as seen from outside.
///
/// Central sessions walk `Idle -> Scanning -> Connecting -> Connected ->
/// DiscoveringService -> DiscoveringCharacteristic -> Resolved -> Subscribed`
/// (or stop at `Abandoned`). Peripheral sessions walk
/// `Idle -> Advertising -> Connected`. A disconnect returns either role to its
/// pre-connect state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    /// Not started.
    Idle,
    /// Central waiting for an advertiser.
    Scanning,
    /// Peripheral waiting for a Central.
    Advertising,
    /// Central connection attempt in flight.
    Connecting,
    /// Link up, nothing else in progress.
    Connected,
    /// Central looking up the relay service.
    DiscoveringService,
    /// Central enumerating the relay service's characteristics.
    DiscoveringCharacteristic,
    /// Central resolved the receive characteristic.
    Resolved,
    /// Central notifications enabled.
    Subscribed,
    /// Central discovery failed for this connection.
    Abandoned,
}

impl SessionState {
    /// Check if a link is up.
    pub fn is_connected(&self) -> bool {
        !matches!(
            self,
            Self::Idle | Self::Scanning | Self::Advertising | Self::Connecting
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
