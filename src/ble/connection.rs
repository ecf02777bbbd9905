//! BLE link management.
//!
//! Owns the single active connection handle of a session. The host reports
//! link changes through two entry points, [`LinkManager::on_connected`] and
//! [`LinkManager::on_disconnected`]; every other component asks the link
//! manager for the current handle instead of keeping its own copy.

use std::time::Instant;
use tracing::{debug, info, warn};

use crate::ble::host::{ConnectionHandle, HciStatus, PeerAddress};
use crate::session::Role;

/// Link state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not started.
    #[default]
    Idle,
    /// Central waiting for an advertiser.
    Scanning,
    /// Peripheral waiting for a Central.
    Advertising,
    /// Central connection attempt in flight.
    Connecting,
    /// Link up.
    Connected,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if waiting for a peer.
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Scanning | Self::Advertising)
    }

    /// The state a role rests in while it has no link.
    pub fn pre_connect(role: Role) -> Self {
        match role {
            Role::Central => Self::Scanning,
            Role::Peripheral => Self::Advertising,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Advertising => write!(f, "Advertising"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// The link a session owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveConnection {
    /// Host handle of the link.
    pub handle: ConnectionHandle,
    /// Remote address, when the session initiated the link.
    pub peer: Option<PeerAddress>,
    /// When the link came up.
    pub established_at: Instant,
}

/// Result of a connect callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The link is up and now owned by the session.
    Established(ConnectionHandle),
    /// The attempt failed; nothing was stored.
    Failed(HciStatus),
    /// The callback did not belong to this session.
    Ignored,
}

/// Tracks the single active link of a session.
#[derive(Debug)]
pub struct LinkManager {
    role: Role,
    state: ConnectionState,
    pending: Option<(ConnectionHandle, PeerAddress)>,
    active: Option<ActiveConnection>,
    releases: u64,
}

impl LinkManager {
    /// Create a link manager for a role.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: ConnectionState::Idle,
            pending: None,
            active: None,
            releases: 0,
        }
    }

    /// Get the current link state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Handle of the active link, if any.
    pub fn current_connection(&self) -> Option<ConnectionHandle> {
        self.active.as_ref().map(|active| active.handle)
    }

    /// Details of the active link, if any.
    pub fn active(&self) -> Option<&ActiveConnection> {
        self.active.as_ref()
    }

    /// Number of links released so far.
    pub fn releases(&self) -> u64 {
        self.releases
    }

    /// Enter the pre-connect state (scanning or advertising).
    pub fn begin_waiting(&mut self) {
        let state = ConnectionState::pre_connect(self.role);
        self.set_state(state);
    }

    /// Return to `Idle` after a failed start.
    pub fn stop_waiting(&mut self) {
        if self.state.is_waiting() {
            self.set_state(ConnectionState::Idle);
        }
    }

    /// Record an outgoing connection attempt.
    pub fn begin_connecting(&mut self, handle: ConnectionHandle, peer: PeerAddress) {
        debug!("Connecting to {} as {}", peer, handle);
        self.pending = Some((handle, peer));
        self.set_state(ConnectionState::Connecting);
    }

    /// Abandon an outgoing attempt that the host refused outright.
    pub fn abort_connecting(&mut self) {
        self.pending = None;
        self.set_state(ConnectionState::pre_connect(self.role));
    }

    /// Connect callback.
    ///
    /// On failure nothing is stored and the session returns to its pre-connect
    /// state; restarting scanning or advertising is left to the caller.
    pub fn on_connected(&mut self, handle: ConnectionHandle, status: HciStatus) -> ConnectOutcome {
        if let Some(active) = &self.active {
            warn!(
                "Connect callback for {} while {} is active, ignoring",
                handle, active.handle
            );
            return ConnectOutcome::Ignored;
        }

        let peer = match self.pending.take() {
            Some((pending, peer)) if pending == handle => Some(peer),
            Some(other) => {
                warn!("Connect callback for unknown {}, expected {}", handle, other.0);
                self.pending = Some(other);
                return ConnectOutcome::Ignored;
            }
            None if self.role == Role::Central => {
                warn!("Connect callback for {} with no attempt in flight", handle);
                return ConnectOutcome::Ignored;
            }
            None => None,
        };

        if !status.is_success() {
            warn!("Connection {} failed (status {})", handle, status);
            self.set_state(ConnectionState::pre_connect(self.role));
            return ConnectOutcome::Failed(status);
        }

        info!("Connected ({})", handle);
        self.active = Some(ActiveConnection {
            handle,
            peer,
            established_at: Instant::now(),
        });
        self.set_state(ConnectionState::Connected);
        ConnectOutcome::Established(handle)
    }

    /// Disconnect callback.
    ///
    /// Valid from any state. Releases the stored link exactly once and returns
    /// it; a second call with nothing stored returns `None`.
    pub fn on_disconnected(
        &mut self,
        handle: ConnectionHandle,
        reason: HciStatus,
    ) -> Option<ActiveConnection> {
        if matches!(&self.pending, Some((pending, _)) if *pending == handle) {
            self.pending = None;
        }

        let released = match &self.active {
            Some(active) if active.handle != handle => {
                warn!(
                    "Disconnect for {} while {} is active, ignoring",
                    handle, active.handle
                );
                return None;
            }
            Some(_) => self.release(),
            None => None,
        };

        info!("Disconnected ({}, reason {})", handle, reason);
        if self.state != ConnectionState::Idle {
            self.set_state(ConnectionState::pre_connect(self.role));
        }
        released
    }

    /// Give up the stored link, if any.
    pub fn release(&mut self) -> Option<ActiveConnection> {
        let released = self.active.take();
        if released.is_some() {
            self.releases += 1;
        }
        released
    }

    fn set_state(&mut self, new_state: ConnectionState) {
        if self.state != new_state {
            debug!(
                role = %self.role,
                "Connection state changed: {} -> {}", self.state, new_state
            );
            self.state = new_state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_central() -> LinkManager {
        let mut link = LinkManager::new(Role::Central);
        link.begin_waiting();
        link.begin_connecting(ConnectionHandle(1), PeerAddress::from("AA:BB"));
        assert_eq!(
            link.on_connected(ConnectionHandle(1), HciStatus::SUCCESS),
            ConnectOutcome::Established(ConnectionHandle(1))
        );
        link
    }

    #[test]
    fn test_connection_state() {
        assert!(!ConnectionState::Idle.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(ConnectionState::Scanning.is_waiting());
        assert!(ConnectionState::Advertising.is_waiting());
        assert!(!ConnectionState::Connecting.is_waiting());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Connected), "Connected");
        assert_eq!(format!("{}", ConnectionState::Advertising), "Advertising");
    }

    #[test]
    fn test_failed_connect_stores_nothing() {
        let mut link = LinkManager::new(Role::Central);
        link.begin_waiting();
        link.begin_connecting(ConnectionHandle(7), PeerAddress::from("AA:BB"));

        let outcome = link.on_connected(
            ConnectionHandle(7),
            HciStatus::CONNECTION_FAILED_TO_ESTABLISH,
        );

        assert_eq!(
            outcome,
            ConnectOutcome::Failed(HciStatus::CONNECTION_FAILED_TO_ESTABLISH)
        );
        assert_eq!(link.current_connection(), None);
        assert_eq!(link.state(), ConnectionState::Scanning);
    }

    #[test]
    fn test_connect_records_peer() {
        let link = connected_central();
        let active = link.active().unwrap();
        assert_eq!(active.handle, ConnectionHandle(1));
        assert_eq!(active.peer, Some(PeerAddress::from("AA:BB")));
        assert_eq!(link.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_peripheral_accepts_incoming() {
        let mut link = LinkManager::new(Role::Peripheral);
        link.begin_waiting();
        assert_eq!(
            link.on_connected(ConnectionHandle(3), HciStatus::SUCCESS),
            ConnectOutcome::Established(ConnectionHandle(3))
        );
        assert_eq!(link.active().unwrap().peer, None);
    }

    #[test]
    fn test_central_ignores_unsolicited_connect() {
        let mut link = LinkManager::new(Role::Central);
        link.begin_waiting();
        assert_eq!(
            link.on_connected(ConnectionHandle(3), HciStatus::SUCCESS),
            ConnectOutcome::Ignored
        );
        assert_eq!(link.current_connection(), None);
    }

    #[test]
    fn test_disconnect_releases_once() {
        let mut link = connected_central();

        let released = link.on_disconnected(ConnectionHandle(1), HciStatus::REMOTE_USER_TERMINATED);
        assert_eq!(released.map(|a| a.handle), Some(ConnectionHandle(1)));
        assert_eq!(link.state(), ConnectionState::Scanning);

        let again = link.on_disconnected(ConnectionHandle(1), HciStatus::REMOTE_USER_TERMINATED);
        assert!(again.is_none());
        assert_eq!(link.releases(), 1);
        assert_eq!(link.current_connection(), None);
    }

    #[test]
    fn test_disconnect_for_other_handle_is_ignored() {
        let mut link = connected_central();
        assert!(link
            .on_disconnected(ConnectionHandle(9), HciStatus::REMOTE_USER_TERMINATED)
            .is_none());
        assert_eq!(link.current_connection(), Some(ConnectionHandle(1)));
    }

    #[test]
    fn test_disconnect_while_connecting_clears_attempt() {
        let mut link = LinkManager::new(Role::Central);
        link.begin_waiting();
        link.begin_connecting(ConnectionHandle(2), PeerAddress::from("AA:BB"));

        assert!(link
            .on_disconnected(ConnectionHandle(2), HciStatus::CONNECTION_TIMEOUT)
            .is_none());
        assert_eq!(link.state(), ConnectionState::Scanning);
        assert_eq!(
            link.on_connected(ConnectionHandle(2), HciStatus::SUCCESS),
            ConnectOutcome::Ignored
        );
    }
}
