//! Status events.
//!
//! Every outcome of scan, advertise, connect, discover, subscribe, send,
//! notify and register is published on a broadcast channel so that callers
//! can observe the link without reaching into the session.

use tokio::sync::broadcast;
use tracing::trace;

use crate::ble::discovery::AbandonReason;
use crate::ble::host::{AttributeHandle, ConnectionHandle, HciStatus, PeerAddress};
use crate::session::Role;

/// Observable outcome of a session step.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// Central scanning started.
    ScanStarted,
    /// Central scanning could not be started.
    ScanFailed {
        /// Host description of the failure.
        reason: String,
    },
    /// Peripheral advertising started.
    AdvertisingStarted,
    /// Peripheral advertising could not be started.
    AdvertisingFailed {
        /// Host description of the failure.
        reason: String,
    },
    /// Central issued a connection request.
    ConnectionInitiated {
        /// The advertiser being connected to.
        peer: PeerAddress,
    },
    /// A link came up.
    Connected {
        /// The new link.
        handle: ConnectionHandle,
    },
    /// A connection attempt failed.
    ConnectFailed {
        /// Why the attempt failed.
        reason: String,
    },
    /// A link went down.
    Disconnected {
        /// The link released, if one was held.
        handle: Option<ConnectionHandle>,
        /// Reason reported by the host.
        reason: HciStatus,
    },
    /// Central started looking up the relay service.
    DiscoveryStarted,
    /// Central found the relay service declaration.
    ServiceDiscovered {
        /// Declaration handle of the service.
        handle: AttributeHandle,
    },
    /// Central resolved the receive characteristic.
    CharacteristicResolved {
        /// Value handle of the characteristic.
        value_handle: AttributeHandle,
    },
    /// Central discovery ended without a result.
    DiscoveryAbandoned {
        /// Why discovery stopped.
        reason: AbandonReason,
    },
    /// Central notifications enabled.
    Subscribed {
        /// CCC descriptor handle that was written.
        ccc_handle: Option<AttributeHandle>,
    },
    /// Central could not enable notifications.
    SubscribeFailed {
        /// Why the subscription failed.
        reason: String,
    },
    /// Central sent a frame.
    MessageSent {
        /// Frame length in bytes.
        len: usize,
    },
    /// Central could not send a frame.
    SendFailed {
        /// Why the send failed.
        reason: String,
    },
    /// Central received a notified frame.
    MessageReceived {
        /// Decoded frame text.
        text: String,
    },
    /// Central dropped a notified frame above the receive bound.
    FrameRejected {
        /// Length of the frame.
        len: usize,
        /// The bound.
        max: usize,
    },
    /// Peripheral received a frame above its bound.
    FrameOversize {
        /// Length of the frame.
        len: usize,
        /// The bound.
        max: usize,
        /// Whether the frame was truncated and processed anyway.
        truncated: bool,
    },
    /// Peripheral notified a transformed frame.
    Notified {
        /// Notified length in bytes.
        len: usize,
    },
    /// Peripheral could not notify a frame.
    NotifyFailed {
        /// Why the notification failed.
        reason: String,
    },
    /// Peripheral registered its attribute table.
    ServiceRegistered,
    /// Peripheral could not register its attribute table.
    RegistrationFailed {
        /// Why registration failed.
        reason: String,
    },
}

impl StatusEvent {
    /// Check if the event reports a failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::ScanFailed { .. }
                | Self::AdvertisingFailed { .. }
                | Self::ConnectFailed { .. }
                | Self::DiscoveryAbandoned { .. }
                | Self::SubscribeFailed { .. }
                | Self::SendFailed { .. }
                | Self::FrameRejected { .. }
                | Self::FrameOversize { .. }
                | Self::NotifyFailed { .. }
                | Self::RegistrationFailed { .. }
        )
    }
}

/// Broadcast side of a session's status events.
#[derive(Debug, Clone)]
pub struct EventSink {
    role: Role,
    tx: broadcast::Sender<StatusEvent>,
}

impl EventSink {
    /// Create a sink with room for `capacity` unread events per receiver.
    pub fn new(role: Role, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { role, tx }
    }

    /// Publish an event. Having no receivers is not an error.
    pub fn emit(&self, event: StatusEvent) {
        trace!(role = %self.role, "Status event: {:?}", event);
        let _ = self.tx.send(event);
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_receivers() {
        let sink = EventSink::new(Role::Central, 4);
        sink.emit(StatusEvent::ScanStarted);
    }

    #[test]
    fn test_subscribe_receives() {
        let sink = EventSink::new(Role::Peripheral, 4);
        let mut rx = sink.subscribe();
        sink.emit(StatusEvent::Notified { len: 5 });
        assert_eq!(rx.try_recv().unwrap(), StatusEvent::Notified { len: 5 });
    }

    #[test]
    fn test_is_failure() {
        assert!(StatusEvent::SendFailed {
            reason: "x".into()
        }
        .is_failure());
        assert!(!StatusEvent::MessageSent { len: 3 }.is_failure());
    }
}
