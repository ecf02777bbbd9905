//! Notification subscription (Central).
//!
//! Enables notifications on the resolved characteristic by writing its CCC
//! descriptor, then screens incoming notifications against the fixed relay
//! receive buffer before they are handed on as text.

use tracing::{debug, info, warn};

use crate::ble::host::{
    AttStatus, AttributeHandle, CccValue, CentralHost, ConnectionHandle, SubscribeParams,
};
use crate::error::{Error, Result};
use crate::relay::frame::MessageFrame;

/// Progress of the CCC descriptor write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Write issued, completion not yet seen.
    Pending,
    /// Notifications enabled.
    Active,
    /// The write failed; notifications will not arrive.
    Failed(AttStatus),
}

/// The one subscription of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionRecord {
    /// Value handle notifications were enabled for.
    pub value_handle: AttributeHandle,
    /// CCC handle, filled in by the write completion.
    pub ccc_handle: Option<AttributeHandle>,
    /// Progress of the descriptor write.
    pub state: SubscriptionState,
}

/// Outcome of screening a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome<const N: usize> {
    /// The frame fits the receive buffer.
    Accepted(MessageFrame<N>),
    /// The frame is longer than the receive buffer and was dropped.
    Rejected {
        /// Length of the notification.
        len: usize,
    },
    /// No subscription exists on this connection.
    Unsolicited,
}

/// Owns the subscription record and the notify/write-completion callbacks.
///
/// `N` is the receive buffer size.
#[derive(Debug, Default)]
pub struct SubscriptionManager<const N: usize> {
    record: Option<SubscriptionRecord>,
}

impl<const N: usize> SubscriptionManager<N> {
    /// Create a manager with no subscription.
    pub fn new() -> Self {
        Self { record: None }
    }

    /// The current subscription, if any.
    pub fn record(&self) -> Option<&SubscriptionRecord> {
        self.record.as_ref()
    }

    /// Check if notifications are enabled.
    pub fn is_active(&self) -> bool {
        matches!(
            self.record,
            Some(SubscriptionRecord {
                state: SubscriptionState::Active,
                ..
            })
        )
    }

    /// Write the CCC descriptor that enables notifications for `value_handle`.
    ///
    /// The host locates the descriptor in the window after the value handle.
    /// The record is only kept when the host accepts the request.
    pub fn subscribe<H: CentralHost + ?Sized>(
        &mut self,
        host: &mut H,
        conn: ConnectionHandle,
        value_handle: AttributeHandle,
    ) -> Result<()> {
        let params = SubscribeParams {
            value_handle,
            ccc_handle: None,
            end_handle: AttributeHandle::LAST,
            value: CccValue::Notify,
        };

        host.subscribe(conn, &params).map_err(|e| {
            warn!("Subscribe request for {} refused: {}", value_handle, e);
            e
        })?;

        debug!("Subscribe request issued for {}", value_handle);
        self.record = Some(SubscriptionRecord {
            value_handle,
            ccc_handle: None,
            state: SubscriptionState::Pending,
        });
        Ok(())
    }

    /// Write-completion callback. Failure is reported and never retried.
    pub fn on_write_complete(
        &mut self,
        status: AttStatus,
        ccc_handle: Option<AttributeHandle>,
    ) -> Result<()> {
        let Some(record) = self.record.as_mut() else {
            debug!("Subscribe completion with no subscription, ignoring");
            return Ok(());
        };

        if ccc_handle.is_some() {
            record.ccc_handle = ccc_handle;
        }

        if status.is_success() {
            info!("Notifications enabled on {}", record.value_handle);
            record.state = SubscriptionState::Active;
            Ok(())
        } else {
            warn!(
                "Enabling notifications on {} failed (status {})",
                record.value_handle, status
            );
            record.state = SubscriptionState::Failed(status);
            Err(Error::SubscriptionFailed { status })
        }
    }

    /// Notify callback.
    ///
    /// Frames longer than `N` bytes are rejected. Processing a frame never
    /// ends the subscription.
    pub fn on_notification(&self, payload: &[u8]) -> NotificationOutcome<N> {
        if self.record.is_none() {
            return NotificationOutcome::Unsolicited;
        }

        match MessageFrame::<N>::new(payload) {
            Ok(frame) => NotificationOutcome::Accepted(frame),
            Err(_) => {
                warn!(
                    "Notification of {} bytes exceeds the {} byte buffer",
                    payload.len(),
                    N
                );
                NotificationOutcome::Rejected { len: payload.len() }
            }
        }
    }

    /// Drop the subscription, e.g. on disconnect.
    pub fn clear(&mut self) {
        self.record = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::host::MockCentralHost;

    type Manager = SubscriptionManager<32>;

    #[test]
    fn test_subscribe_writes_notify_ccc() {
        let mut host = MockCentralHost::new();
        host.expect_subscribe()
            .withf(|conn, params| {
                *conn == ConnectionHandle(1)
                    && params.value_handle == AttributeHandle(3)
                    && params.ccc_handle.is_none()
                    && params.value == CccValue::Notify
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let mut manager = Manager::new();
        manager
            .subscribe(&mut host, ConnectionHandle(1), AttributeHandle(3))
            .unwrap();

        let record = manager.record().unwrap();
        assert_eq!(record.value_handle, AttributeHandle(3));
        assert_eq!(record.state, SubscriptionState::Pending);
    }

    #[test]
    fn test_refused_subscribe_keeps_no_record() {
        let mut host = MockCentralHost::new();
        host.expect_subscribe()
            .returning(|_, _| Err(Error::host("subscribe", -12)));

        let mut manager = Manager::new();
        assert!(manager
            .subscribe(&mut host, ConnectionHandle(1), AttributeHandle(3))
            .is_err());
        assert!(manager.record().is_none());
    }

    #[test]
    fn test_write_complete_fills_ccc() {
        let mut host = MockCentralHost::new();
        host.expect_subscribe().returning(|_, _| Ok(()));
        let mut manager = Manager::new();
        manager
            .subscribe(&mut host, ConnectionHandle(1), AttributeHandle(3))
            .unwrap();

        manager
            .on_write_complete(AttStatus::SUCCESS, Some(AttributeHandle(6)))
            .unwrap();

        assert!(manager.is_active());
        assert_eq!(manager.record().unwrap().ccc_handle, Some(AttributeHandle(6)));
    }

    #[test]
    fn test_write_failure_is_reported() {
        let mut host = MockCentralHost::new();
        host.expect_subscribe().returning(|_, _| Ok(()));
        let mut manager = Manager::new();
        manager
            .subscribe(&mut host, ConnectionHandle(1), AttributeHandle(3))
            .unwrap();

        let result = manager.on_write_complete(AttStatus::WRITE_NOT_PERMITTED, None);
        assert!(matches!(result, Err(Error::SubscriptionFailed { .. })));
        assert!(!manager.is_active());
        assert_eq!(
            manager.record().unwrap().state,
            SubscriptionState::Failed(AttStatus::WRITE_NOT_PERMITTED)
        );
    }

    #[test]
    fn test_notification_bounds() {
        let mut host = MockCentralHost::new();
        host.expect_subscribe().returning(|_, _| Ok(()));
        let mut manager = Manager::new();

        assert_eq!(
            manager.on_notification(b"early"),
            NotificationOutcome::Unsolicited
        );

        manager
            .subscribe(&mut host, ConnectionHandle(1), AttributeHandle(3))
            .unwrap();

        match manager.on_notification(b"HELLO") {
            NotificationOutcome::Accepted(frame) => assert_eq!(frame.text(), "HELLO"),
            other => panic!("expected Accepted, got {:?}", other),
        }

        assert!(matches!(
            manager.on_notification(&[b'A'; 32]),
            NotificationOutcome::Accepted(_)
        ));
        assert_eq!(
            manager.on_notification(&[b'A'; 33]),
            NotificationOutcome::Rejected { len: 33 }
        );

        // Still subscribed after a rejection.
        assert!(manager.record().is_some());
    }

    #[test]
    fn test_clear() {
        let mut host = MockCentralHost::new();
        host.expect_subscribe().returning(|_, _| Ok(()));
        let mut manager = Manager::new();
        manager
            .subscribe(&mut host, ConnectionHandle(1), AttributeHandle(3))
            .unwrap();
        manager.clear();
        assert!(manager.record().is_none());
    }
}
