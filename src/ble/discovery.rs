//! GATT discovery walk (Central).
//!
//! Walks the remote attribute table from the relay service UUID down to the
//! receive characteristic:
//!
//! ```text
//! Idle -> DiscoveringService -> DiscoveringCharacteristic -> Resolved
//!                   \                        \
//!                    +-> Abandoned            +-> Abandoned
//! ```
//!
//! The engine is a pure state machine. It hands back the next request to
//! issue and the session talks to the host.

use std::fmt;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::host::{
    AttributeHandle, DiscoverParams, DiscoveredAttribute, DiscoveryKind, HandleRange,
};
use crate::ble::uuids::display_uuid;

/// Why a walk stopped without resolving a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// The service lookup finished without the relay service.
    ServiceNotFound,
    /// The characteristic enumeration finished without the target.
    CharacteristicNotFound,
    /// The host refused a discovery request.
    RequestFailed,
}

impl fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceNotFound => write!(f, "service not found"),
            Self::CharacteristicNotFound => write!(f, "characteristic not found"),
            Self::RequestFailed => write!(f, "discovery request failed"),
        }
    }
}

/// Discovery walk state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryState {
    /// No walk for this connection yet.
    #[default]
    Idle,
    /// Looking up the primary service.
    DiscoveringService,
    /// Enumerating characteristics after the service declaration.
    DiscoveringCharacteristic,
    /// Target characteristic found.
    Resolved(AttributeHandle),
    /// Walk ended without a result.
    Abandoned(AbandonReason),
}

impl DiscoveryState {
    /// Check if the walk has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved(_) | Self::Abandoned(_))
    }
}

/// Scan window and target of an in-flight walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryCursor {
    /// The request currently outstanding.
    pub params: DiscoverParams,
    /// UUID the current step is looking for.
    pub target: Uuid,
}

/// What the session should do after feeding a result to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStep {
    /// Keep waiting for results of the outstanding request.
    Continue,
    /// The service was found; issue this characteristic request.
    Issue(DiscoverParams),
    /// The target characteristic resolved to this value handle.
    Resolved(AttributeHandle),
    /// The walk failed.
    Abandoned(AbandonReason),
    /// The result does not belong to the current walk.
    Ignored,
}

/// Discovery walk for one connection.
#[derive(Debug)]
pub struct DiscoveryEngine {
    service: Uuid,
    characteristic: Uuid,
    state: DiscoveryState,
    cursor: Option<DiscoveryCursor>,
}

impl DiscoveryEngine {
    /// Create an engine looking for `characteristic` inside `service`.
    pub fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
            state: DiscoveryState::Idle,
            cursor: None,
        }
    }

    /// Current walk state.
    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    /// The in-flight cursor, if a walk is running.
    pub fn cursor(&self) -> Option<&DiscoveryCursor> {
        self.cursor.as_ref()
    }

    /// Value handle of the target characteristic once resolved.
    pub fn resolved_handle(&self) -> Option<AttributeHandle> {
        match self.state {
            DiscoveryState::Resolved(handle) => Some(handle),
            _ => None,
        }
    }

    /// Begin a walk; returns the service lookup to issue.
    pub fn start(&mut self) -> DiscoverParams {
        let params = DiscoverParams {
            range: HandleRange::FULL,
            uuid: Some(self.service),
            kind: DiscoveryKind::PrimaryService,
        };
        self.cursor = Some(DiscoveryCursor {
            params,
            target: self.service,
        });
        self.state = DiscoveryState::DiscoveringService;
        debug!("Discovering service {}", display_uuid(&self.service));
        params
    }

    /// Feed one discovery result; `None` marks an exhausted window.
    pub fn on_result(
        &mut self,
        kind: DiscoveryKind,
        attribute: Option<&DiscoveredAttribute>,
    ) -> DiscoveryStep {
        let expected = match self.state {
            DiscoveryState::DiscoveringService => DiscoveryKind::PrimaryService,
            DiscoveryState::DiscoveringCharacteristic => DiscoveryKind::Characteristic,
            _ => {
                trace!("Discovery result after walk ended, ignoring");
                return DiscoveryStep::Ignored;
            }
        };

        if kind != expected {
            trace!("Stale {:?} discovery result, ignoring", kind);
            return DiscoveryStep::Ignored;
        }

        match (self.state, attribute) {
            (DiscoveryState::DiscoveringService, Some(attribute)) => {
                if attribute.uuid != self.service {
                    return DiscoveryStep::Continue;
                }
                let Some(range) = HandleRange::after(attribute.handle) else {
                    return self.abandon(AbandonReason::CharacteristicNotFound);
                };
                let params = DiscoverParams {
                    range,
                    uuid: None,
                    kind: DiscoveryKind::Characteristic,
                };
                self.cursor = Some(DiscoveryCursor {
                    params,
                    target: self.characteristic,
                });
                self.state = DiscoveryState::DiscoveringCharacteristic;
                debug!(
                    "Service {} at {}, enumerating characteristics",
                    display_uuid(&self.service),
                    attribute.handle
                );
                DiscoveryStep::Issue(params)
            }
            (DiscoveryState::DiscoveringService, None) => {
                self.abandon(AbandonReason::ServiceNotFound)
            }
            (DiscoveryState::DiscoveringCharacteristic, Some(attribute)) => {
                if attribute.uuid != self.characteristic {
                    trace!("Skipping characteristic {}", display_uuid(&attribute.uuid));
                    return DiscoveryStep::Continue;
                }
                self.cursor = None;
                self.state = DiscoveryState::Resolved(attribute.value_handle);
                info!(
                    "Resolved characteristic {} at {}",
                    display_uuid(&self.characteristic),
                    attribute.value_handle
                );
                DiscoveryStep::Resolved(attribute.value_handle)
            }
            (DiscoveryState::DiscoveringCharacteristic, None) => {
                self.abandon(AbandonReason::CharacteristicNotFound)
            }
            _ => DiscoveryStep::Ignored,
        }
    }

    /// End the walk without a result.
    pub fn abandon(&mut self, reason: AbandonReason) -> DiscoveryStep {
        warn!("Discovery abandoned: {}", reason);
        self.cursor = None;
        self.state = DiscoveryState::Abandoned(reason);
        DiscoveryStep::Abandoned(reason)
    }

    /// Drop all walk state, e.g. on disconnect.
    pub fn reset(&mut self) {
        self.cursor = None;
        self.state = DiscoveryState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::*;

    fn engine() -> DiscoveryEngine {
        DiscoveryEngine::new(RELAY_SERVICE_UUID, RECEIVE_CHARACTERISTIC_UUID)
    }

    fn service_at(handle: u16) -> DiscoveredAttribute {
        DiscoveredAttribute {
            handle: AttributeHandle(handle),
            value_handle: AttributeHandle(handle),
            uuid: RELAY_SERVICE_UUID,
        }
    }

    fn characteristic(handle: u16, uuid: Uuid) -> DiscoveredAttribute {
        DiscoveredAttribute {
            handle: AttributeHandle(handle),
            value_handle: AttributeHandle(handle + 1),
            uuid,
        }
    }

    #[test]
    fn test_start_targets_service() {
        let mut engine = engine();
        let params = engine.start();
        assert_eq!(params.range, HandleRange::FULL);
        assert_eq!(params.uuid, Some(RELAY_SERVICE_UUID));
        assert_eq!(params.kind, DiscoveryKind::PrimaryService);
        assert_eq!(engine.state(), DiscoveryState::DiscoveringService);
        assert!(engine.cursor().is_some());
    }

    #[test]
    fn test_service_match_narrows_window() {
        let mut engine = engine();
        engine.start();

        let step = engine.on_result(DiscoveryKind::PrimaryService, Some(&service_at(0x10)));
        match step {
            DiscoveryStep::Issue(params) => {
                assert_eq!(params.range.start, AttributeHandle(0x11));
                assert_eq!(params.range.end, AttributeHandle::LAST);
                assert_eq!(params.uuid, None);
                assert_eq!(params.kind, DiscoveryKind::Characteristic);
            }
            other => panic!("expected Issue, got {:?}", other),
        }
        assert_eq!(engine.state(), DiscoveryState::DiscoveringCharacteristic);
        assert_eq!(engine.cursor().unwrap().target, RECEIVE_CHARACTERISTIC_UUID);
    }

    #[test]
    fn test_first_match_wins() {
        let mut engine = engine();
        engine.start();
        engine.on_result(DiscoveryKind::PrimaryService, Some(&service_at(1)));

        let other = characteristic(2, SEND_CHARACTERISTIC_UUID);
        assert_eq!(
            engine.on_result(DiscoveryKind::Characteristic, Some(&other)),
            DiscoveryStep::Continue
        );

        let target = characteristic(4, RECEIVE_CHARACTERISTIC_UUID);
        assert_eq!(
            engine.on_result(DiscoveryKind::Characteristic, Some(&target)),
            DiscoveryStep::Resolved(AttributeHandle(5))
        );
        assert_eq!(engine.resolved_handle(), Some(AttributeHandle(5)));
        assert!(engine.cursor().is_none());

        // A duplicate after resolution does not move the handle.
        let duplicate = characteristic(8, RECEIVE_CHARACTERISTIC_UUID);
        assert_eq!(
            engine.on_result(DiscoveryKind::Characteristic, Some(&duplicate)),
            DiscoveryStep::Ignored
        );
        assert_eq!(engine.resolved_handle(), Some(AttributeHandle(5)));
    }

    #[test]
    fn test_missing_service_abandons() {
        let mut engine = engine();
        engine.start();
        assert_eq!(
            engine.on_result(DiscoveryKind::PrimaryService, None),
            DiscoveryStep::Abandoned(AbandonReason::ServiceNotFound)
        );
        assert_eq!(
            engine.state(),
            DiscoveryState::Abandoned(AbandonReason::ServiceNotFound)
        );
        assert_eq!(engine.resolved_handle(), None);
    }

    #[test]
    fn test_exhausted_enumeration_abandons() {
        let mut engine = engine();
        engine.start();
        engine.on_result(DiscoveryKind::PrimaryService, Some(&service_at(1)));
        engine.on_result(
            DiscoveryKind::Characteristic,
            Some(&characteristic(2, SEND_CHARACTERISTIC_UUID)),
        );

        assert_eq!(
            engine.on_result(DiscoveryKind::Characteristic, None),
            DiscoveryStep::Abandoned(AbandonReason::CharacteristicNotFound)
        );
        assert_eq!(engine.resolved_handle(), None);
        assert!(engine.cursor().is_none());
    }

    #[test]
    fn test_stale_service_terminator_is_ignored() {
        let mut engine = engine();
        engine.start();
        engine.on_result(DiscoveryKind::PrimaryService, Some(&service_at(1)));

        // End marker of the service lookup arrives after the walk advanced.
        assert_eq!(
            engine.on_result(DiscoveryKind::PrimaryService, None),
            DiscoveryStep::Ignored
        );
        assert_eq!(engine.state(), DiscoveryState::DiscoveringCharacteristic);
    }

    #[test]
    fn test_results_before_start_are_ignored() {
        let mut engine = engine();
        assert_eq!(
            engine.on_result(DiscoveryKind::PrimaryService, Some(&service_at(1))),
            DiscoveryStep::Ignored
        );
        assert_eq!(engine.state(), DiscoveryState::Idle);
    }

    #[test]
    fn test_reset_clears_walk() {
        let mut engine = engine();
        engine.start();
        engine.on_result(DiscoveryKind::PrimaryService, Some(&service_at(1)));
        engine.reset();
        assert_eq!(engine.state(), DiscoveryState::Idle);
        assert!(engine.cursor().is_none());
        assert_eq!(engine.resolved_handle(), None);
    }
}
