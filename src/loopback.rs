//! In-memory host pair.
//!
//! [`LoopbackAir`] stands in for the radio between one Central and one
//! Peripheral in the same process. The Peripheral's registered table is laid
//! out as an [`AttributeDatabase`] that answers the Central's discovery and
//! CCC lookups; writes are delivered to the Peripheral and notifications to
//! the Central as [`HostEvent`]s on their callback channels.
//!
//! Faults can be injected to exercise the failure paths: a refused
//! connection, a failing CCC write, or a dropped link.

use std::collections::HashSet;
use std::sync::Arc;

use btleplug::api::{CharPropFlags, WriteType};
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::ble::attributes::AttributeDatabase;
use crate::ble::host::{
    Advertisement, AdvertisingKind, AdvertisingPayload, AttStatus, AttributeHandle, CentralHost,
    ConnectionHandle, DiscoverParams, HandleRange, HciStatus, HostEvent, PeerAddress,
    PeripheralHost, ScanMode, SubscribeParams,
};
use crate::ble::service::AttributeTable;
use crate::error::errno::{EALREADY, EINVAL, ENOMEM, ENOTCONN};
use crate::error::{Error, Result};
use crate::runtime::{host_event_channel, HostEventReceiver, HostEventSender};

/// Address the loopback Peripheral advertises from.
pub const PERIPHERAL_ADDRESS: &str = "00:00:5E:00:53:01";

#[derive(Debug, Default)]
struct AirState {
    central_tx: Option<HostEventSender>,
    peripheral_tx: Option<HostEventSender>,
    scanning: bool,
    advertising: Option<AdvertisingPayload>,
    database: Option<AttributeDatabase>,
    link: Option<ConnectionHandle>,
    next_handle: u16,
    notifying: HashSet<Uuid>,
    fail_next_connect: bool,
    fail_subscribe: Option<AttStatus>,
}

impl AirState {
    fn to_central(&self, event: HostEvent) {
        trace!("loopback -> central: {:?}", event);
        if let Some(tx) = &self.central_tx {
            let _ = tx.send(event);
        }
    }

    fn to_peripheral(&self, event: HostEvent) {
        trace!("loopback -> peripheral: {:?}", event);
        if let Some(tx) = &self.peripheral_tx {
            let _ = tx.send(event);
        }
    }

    fn report_advertiser(&self) {
        if !self.scanning || self.link.is_some() {
            return;
        }
        if let Some(payload) = &self.advertising {
            self.to_central(HostEvent::DeviceFound(Advertisement {
                address: PeerAddress::from(PERIPHERAL_ADDRESS),
                rssi: -30,
                kind: AdvertisingKind::ConnectableUndirected,
                services: payload.service_uuids.clone(),
                local_name: payload.local_name.clone(),
            }));
        }
    }

    fn check_link(&self, conn: ConnectionHandle, operation: &'static str) -> Result<()> {
        if self.link == Some(conn) {
            Ok(())
        } else {
            Err(Error::host(operation, ENOTCONN))
        }
    }
}

/// Shared medium between a loopback Central and Peripheral.
#[derive(Debug, Clone, Default)]
pub struct LoopbackAir {
    state: Arc<Mutex<AirState>>,
}

impl LoopbackAir {
    /// Create an empty medium.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the Central side, returning its host and callback channel.
    pub fn central(&self) -> (LoopbackCentral, HostEventReceiver) {
        let (tx, rx) = host_event_channel();
        self.state.lock().central_tx = Some(tx);
        (
            LoopbackCentral {
                state: self.state.clone(),
            },
            rx,
        )
    }

    /// Attach the Peripheral side, returning its host and callback channel.
    pub fn peripheral(&self) -> (LoopbackPeripheral, HostEventReceiver) {
        let (tx, rx) = host_event_channel();
        self.state.lock().peripheral_tx = Some(tx);
        (
            LoopbackPeripheral {
                state: self.state.clone(),
            },
            rx,
        )
    }

    /// Handle of the current link, if any.
    pub fn link(&self) -> Option<ConnectionHandle> {
        self.state.lock().link
    }

    /// Refuse the next connection attempt with a failed status.
    pub fn fail_next_connect(&self) {
        self.state.lock().fail_next_connect = true;
    }

    /// Fail every CCC write with `status`.
    pub fn fail_subscribe(&self, status: AttStatus) {
        self.state.lock().fail_subscribe = Some(status);
    }

    /// Drop the link, reporting `reason` to both sides.
    pub fn disconnect(&self, reason: HciStatus) {
        let mut state = self.state.lock();
        let Some(handle) = state.link.take() else {
            return;
        };
        info!("Loopback link {} dropped (reason {})", handle, reason);
        state.notifying.clear();
        state.to_central(HostEvent::Disconnected { handle, reason });
        state.to_peripheral(HostEvent::Disconnected { handle, reason });
    }

    /// Close both callback channels, which stops the session tasks.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.central_tx = None;
        state.peripheral_tx = None;
    }
}

/// Central side of a [`LoopbackAir`].
#[derive(Debug)]
pub struct LoopbackCentral {
    state: Arc<Mutex<AirState>>,
}

impl CentralHost for LoopbackCentral {
    fn start_scanning(&mut self, mode: ScanMode) -> Result<()> {
        let mut state = self.state.lock();
        debug!("Loopback scan started ({:?})", mode);
        state.scanning = true;
        state.report_advertiser();
        Ok(())
    }

    fn stop_scanning(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.scanning {
            return Err(Error::host("stop_scanning", EALREADY));
        }
        state.scanning = false;
        Ok(())
    }

    fn connect(&mut self, address: &PeerAddress) -> Result<ConnectionHandle> {
        let mut state = self.state.lock();
        if address.0 != PERIPHERAL_ADDRESS || state.advertising.is_none() {
            return Err(Error::host("connect", EINVAL));
        }
        if state.link.is_some() {
            return Err(Error::host("connect", EALREADY));
        }

        state.next_handle = state.next_handle.wrapping_add(1);
        let handle = ConnectionHandle(state.next_handle);

        if std::mem::take(&mut state.fail_next_connect) {
            state.to_central(HostEvent::Connected {
                handle,
                status: HciStatus::CONNECTION_FAILED_TO_ESTABLISH,
            });
            return Ok(handle);
        }

        state.advertising = None;
        state.link = Some(handle);
        let connected = HostEvent::Connected {
            handle,
            status: HciStatus::SUCCESS,
        };
        state.to_central(connected.clone());
        state.to_peripheral(connected);
        Ok(handle)
    }

    fn discover(&mut self, conn: ConnectionHandle, params: &DiscoverParams) -> Result<()> {
        let state = self.state.lock();
        state.check_link(conn, "discover")?;

        let found = state
            .database
            .as_ref()
            .map(|db| db.discover(params))
            .unwrap_or_default();
        for attribute in found {
            state.to_central(HostEvent::DiscoveryResult {
                handle: conn,
                kind: params.kind,
                attribute: Some(attribute),
            });
        }
        state.to_central(HostEvent::DiscoveryResult {
            handle: conn,
            kind: params.kind,
            attribute: None,
        });
        Ok(())
    }

    fn subscribe(&mut self, conn: ConnectionHandle, params: &SubscribeParams) -> Result<()> {
        let mut state = self.state.lock();
        state.check_link(conn, "subscribe")?;

        if let Some(status) = state.fail_subscribe {
            state.to_central(HostEvent::SubscribeComplete {
                handle: conn,
                status,
                ccc_handle: None,
            });
            return Ok(());
        }

        let located = match params.ccc_handle {
            Some(handle) => state
                .database
                .as_ref()
                .and_then(|db| db.get(handle))
                .map(|entry| (entry.handle, entry.uuid)),
            None => params.value_handle.next().and_then(|start| {
                let window = HandleRange {
                    start,
                    end: params.end_handle,
                };
                state
                    .database
                    .as_ref()
                    .and_then(|db| db.client_config_in(window))
            }),
        };

        let event = match located {
            Some((ccc, characteristic)) => {
                if params.value.bits() == 0 {
                    state.notifying.remove(&characteristic);
                } else {
                    state.notifying.insert(characteristic);
                }
                HostEvent::SubscribeComplete {
                    handle: conn,
                    status: AttStatus::SUCCESS,
                    ccc_handle: Some(ccc),
                }
            }
            None => HostEvent::SubscribeComplete {
                handle: conn,
                status: AttStatus::ATTRIBUTE_NOT_FOUND,
                ccc_handle: None,
            },
        };
        state.to_central(event);
        Ok(())
    }

    fn write_characteristic(
        &mut self,
        conn: ConnectionHandle,
        value_handle: AttributeHandle,
        payload: &[u8],
        write_type: WriteType,
    ) -> Result<()> {
        let state = self.state.lock();
        state.check_link(conn, "write_characteristic")?;

        let required = match write_type {
            WriteType::WithoutResponse => CharPropFlags::WRITE_WITHOUT_RESPONSE,
            WriteType::WithResponse => CharPropFlags::WRITE,
        };
        let permitted = state
            .database
            .as_ref()
            .and_then(|db| db.properties_of(value_handle))
            .map_or(false, |properties| properties.contains(required));
        if !permitted {
            return Err(Error::host("write_characteristic", EINVAL));
        }

        state.to_peripheral(HostEvent::WriteReceived {
            handle: conn,
            attribute: value_handle,
            payload: Some(Bytes::copy_from_slice(payload)),
        });
        Ok(())
    }
}

/// Peripheral side of a [`LoopbackAir`].
#[derive(Debug)]
pub struct LoopbackPeripheral {
    state: Arc<Mutex<AirState>>,
}

impl PeripheralHost for LoopbackPeripheral {
    fn start_advertising(&mut self, payload: &AdvertisingPayload) -> Result<()> {
        let mut state = self.state.lock();
        if state.link.is_some() {
            return Err(Error::host("start_advertising", ENOMEM));
        }
        debug!("Loopback advertising {:?}", payload.service_uuids);
        state.advertising = Some(payload.clone());
        state.report_advertiser();
        Ok(())
    }

    fn register_service(&mut self, table: &AttributeTable) -> Result<()> {
        let mut state = self.state.lock();
        if state.database.is_some() {
            return Err(Error::host("register_service", EALREADY));
        }
        state.database = Some(table.layout(AttributeHandle::FIRST));
        Ok(())
    }

    fn notify(&mut self, conn: ConnectionHandle, characteristic: Uuid, payload: &[u8]) -> Result<()> {
        let state = self.state.lock();
        state.check_link(conn, "notify")?;

        if !state.notifying.contains(&characteristic) {
            return Err(Error::host("notify", EINVAL));
        }
        let value_handle = state
            .database
            .as_ref()
            .and_then(|db| db.value_handle_of(&characteristic))
            .ok_or_else(|| Error::host("notify", EINVAL))?;

        state.to_central(HostEvent::Notification {
            handle: conn,
            value_handle,
            payload: Bytes::copy_from_slice(payload),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::host::{CccValue, DiscoveryKind};
    use crate::ble::uuids::*;

    fn drain(rx: &mut HostEventReceiver) -> Vec<HostEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn linked() -> (
        LoopbackAir,
        LoopbackCentral,
        HostEventReceiver,
        LoopbackPeripheral,
        HostEventReceiver,
        ConnectionHandle,
    ) {
        let air = LoopbackAir::new();
        let (mut central, mut central_rx) = air.central();
        let (mut peripheral, mut peripheral_rx) = air.peripheral();

        peripheral
            .register_service(&AttributeTable::relay(&ServiceDescriptor::default()))
            .unwrap();
        peripheral
            .start_advertising(&AdvertisingPayload::for_service(RELAY_SERVICE_UUID, None))
            .unwrap();
        central.start_scanning(ScanMode::Passive).unwrap();
        central.stop_scanning().unwrap();
        let conn = central.connect(&PeerAddress::from(PERIPHERAL_ADDRESS)).unwrap();

        drain(&mut central_rx);
        drain(&mut peripheral_rx);
        (air, central, central_rx, peripheral, peripheral_rx, conn)
    }

    #[test]
    fn test_scan_reports_advertiser() {
        let air = LoopbackAir::new();
        let (mut central, mut central_rx) = air.central();
        let (mut peripheral, _peripheral_rx) = air.peripheral();

        central.start_scanning(ScanMode::Passive).unwrap();
        assert!(drain(&mut central_rx).is_empty());

        peripheral
            .start_advertising(&AdvertisingPayload::for_service(RELAY_SERVICE_UUID, None))
            .unwrap();
        match drain(&mut central_rx).as_slice() {
            [HostEvent::DeviceFound(advertisement)] => {
                assert_eq!(advertisement.address.0, PERIPHERAL_ADDRESS);
                assert_eq!(advertisement.services, vec![RELAY_SERVICE_UUID]);
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[test]
    fn test_connect_reaches_both_sides() {
        let air = LoopbackAir::new();
        let (mut central, mut central_rx) = air.central();
        let (mut peripheral, mut peripheral_rx) = air.peripheral();
        peripheral
            .start_advertising(&AdvertisingPayload::for_service(RELAY_SERVICE_UUID, None))
            .unwrap();

        let conn = central.connect(&PeerAddress::from(PERIPHERAL_ADDRESS)).unwrap();
        let expected = HostEvent::Connected {
            handle: conn,
            status: HciStatus::SUCCESS,
        };
        assert_eq!(drain(&mut central_rx), vec![expected.clone()]);
        assert_eq!(drain(&mut peripheral_rx), vec![expected]);
        assert_eq!(air.link(), Some(conn));

        assert!(central.connect(&PeerAddress::from("11:22:33:44:55:66")).is_err());
    }

    #[test]
    fn test_failed_connect_injection() {
        let air = LoopbackAir::new();
        let (mut central, mut central_rx) = air.central();
        let (mut peripheral, mut peripheral_rx) = air.peripheral();
        peripheral
            .start_advertising(&AdvertisingPayload::for_service(RELAY_SERVICE_UUID, None))
            .unwrap();

        air.fail_next_connect();
        let conn = central.connect(&PeerAddress::from(PERIPHERAL_ADDRESS)).unwrap();
        assert_eq!(
            drain(&mut central_rx),
            vec![HostEvent::Connected {
                handle: conn,
                status: HciStatus::CONNECTION_FAILED_TO_ESTABLISH
            }]
        );
        assert!(drain(&mut peripheral_rx).is_empty());
        assert_eq!(air.link(), None);
    }

    #[test]
    fn test_discovery_ends_with_terminator() {
        let (_air, mut central, mut central_rx, _peripheral, _peripheral_rx, conn) = linked();

        central
            .discover(
                conn,
                &DiscoverParams {
                    range: HandleRange::FULL,
                    uuid: Some(RELAY_SERVICE_UUID),
                    kind: DiscoveryKind::PrimaryService,
                },
            )
            .unwrap();

        let events = drain(&mut central_rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            HostEvent::DiscoveryResult {
                attribute: None,
                kind: DiscoveryKind::PrimaryService,
                ..
            }
        ));
    }

    #[test]
    fn test_subscribe_locates_ccc() {
        let (_air, mut central, mut central_rx, _peripheral, _peripheral_rx, conn) = linked();

        central
            .subscribe(
                conn,
                &SubscribeParams {
                    value_handle: AttributeHandle(3),
                    ccc_handle: None,
                    end_handle: AttributeHandle::LAST,
                    value: CccValue::Notify,
                },
            )
            .unwrap();

        assert_eq!(
            drain(&mut central_rx),
            vec![HostEvent::SubscribeComplete {
                handle: conn,
                status: AttStatus::SUCCESS,
                ccc_handle: Some(AttributeHandle(6)),
            }]
        );
    }

    #[test]
    fn test_notify_requires_subscriber() {
        let (_air, _central, _central_rx, mut peripheral, _peripheral_rx, conn) = linked();
        assert!(matches!(
            peripheral.notify(conn, SEND_CHARACTERISTIC_UUID, b"HI"),
            Err(Error::Host { code: EINVAL, .. })
        ));
    }

    #[test]
    fn test_write_routes_to_peripheral() {
        let (_air, mut central, _central_rx, _peripheral, mut peripheral_rx, conn) = linked();

        central
            .write_characteristic(conn, AttributeHandle(3), b"hi", WriteType::WithoutResponse)
            .unwrap();
        assert_eq!(
            drain(&mut peripheral_rx),
            vec![HostEvent::WriteReceived {
                handle: conn,
                attribute: AttributeHandle(3),
                payload: Some(Bytes::from_static(b"hi")),
            }]
        );

        // The send characteristic is read-only.
        assert!(central
            .write_characteristic(conn, AttributeHandle(5), b"hi", WriteType::WithoutResponse)
            .is_err());
    }

    #[test]
    fn test_disconnect_reaches_both_sides() {
        let (air, mut central, mut central_rx, _peripheral, mut peripheral_rx, conn) = linked();
        air.disconnect(HciStatus::REMOTE_USER_TERMINATED);

        let expected = HostEvent::Disconnected {
            handle: conn,
            reason: HciStatus::REMOTE_USER_TERMINATED,
        };
        assert_eq!(drain(&mut central_rx), vec![expected.clone()]);
        assert_eq!(drain(&mut peripheral_rx), vec![expected]);

        assert!(central
            .write_characteristic(conn, AttributeHandle(3), b"hi", WriteType::WithoutResponse)
            .is_err());

        // A second disconnect has nothing to drop.
        air.disconnect(HciStatus::REMOTE_USER_TERMINATED);
        assert!(drain(&mut central_rx).is_empty());
    }
}
