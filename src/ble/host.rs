//! Interface to the BLE host stack.
//!
//! The radio, link layer and ATT/GATT encoding live in the host. This module
//! describes what the sessions ask of it ([`CentralHost`], [`PeripheralHost`])
//! and what it reports back ([`HostEvent`]). Requests return as soon as the
//! host has accepted them; their completions arrive later as events, one at a
//! time, and are routed to a session through [`RoleHandler::dispatch`].

use btleplug::api::WriteType;
use bytes::Bytes;
use std::fmt;
use tracing::trace;
use uuid::Uuid;

use crate::ble::service::AttributeTable;
use crate::error::Result;
use crate::session::Role;

/// Opaque identifier of a link, assigned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionHandle(pub u16);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// ATT attribute handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttributeHandle(pub u16);

impl AttributeHandle {
    /// Lowest valid attribute handle.
    pub const FIRST: Self = Self(0x0001);
    /// Highest valid attribute handle.
    pub const LAST: Self = Self(0xFFFF);

    /// The handle immediately after this one, if any.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl fmt::Display for AttributeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Inclusive window of attribute handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleRange {
    /// First handle in the window.
    pub start: AttributeHandle,
    /// Last handle in the window.
    pub end: AttributeHandle,
}

impl HandleRange {
    /// The whole attribute table.
    pub const FULL: Self = Self {
        start: AttributeHandle::FIRST,
        end: AttributeHandle::LAST,
    };

    /// Window from just after `handle` to the top of the table.
    ///
    /// Returns `None` when `handle` is already the last handle.
    pub fn after(handle: AttributeHandle) -> Option<Self> {
        handle.next().map(|start| Self {
            start,
            end: AttributeHandle::LAST,
        })
    }

    /// Check if a handle falls inside the window.
    pub fn contains(&self, handle: AttributeHandle) -> bool {
        self.start <= handle && handle <= self.end
    }
}

/// HCI status code, used for connection results and disconnect reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HciStatus(pub u8);

impl HciStatus {
    /// Success.
    pub const SUCCESS: Self = Self(0x00);
    /// Connection timeout.
    pub const CONNECTION_TIMEOUT: Self = Self(0x08);
    /// Remote user terminated the connection.
    pub const REMOTE_USER_TERMINATED: Self = Self(0x13);
    /// Connection terminated by the local host.
    pub const LOCAL_HOST_TERMINATED: Self = Self(0x16);
    /// Connection failed to be established.
    pub const CONNECTION_FAILED_TO_ESTABLISH: Self = Self(0x3E);

    /// Check if the status reports success.
    pub fn is_success(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for HciStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

/// ATT error code reported by a write completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttStatus(pub u8);

impl AttStatus {
    /// Success.
    pub const SUCCESS: Self = Self(0x00);
    /// Write not permitted.
    pub const WRITE_NOT_PERMITTED: Self = Self(0x03);
    /// Attribute not found.
    pub const ATTRIBUTE_NOT_FOUND: Self = Self(0x0A);
    /// Unlikely error.
    pub const UNLIKELY_ERROR: Self = Self(0x0E);

    /// Check if the status reports success.
    pub fn is_success(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for AttStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

/// Address of a remote device, formatted by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeerAddress(pub String);

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(address: &str) -> Self {
        Self(address.to_string())
    }
}

/// Scan mode requested from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Listen only, no scan requests.
    Passive,
    /// Send scan requests for scan responses.
    Active,
}

/// Advertising PDU type of a received advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdvertisingKind {
    /// Connectable and scannable undirected (ADV_IND).
    #[default]
    ConnectableUndirected,
    /// Connectable directed (ADV_DIRECT_IND).
    ConnectableDirected,
    /// Scannable undirected (ADV_SCAN_IND).
    ScannableUndirected,
    /// Non-connectable undirected (ADV_NONCONN_IND).
    NonConnectable,
    /// Scan response.
    ScanResponse,
}

impl AdvertisingKind {
    /// Check if a connection may be initiated in response.
    pub fn is_connectable(&self) -> bool {
        matches!(
            self,
            Self::ConnectableUndirected | Self::ConnectableDirected | Self::ScanResponse
        )
    }
}

/// A device-found report from a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    /// Advertiser address.
    pub address: PeerAddress,
    /// Signal strength in dBm.
    pub rssi: i16,
    /// Advertising PDU type.
    pub kind: AdvertisingKind,
    /// Service UUIDs listed in the advertising data.
    pub services: Vec<Uuid>,
    /// Local name, if advertised.
    pub local_name: Option<String>,
}

/// Advertising data a Peripheral asks the host to broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingPayload {
    /// AD flags byte.
    pub flags: u8,
    /// Complete local name, if any.
    pub local_name: Option<String>,
    /// Complete list of 16-bit service UUIDs.
    pub service_uuids: Vec<Uuid>,
}

impl AdvertisingPayload {
    /// LE General Discoverable Mode.
    pub const FLAG_GENERAL_DISCOVERABLE: u8 = 0x02;
    /// BR/EDR Not Supported.
    pub const FLAG_NO_BREDR: u8 = 0x04;

    /// General-discoverable, LE-only advertisement listing one service.
    pub fn for_service(service: Uuid, local_name: Option<String>) -> Self {
        Self {
            flags: Self::FLAG_GENERAL_DISCOVERABLE | Self::FLAG_NO_BREDR,
            local_name,
            service_uuids: vec![service],
        }
    }
}

/// Kind of GATT discovery procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryKind {
    /// Discover primary services (by UUID when a filter is given).
    PrimaryService,
    /// Discover characteristic declarations.
    Characteristic,
}

/// A discovery request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoverParams {
    /// Handle window to search.
    pub range: HandleRange,
    /// Only report attributes with this UUID.
    pub uuid: Option<Uuid>,
    /// Procedure to run.
    pub kind: DiscoveryKind,
}

/// One attribute reported by a discovery procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredAttribute {
    /// Handle of the declaration.
    pub handle: AttributeHandle,
    /// Handle of the characteristic value (the declaration handle for services).
    pub value_handle: AttributeHandle,
    /// Service or characteristic UUID.
    pub uuid: Uuid,
}

/// Value written to a Client Characteristic Configuration descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CccValue {
    /// Notifications and indications off.
    Disabled,
    /// Notifications on.
    Notify,
    /// Indications on.
    Indicate,
}

impl CccValue {
    /// Little-endian descriptor bits.
    pub fn bits(&self) -> u16 {
        match self {
            Self::Disabled => 0x0000,
            Self::Notify => 0x0001,
            Self::Indicate => 0x0002,
        }
    }
}

/// A request to write a CCC descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeParams {
    /// Value handle of the characteristic to subscribe to.
    pub value_handle: AttributeHandle,
    /// CCC handle; `None` asks the host to locate it.
    pub ccc_handle: Option<AttributeHandle>,
    /// Upper bound of the CCC search window.
    pub end_handle: AttributeHandle,
    /// Descriptor value to write.
    pub value: CccValue,
}

/// A callback delivered by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// A scan reported an advertiser.
    DeviceFound(Advertisement),
    /// Scanning could not be started or stopped unexpectedly.
    ScanFailed {
        /// Host description of the failure.
        reason: String,
    },
    /// A connection attempt finished.
    Connected {
        /// Link the result belongs to.
        handle: ConnectionHandle,
        /// Zero on success.
        status: HciStatus,
    },
    /// A link went down.
    Disconnected {
        /// Link that went down.
        handle: ConnectionHandle,
        /// Reason code.
        reason: HciStatus,
    },
    /// One step of a discovery procedure.
    DiscoveryResult {
        /// Link the procedure runs on.
        handle: ConnectionHandle,
        /// Procedure this result belongs to.
        kind: DiscoveryKind,
        /// The attribute found, or `None` once the window is exhausted.
        attribute: Option<DiscoveredAttribute>,
    },
    /// A CCC descriptor write completed.
    SubscribeComplete {
        /// Link the write ran on.
        handle: ConnectionHandle,
        /// ATT status of the write.
        status: AttStatus,
        /// Descriptor handle the host wrote, when it got that far.
        ccc_handle: Option<AttributeHandle>,
    },
    /// A notification arrived for a subscription.
    Notification {
        /// Link the notification arrived on.
        handle: ConnectionHandle,
        /// Value handle of the notifying characteristic.
        value_handle: AttributeHandle,
        /// Notified value.
        payload: Bytes,
    },
    /// A peer wrote to a local characteristic.
    WriteReceived {
        /// Link the write arrived on.
        handle: ConnectionHandle,
        /// Value handle that was written.
        attribute: AttributeHandle,
        /// Written data; `None` when the host supplied no buffer.
        payload: Option<Bytes>,
    },
    /// A write the host accepted failed on the link afterwards.
    WriteFailed {
        /// Link the write ran on.
        handle: ConnectionHandle,
        /// Value handle that was written.
        value_handle: AttributeHandle,
        /// Host description of the failure.
        reason: String,
    },
}

/// Requests a Central session issues to its host.
#[cfg_attr(test, mockall::automock)]
pub trait CentralHost {
    /// Start scanning for advertisers.
    fn start_scanning(&mut self, mode: ScanMode) -> Result<()>;

    /// Stop scanning.
    fn stop_scanning(&mut self) -> Result<()>;

    /// Initiate a connection. The outcome arrives as [`HostEvent::Connected`].
    fn connect(&mut self, address: &PeerAddress) -> Result<ConnectionHandle>;

    /// Start a discovery procedure. Results arrive as [`HostEvent::DiscoveryResult`].
    fn discover(&mut self, conn: ConnectionHandle, params: &DiscoverParams) -> Result<()>;

    /// Write a CCC descriptor. Completion arrives as [`HostEvent::SubscribeComplete`].
    fn subscribe(&mut self, conn: ConnectionHandle, params: &SubscribeParams) -> Result<()>;

    /// Write a characteristic value.
    fn write_characteristic(
        &mut self,
        conn: ConnectionHandle,
        value_handle: AttributeHandle,
        payload: &[u8],
        write_type: WriteType,
    ) -> Result<()>;
}

/// Requests a Peripheral session issues to its host.
#[cfg_attr(test, mockall::automock)]
pub trait PeripheralHost {
    /// Start connectable advertising.
    fn start_advertising(&mut self, payload: &AdvertisingPayload) -> Result<()>;

    /// Register a static attribute table.
    fn register_service(&mut self, table: &AttributeTable) -> Result<()>;

    /// Notify the value of a local characteristic to a connected peer.
    fn notify(&mut self, conn: ConnectionHandle, characteristic: Uuid, payload: &[u8])
        -> Result<()>;
}

/// Callback surface of a session, one implementation per role.
///
/// Callbacks a role does not care about default to a trace-level no-op.
pub trait RoleHandler {
    /// The role this handler plays.
    fn role(&self) -> Role;

    /// A scan reported an advertiser.
    fn on_device_found(&mut self, advertisement: &Advertisement) {
        trace!(role = %self.role(), "Ignoring advertisement from {}", advertisement.address);
    }

    /// Scanning failed inside the host.
    fn on_scan_failed(&mut self, reason: &str) {
        trace!(role = %self.role(), "Ignoring scan failure: {}", reason);
    }

    /// A connection attempt finished.
    fn on_connected(&mut self, handle: ConnectionHandle, status: HciStatus);

    /// A link went down.
    fn on_disconnected(&mut self, handle: ConnectionHandle, reason: HciStatus);

    /// One step of a discovery procedure.
    fn on_discovery_result(
        &mut self,
        handle: ConnectionHandle,
        kind: DiscoveryKind,
        _attribute: Option<&DiscoveredAttribute>,
    ) {
        trace!(role = %self.role(), "Ignoring {:?} discovery result on {}", kind, handle);
    }

    /// A CCC descriptor write completed.
    fn on_subscribe_complete(
        &mut self,
        handle: ConnectionHandle,
        status: AttStatus,
        _ccc_handle: Option<AttributeHandle>,
    ) {
        trace!(role = %self.role(), "Ignoring subscribe completion {} on {}", status, handle);
    }

    /// A notification arrived.
    fn on_notification(
        &mut self,
        handle: ConnectionHandle,
        value_handle: AttributeHandle,
        _payload: &[u8],
    ) {
        trace!(role = %self.role(), "Ignoring notification from {} on {}", value_handle, handle);
    }

    /// A peer wrote to a local characteristic.
    fn on_write_received(
        &mut self,
        handle: ConnectionHandle,
        attribute: AttributeHandle,
        _payload: Option<&[u8]>,
    ) {
        trace!(role = %self.role(), "Ignoring write to {} on {}", attribute, handle);
    }

    /// An accepted write failed later on the link.
    fn on_write_failed(
        &mut self,
        handle: ConnectionHandle,
        value_handle: AttributeHandle,
        reason: &str,
    ) {
        trace!(
            role = %self.role(),
            "Ignoring failed write to {} on {}: {}",
            value_handle,
            handle,
            reason
        );
    }

    /// Route one host event to the matching callback.
    fn dispatch(&mut self, event: HostEvent) {
        match event {
            HostEvent::DeviceFound(advertisement) => self.on_device_found(&advertisement),
            HostEvent::ScanFailed { reason } => self.on_scan_failed(&reason),
            HostEvent::Connected { handle, status } => self.on_connected(handle, status),
            HostEvent::Disconnected { handle, reason } => self.on_disconnected(handle, reason),
            HostEvent::DiscoveryResult {
                handle,
                kind,
                attribute,
            } => self.on_discovery_result(handle, kind, attribute.as_ref()),
            HostEvent::SubscribeComplete {
                handle,
                status,
                ccc_handle,
            } => self.on_subscribe_complete(handle, status, ccc_handle),
            HostEvent::Notification {
                handle,
                value_handle,
                payload,
            } => self.on_notification(handle, value_handle, &payload),
            HostEvent::WriteReceived {
                handle,
                attribute,
                payload,
            } => self.on_write_received(handle, attribute, payload.as_deref()),
            HostEvent::WriteFailed {
                handle,
                value_handle,
                reason,
            } => self.on_write_failed(handle, value_handle, &reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_range_after() {
        let range = HandleRange::after(AttributeHandle(0x0010)).unwrap();
        assert_eq!(range.start, AttributeHandle(0x0011));
        assert_eq!(range.end, AttributeHandle::LAST);
        assert!(range.contains(AttributeHandle(0x0011)));
        assert!(!range.contains(AttributeHandle(0x0010)));

        assert!(HandleRange::after(AttributeHandle::LAST).is_none());
    }

    #[test]
    fn test_status_success() {
        assert!(HciStatus::SUCCESS.is_success());
        assert!(!HciStatus::CONNECTION_FAILED_TO_ESTABLISH.is_success());
        assert!(AttStatus::SUCCESS.is_success());
        assert!(!AttStatus::UNLIKELY_ERROR.is_success());
        assert_eq!(HciStatus::REMOTE_USER_TERMINATED.to_string(), "0x13");
    }

    #[test]
    fn test_advertising_kind_connectable() {
        assert!(AdvertisingKind::ConnectableUndirected.is_connectable());
        assert!(!AdvertisingKind::NonConnectable.is_connectable());
        assert!(!AdvertisingKind::ScannableUndirected.is_connectable());
    }

    #[test]
    fn test_ccc_bits() {
        assert_eq!(CccValue::Notify.bits(), 0x0001);
        assert_eq!(CccValue::Indicate.bits(), 0x0002);
        assert_eq!(CccValue::Disabled.bits(), 0x0000);
    }

    struct Recorder {
        seen: Vec<&'static str>,
    }

    impl RoleHandler for Recorder {
        fn role(&self) -> Role {
            Role::Central
        }

        fn on_connected(&mut self, _handle: ConnectionHandle, _status: HciStatus) {
            self.seen.push("connected");
        }

        fn on_disconnected(&mut self, _handle: ConnectionHandle, _reason: HciStatus) {
            self.seen.push("disconnected");
        }

        fn on_write_received(
            &mut self,
            _handle: ConnectionHandle,
            _attribute: AttributeHandle,
            payload: Option<&[u8]>,
        ) {
            assert!(payload.is_none());
            self.seen.push("write");
        }
    }

    #[test]
    fn test_dispatch_routes_events() {
        let mut recorder = Recorder { seen: Vec::new() };
        let handle = ConnectionHandle(1);

        recorder.dispatch(HostEvent::Connected {
            handle,
            status: HciStatus::SUCCESS,
        });
        recorder.dispatch(HostEvent::Notification {
            handle,
            value_handle: AttributeHandle(3),
            payload: Bytes::from_static(b"ignored"),
        });
        recorder.dispatch(HostEvent::WriteReceived {
            handle,
            attribute: AttributeHandle(3),
            payload: None,
        });
        recorder.dispatch(HostEvent::Disconnected {
            handle,
            reason: HciStatus::REMOTE_USER_TERMINATED,
        });

        assert_eq!(recorder.seen, vec!["connected", "write", "disconnected"]);
    }
}
