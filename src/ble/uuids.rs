//! BLE Service and Characteristic UUIDs.
//!
//! Contains the UUID constants of the relay service and the helpers for
//! moving between 16-bit short UUIDs and full 128-bit UUIDs.

use uuid::Uuid;

/// Bluetooth Base UUID (`00000000-0000-1000-8000-00805f9b34fb`).
pub const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit short UUID onto the Bluetooth Base UUID.
pub const fn uuid16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Recover the 16-bit short form of a UUID built on the Bluetooth Base UUID.
pub fn as_uuid16(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    if value & !(0xFFFF_u128 << 96) == BLUETOOTH_BASE_UUID {
        Some((value >> 96) as u16)
    } else {
        None
    }
}

/// Format a UUID in its short form when it has one.
pub fn display_uuid(uuid: &Uuid) -> String {
    match as_uuid16(uuid) {
        Some(short) => format!("0x{:04X}", short),
        None => uuid.to_string(),
    }
}

// Uppercase relay service
/// Short UUID of the relay service.
pub const RELAY_SERVICE_UUID16: u16 = 0xAB01;
/// Short UUID of the receive characteristic (Central writes, Peripheral receives).
pub const RECEIVE_CHARACTERISTIC_UUID16: u16 = 0xAB02;
/// Short UUID of the send characteristic (Peripheral notifies).
pub const SEND_CHARACTERISTIC_UUID16: u16 = 0xAB03;

/// Relay service UUID.
pub const RELAY_SERVICE_UUID: Uuid = uuid16(RELAY_SERVICE_UUID16);
/// Receive characteristic UUID (write without response).
pub const RECEIVE_CHARACTERISTIC_UUID: Uuid = uuid16(RECEIVE_CHARACTERISTIC_UUID16);
/// Send characteristic UUID (read, notify via its CCC descriptor).
pub const SEND_CHARACTERISTIC_UUID: Uuid = uuid16(SEND_CHARACTERISTIC_UUID16);

/// The service and characteristics both roles agree on.
///
/// Constant for the life of the process once a session is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceDescriptor {
    /// Primary service UUID.
    pub service: Uuid,
    /// Characteristic the Central writes to and the Peripheral receives on.
    pub receive: Uuid,
    /// Characteristic the Peripheral notifies from.
    pub send: Uuid,
}

impl ServiceDescriptor {
    /// Build a descriptor from 16-bit short UUIDs.
    pub const fn from_short(service: u16, receive: u16, send: u16) -> Self {
        Self {
            service: uuid16(service),
            receive: uuid16(receive),
            send: uuid16(send),
        }
    }
}

impl Default for ServiceDescriptor {
    fn default() -> Self {
        Self::from_short(
            RELAY_SERVICE_UUID16,
            RECEIVE_CHARACTERISTIC_UUID16,
            SEND_CHARACTERISTIC_UUID16,
        )
    }
}
