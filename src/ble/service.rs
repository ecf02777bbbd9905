//! Relay GATT service definition (Peripheral).
//!
//! A static table of four attributes: the primary service, the write-only
//! receive characteristic, the readable send characteristic and the CCC
//! descriptor that lets a peer enable notifications on the send
//! characteristic.

use btleplug::api::CharPropFlags;
use uuid::Uuid;

use crate::ble::attributes::AttributeDatabase;
use crate::ble::host::AttributeHandle;
use crate::ble::uuids::{display_uuid, ServiceDescriptor};

/// Access permissions of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions {
    /// Peers may read the attribute.
    pub read: bool,
    /// Peers may write the attribute.
    pub write: bool,
}

impl Permissions {
    /// Read only.
    pub const READ: Self = Self {
        read: true,
        write: false,
    };
    /// Write only.
    pub const WRITE: Self = Self {
        read: false,
        write: true,
    };
}

/// One entry of a static attribute table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    /// Primary service declaration.
    PrimaryService {
        /// Service UUID.
        uuid: Uuid,
    },
    /// Characteristic declaration with its value.
    Characteristic {
        /// Characteristic UUID.
        uuid: Uuid,
        /// Declared properties.
        properties: CharPropFlags,
        /// Access permissions of the value.
        permissions: Permissions,
    },
    /// CCC descriptor of the preceding characteristic.
    ClientConfig {
        /// Access permissions of the descriptor.
        permissions: Permissions,
    },
}

/// A static attribute table, registered once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeTable {
    attributes: Vec<Attribute>,
}

impl AttributeTable {
    /// The relay service table for `descriptor`, in fixed order.
    pub fn relay(descriptor: &ServiceDescriptor) -> Self {
        Self {
            attributes: vec![
                Attribute::PrimaryService {
                    uuid: descriptor.service,
                },
                Attribute::Characteristic {
                    uuid: descriptor.receive,
                    properties: CharPropFlags::WRITE_WITHOUT_RESPONSE,
                    permissions: Permissions::WRITE,
                },
                Attribute::Characteristic {
                    uuid: descriptor.send,
                    properties: CharPropFlags::READ,
                    permissions: Permissions::READ,
                },
                Attribute::ClientConfig {
                    permissions: Permissions::WRITE,
                },
            ],
        }
    }

    /// The table entries in order.
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// UUID of the service this table declares.
    pub fn service_uuid(&self) -> Option<Uuid> {
        self.attributes.iter().find_map(|attribute| match attribute {
            Attribute::PrimaryService { uuid } => Some(*uuid),
            _ => None,
        })
    }

    /// Lay the table out on attribute handles starting at `first`.
    ///
    /// Each CCC descriptor is bound to the characteristic before it.
    pub fn layout(&self, first: AttributeHandle) -> AttributeDatabase {
        let mut db = AttributeDatabase::starting_at(first);
        let mut last_characteristic = None;

        for attribute in &self.attributes {
            match attribute {
                Attribute::PrimaryService { uuid } => {
                    db.push_service(*uuid);
                }
                Attribute::Characteristic {
                    uuid, properties, ..
                } => {
                    db.push_characteristic(*uuid, *properties);
                    last_characteristic = Some(*uuid);
                }
                Attribute::ClientConfig { .. } => {
                    if let Some(uuid) = last_characteristic {
                        db.push_client_config(uuid);
                    }
                }
            }
        }

        db
    }
}

impl std::fmt::Display for AttributeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.service_uuid() {
            Some(uuid) => write!(
                f,
                "service {} ({} attributes)",
                display_uuid(&uuid),
                self.attributes.len()
            ),
            None => write!(f, "table ({} attributes)", self.attributes.len()),
        }
    }
}
