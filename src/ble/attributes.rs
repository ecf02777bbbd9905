//! ATT attribute database.
//!
//! Lays a GATT service tree out on consecutive attribute handles the way a
//! server does (service declaration, characteristic declaration, value,
//! descriptors) and answers discovery and CCC lookups against that layout.
//! Host backends use it to serve the requests in [`crate::ble::host`].

use btleplug::api::CharPropFlags;
use uuid::Uuid;

use crate::ble::host::{
    AttributeHandle, DiscoverParams, DiscoveredAttribute, DiscoveryKind, HandleRange,
};

/// What an attribute declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Primary service declaration.
    PrimaryService,
    /// Characteristic declaration; the value follows at `value_handle`.
    Characteristic {
        /// Handle of the value attribute.
        value_handle: AttributeHandle,
        /// Characteristic properties.
        properties: CharPropFlags,
    },
    /// Characteristic value.
    Value,
    /// Client Characteristic Configuration descriptor.
    ClientConfig,
}

/// One attribute in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeEntry {
    /// Attribute handle.
    pub handle: AttributeHandle,
    /// Service or characteristic UUID this attribute belongs to.
    pub uuid: Uuid,
    /// What the attribute declares.
    pub kind: EntryKind,
}

/// Attribute table with handles assigned in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDatabase {
    entries: Vec<AttributeEntry>,
    next: u16,
}

impl Default for AttributeDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeDatabase {
    /// Create an empty database starting at handle `0x0001`.
    pub fn new() -> Self {
        Self::starting_at(AttributeHandle::FIRST)
    }

    /// Create an empty database whose first attribute gets `first`.
    pub fn starting_at(first: AttributeHandle) -> Self {
        Self {
            entries: Vec::new(),
            next: first.0,
        }
    }

    fn allocate(&mut self) -> AttributeHandle {
        let handle = AttributeHandle(self.next);
        self.next = self.next.saturating_add(1);
        handle
    }

    /// Append a primary service declaration.
    pub fn push_service(&mut self, uuid: Uuid) -> AttributeHandle {
        let handle = self.allocate();
        self.entries.push(AttributeEntry {
            handle,
            uuid,
            kind: EntryKind::PrimaryService,
        });
        handle
    }

    /// Append a characteristic declaration and its value; returns the value handle.
    pub fn push_characteristic(&mut self, uuid: Uuid, properties: CharPropFlags) -> AttributeHandle {
        let declaration = self.allocate();
        let value_handle = self.allocate();
        self.entries.push(AttributeEntry {
            handle: declaration,
            uuid,
            kind: EntryKind::Characteristic {
                value_handle,
                properties,
            },
        });
        self.entries.push(AttributeEntry {
            handle: value_handle,
            uuid,
            kind: EntryKind::Value,
        });
        value_handle
    }

    /// Append a CCC descriptor for the characteristic `uuid`.
    pub fn push_client_config(&mut self, uuid: Uuid) -> AttributeHandle {
        let handle = self.allocate();
        self.entries.push(AttributeEntry {
            handle,
            uuid,
            kind: EntryKind::ClientConfig,
        });
        handle
    }

    /// All attributes in handle order.
    pub fn entries(&self) -> &[AttributeEntry] {
        &self.entries
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the database is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an attribute by handle.
    pub fn get(&self, handle: AttributeHandle) -> Option<&AttributeEntry> {
        self.entries.iter().find(|entry| entry.handle == handle)
    }

    /// Value handle of the first characteristic with `uuid`.
    pub fn value_handle_of(&self, uuid: &Uuid) -> Option<AttributeHandle> {
        self.entries.iter().find_map(|entry| match entry.kind {
            EntryKind::Characteristic { value_handle, .. } if entry.uuid == *uuid => {
                Some(value_handle)
            }
            _ => None,
        })
    }

    /// Properties of the characteristic owning `value_handle`.
    pub fn properties_of(&self, value_handle: AttributeHandle) -> Option<CharPropFlags> {
        self.entries.iter().find_map(|entry| match entry.kind {
            EntryKind::Characteristic {
                value_handle: v,
                properties,
            } if v == value_handle => Some(properties),
            _ => None,
        })
    }

    /// First CCC descriptor inside `range`, with the characteristic it configures.
    pub fn client_config_in(&self, range: HandleRange) -> Option<(AttributeHandle, Uuid)> {
        self.entries
            .iter()
            .filter(|entry| range.contains(entry.handle))
            .find(|entry| entry.kind == EntryKind::ClientConfig)
            .map(|entry| (entry.handle, entry.uuid))
    }

    /// Run a discovery procedure, returning the matches in handle order.
    pub fn discover(&self, params: &DiscoverParams) -> Vec<DiscoveredAttribute> {
        self.entries
            .iter()
            .filter(|entry| params.range.contains(entry.handle))
            .filter(|entry| params.uuid.map_or(true, |uuid| uuid == entry.uuid))
            .filter_map(|entry| match (params.kind, entry.kind) {
                (DiscoveryKind::PrimaryService, EntryKind::PrimaryService) => {
                    Some(DiscoveredAttribute {
                        handle: entry.handle,
                        value_handle: entry.handle,
                        uuid: entry.uuid,
                    })
                }
                (DiscoveryKind::Characteristic, EntryKind::Characteristic { value_handle, .. }) => {
                    Some(DiscoveredAttribute {
                        handle: entry.handle,
                        value_handle,
                        uuid: entry.uuid,
                    })
                }
                _ => None,
            })
            .collect()
    }
}
