//! Handle index over a btleplug service tree.
//!
//! btleplug addresses characteristics by UUID and hides ATT handles. The
//! sessions work in handles, so after service discovery the backend lays the
//! peer's tree out on synthetic handles (see [`AttributeDatabase`]) and keeps
//! the btleplug [`Characteristic`] behind each value handle.

use btleplug::api::{CharPropFlags, Characteristic, Service};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::ble::attributes::AttributeDatabase;
use crate::ble::host::AttributeHandle;
use crate::ble::uuids::display_uuid;

/// Synthetic ATT layout of one peer plus the characteristic behind each value handle.
#[derive(Debug, Clone, Default)]
pub struct ServiceIndex {
    database: AttributeDatabase,
    characteristics: HashMap<AttributeHandle, Characteristic>,
}

impl ServiceIndex {
    /// Lay out a discovered service tree.
    ///
    /// Services and characteristics are taken in UUID order, so a given tree
    /// always maps to the same handles. Characteristics that can notify or
    /// indicate get a CCC descriptor after their value.
    pub fn build(services: &BTreeSet<Service>) -> Self {
        let mut database = AttributeDatabase::new();
        let mut characteristics = HashMap::new();

        for service in services.iter().filter(|service| service.primary) {
            database.push_service(service.uuid);
            trace!("Indexed service {}", display_uuid(&service.uuid));

            for characteristic in &service.characteristics {
                let value_handle =
                    database.push_characteristic(characteristic.uuid, characteristic.properties);
                if characteristic
                    .properties
                    .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
                {
                    database.push_client_config(characteristic.uuid);
                }
                characteristics.insert(value_handle, characteristic.clone());
            }
        }

        debug!(
            "Indexed {} attributes ({} characteristics)",
            database.len(),
            characteristics.len()
        );

        Self {
            database,
            characteristics,
        }
    }

    /// The synthetic attribute layout.
    pub fn database(&self) -> &AttributeDatabase {
        &self.database
    }

    /// The characteristic behind a value handle.
    pub fn characteristic(&self, value_handle: AttributeHandle) -> Option<&Characteristic> {
        self.characteristics.get(&value_handle)
    }

    /// The first characteristic with `uuid`.
    pub fn characteristic_by_uuid(&self, uuid: &Uuid) -> Option<&Characteristic> {
        self.database
            .value_handle_of(uuid)
            .and_then(|handle| self.characteristics.get(&handle))
    }

    /// Value handle of the first characteristic with `uuid`.
    pub fn value_handle_of(&self, uuid: &Uuid) -> Option<AttributeHandle> {
        self.database.value_handle_of(uuid)
    }
}
