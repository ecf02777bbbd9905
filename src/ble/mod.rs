//! BLE module.
//!
//! This module contains the relay's Bluetooth Low Energy building blocks:
//! the host interface, the link manager, the discovery engine, the
//! subscription manager, the Peripheral's attribute table and the
//! btleplug-backed Central host.

pub mod attributes;
pub mod characteristics;
pub mod connection;
pub mod discovery;
pub mod host;
pub mod scanner;
pub mod service;
pub mod subscription;
pub mod uuids;

pub use attributes::AttributeDatabase;
pub use characteristics::ServiceIndex;
pub use connection::{ConnectionState, LinkManager};
pub use discovery::{AbandonReason, DiscoveryEngine, DiscoveryState};
pub use host::{
    AttributeHandle, CentralHost, ConnectionHandle, HostEvent, PeripheralHost, RoleHandler,
};
pub use scanner::BtleplugCentral;
pub use service::AttributeTable;
pub use subscription::{SubscriptionManager, SubscriptionRecord};
pub use uuids::*;
