// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # uppercase-ble
//!
//! A point-to-point Bluetooth Low Energy text relay.
//!
//! A **Central** scans for the relay service, connects, resolves the receive
//! characteristic, subscribes to notifications and sends console lines of up
//! to 32 bytes as writes without response. A **Peripheral** advertises the
//! service and answers every write of up to 16 bytes with the same text in
//! uppercase, notified back on its send characteristic.
//!
//! ## Architecture
//!
//! The sessions are host-agnostic state machines. They issue requests
//! through [`CentralHost`] / [`PeripheralHost`] and receive completions as
//! [`HostEvent`]s, routed through [`RoleHandler::dispatch`]:
//!
//! - **Link Manager** ([`ble::connection`]): the single active link
//! - **Discovery Engine** ([`ble::discovery`]): service, then characteristic
//! - **Subscription Manager** ([`ble::subscription`]): CCC write and notify screening
//! - **Service Host** ([`ble::service`]): the Peripheral's attribute table
//! - **Message Relay** ([`relay`], [`CentralSession::send_line`],
//!   [`PeripheralSession::receive_data`]): bounded frames and the uppercase transform
//!
//! Hosts: [`BtleplugCentral`] drives a real adapter; [`loopback::LoopbackAir`]
//! connects a Central and a Peripheral in memory.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use uppercase_ble::{
//!     outbound_channel, run_central, BtleplugCentral, CentralSession, RelayConfig, Result,
//!     StatusEvent, RELAY_SERVICE_UUID,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = RelayConfig::default();
//!     let (host, host_events) = BtleplugCentral::new(vec![RELAY_SERVICE_UUID]).await?;
//!     let (lines, outbound) = outbound_channel(config.outbound_capacity);
//!
//!     let mut session = CentralSession::new(host, config);
//!     let mut status = session.subscribe_events();
//!     session.start_central()?;
//!
//!     tokio::spawn(async move {
//!         while let Ok(event) = status.recv().await {
//!             if let StatusEvent::Subscribed { .. } = event {
//!                 let _ = lines.send_line("hello").await;
//!             }
//!             if let StatusEvent::MessageReceived { text } = event {
//!                 println!("{}", text);
//!             }
//!         }
//!     });
//!
//!     run_central(&mut session, host_events, outbound).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! btleplug only implements the Central role. The Peripheral runs on any
//! [`PeripheralHost`] implementation, such as the loopback host.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for configuration and identifiers

// Public modules
pub mod ble;
pub mod central;
pub mod config;
pub mod error;
pub mod events;
pub mod loopback;
pub mod peripheral;
pub mod relay;
pub mod runtime;
pub mod session;

// Re-exports for convenience
pub use ble::host::{
    AttributeHandle, CentralHost, ConnectionHandle, HciStatus, HostEvent, PeripheralHost,
    RoleHandler,
};
pub use ble::scanner::BtleplugCentral;
pub use ble::uuids::{
    ServiceDescriptor, RECEIVE_CHARACTERISTIC_UUID, RELAY_SERVICE_UUID, SEND_CHARACTERISTIC_UUID,
};
pub use central::CentralSession;
pub use config::{OversizePolicy, RelayConfig};
pub use error::{Error, Result};
pub use events::StatusEvent;
pub use peripheral::PeripheralSession;
pub use relay::{CentralFrame, MessageFrame, PeripheralFrame};
pub use runtime::{
    host_event_channel, outbound_channel, run_central, run_peripheral, LineSender, OutboundQueue,
};
pub use session::{Role, SessionState};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<RelayConfig>();
        let _ = std::any::TypeId::of::<StatusEvent>();
        let _ = std::any::TypeId::of::<SessionState>();
        let _ = std::any::TypeId::of::<CentralFrame>();
        let _ = std::any::TypeId::of::<LineSender>();
        let _ = std::any::TypeId::of::<loopback::LoopbackAir>();
    }

    #[test]
    fn test_protocol_constants() {
        assert_eq!(relay::CENTRAL_FRAME_MAX, 32);
        assert_eq!(relay::PERIPHERAL_FRAME_MAX, 16);
        assert_eq!(ServiceDescriptor::default().service, RELAY_SERVICE_UUID);
    }
}
