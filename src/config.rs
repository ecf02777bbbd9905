//! Relay configuration.

use std::time::Duration;

use crate::ble::uuids::ServiceDescriptor;

/// What the Peripheral does with an inbound frame above its bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OversizePolicy {
    /// Report the frame and drop it without notifying.
    #[default]
    Reject,
    /// Report the frame, then process its first bytes up to the bound.
    Truncate,
}

/// Configuration shared by both roles.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RelayConfig {
    /// Service and characteristic UUIDs.
    pub descriptor: ServiceDescriptor,
    /// Pause after each successful outbound write.
    pub settle_delay: Duration,
    /// Handling of oversize frames on the Peripheral.
    pub oversize_policy: OversizePolicy,
    /// Central only connects to advertisers listing the relay service.
    pub require_advertised_service: bool,
    /// Capacity of the outbound line queue.
    pub outbound_capacity: usize,
    /// Capacity of the status event channel.
    pub event_capacity: usize,
    /// Name the Peripheral advertises.
    pub device_name: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            descriptor: ServiceDescriptor::default(),
            settle_delay: Duration::from_millis(250),
            oversize_policy: OversizePolicy::Reject,
            require_advertised_service: true,
            outbound_capacity: 8,
            event_capacity: 64,
            device_name: Some("Uppercase Relay".to_string()),
        }
    }
}

impl RelayConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service descriptor.
    pub fn with_descriptor(mut self, descriptor: ServiceDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    /// Set the settle delay after each send.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the Peripheral oversize policy.
    pub fn with_oversize_policy(mut self, policy: OversizePolicy) -> Self {
        self.oversize_policy = policy;
        self
    }

    /// Connect to any connectable advertiser, not only those listing the service.
    pub fn with_require_advertised_service(mut self, required: bool) -> Self {
        self.require_advertised_service = required;
        self
    }

    /// Set the outbound queue capacity.
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    /// Set the status event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the advertised device name.
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }
}
