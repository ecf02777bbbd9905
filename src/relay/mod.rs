//! Message relay building blocks.
//!
//! This module contains:
//! - Bounded message frames and the uppercase transform
//! - The settle-delay throttle for outbound writes

pub mod frame;
pub mod throttle;

pub use frame::{
    uppercase_byte, uppercase_in_place, CentralFrame, MessageFrame, PeripheralFrame,
    CENTRAL_FRAME_MAX, PERIPHERAL_FRAME_MAX,
};
pub use throttle::SendThrottle;
