//! Error types for the uppercase-ble crate.

use thiserror::Error;

use crate::ble::host::{AttStatus, HciStatus};

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// Operation requires a connection but no peer is connected.
    #[error("Peer not connected")]
    NotConnected,

    /// The host reported a failed connection attempt.
    #[error("Connection failed: {status}")]
    ConnectionFailed {
        /// Status code reported by the host.
        status: HciStatus,
    },

    /// A send was attempted before discovery resolved the target characteristic.
    #[error("Target characteristic not resolved")]
    NotResolved,

    /// The descriptor write that enables notifications failed.
    #[error("Subscription failed: {status}")]
    SubscriptionFailed {
        /// ATT status of the descriptor write.
        status: AttStatus,
    },

    /// A frame exceeded the fixed relay buffer size.
    #[error("Frame too large: {len} bytes (max: {max})")]
    FrameTooLarge {
        /// Length of the offending frame.
        len: usize,
        /// The bound that was exceeded.
        max: usize,
    },

    /// An inbound write carried no data buffer.
    #[error("Write carried no payload")]
    MissingPayload,

    /// A host stack request was refused.
    #[error("Host rejected {operation} (code {code})")]
    Host {
        /// The request that was refused.
        operation: &'static str,
        /// Errno-style status returned by the host.
        code: i32,
    },

    /// The outbound queue or the host event stream was closed.
    #[error("Channel closed")]
    ChannelClosed,

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a refused host request.
    pub(crate) fn host(operation: &'static str, code: i32) -> Self {
        Self::Host { operation, code }
    }
}

/// Errno-style codes carried by [`Error::Host`].
pub mod errno {
    /// Out of memory or no free slot.
    pub const ENOMEM: i32 = -12;
    /// Invalid argument.
    pub const EINVAL: i32 = -22;
    /// Operation already in progress.
    pub const EALREADY: i32 = -120;
    /// Not connected.
    pub const ENOTCONN: i32 = -128;
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_too_large_message() {
        let err = Error::FrameTooLarge { len: 40, max: 32 };
        assert_eq!(err.to_string(), "Frame too large: 40 bytes (max: 32)");
    }

    #[test]
    fn test_host_error_message() {
        let err = Error::host("discover", -22);
        assert_eq!(err.to_string(), "Host rejected discover (code -22)");
    }
}
