//! Bounded message frames and the uppercase transform.
//!
//! A frame lives in a fixed, zero-filled buffer of `N` bytes. Bytes past the
//! frame length are always zero, so transforming the full window never
//! touches data left over from an earlier message.

use std::borrow::Cow;
use std::fmt;

use crate::error::{Error, Result};

/// Receive bound on the Central notify path, and its outbound line bound.
pub const CENTRAL_FRAME_MAX: usize = 32;

/// Bound on frames the Peripheral receives and notifies.
pub const PERIPHERAL_FRAME_MAX: usize = 16;

/// A frame as handled by the Central.
pub type CentralFrame = MessageFrame<CENTRAL_FRAME_MAX>;

/// A frame as handled by the Peripheral.
pub type PeripheralFrame = MessageFrame<PERIPHERAL_FRAME_MAX>;

/// Uppercase a single byte if it is an ASCII letter.
#[inline]
pub fn uppercase_byte(byte: u8) -> u8 {
    byte.to_ascii_uppercase()
}

/// Uppercase every ASCII letter in `bytes`, leaving all other bytes alone.
pub fn uppercase_in_place(bytes: &mut [u8]) {
    bytes.make_ascii_uppercase();
}

/// A byte frame with a hard maximum length of `N`.
#[derive(Clone, PartialEq, Eq)]
pub struct MessageFrame<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> MessageFrame<N> {
    /// Maximum frame length.
    pub const CAPACITY: usize = N;

    /// Copy `payload` into a new frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`] when `payload` is longer than `N`.
    pub fn new(payload: &[u8]) -> Result<Self> {
        if payload.len() > N {
            return Err(Error::FrameTooLarge {
                len: payload.len(),
                max: N,
            });
        }
        Ok(Self::truncated(payload))
    }

    /// Copy at most the first `N` bytes of `payload` into a new frame.
    pub fn truncated(payload: &[u8]) -> Self {
        let len = payload.len().min(N);
        let mut buf = [0u8; N];
        buf[..len].copy_from_slice(&payload[..len]);
        Self { buf, len }
    }

    /// Build a frame from a console line, dropping its line terminator.
    pub fn from_line(line: &str) -> Result<Self> {
        Self::new(line.trim_end_matches(&['\r', '\n'][..]).as_bytes())
    }

    /// Frame length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the frame is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The frame bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// The whole working buffer, including the zero tail.
    pub fn window(&self) -> &[u8; N] {
        &self.buf
    }

    /// Uppercase the ASCII letters across the whole working buffer.
    pub fn make_uppercase(&mut self) {
        uppercase_in_place(&mut self.buf);
    }

    /// The frame as text, cut at the first NUL.
    pub fn text(&self) -> Cow<'_, str> {
        let bytes = self.as_bytes();
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..end])
    }
}

impl<const N: usize> fmt::Debug for MessageFrame<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageFrame")
            .field("capacity", &N)
            .field("data", &self.text())
            .finish()
    }
}
