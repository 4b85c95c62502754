//! Error types for the peerlink-proto crate.

use thiserror::Error;

/// Errors that can occur while encoding or decoding frames.
///
/// Any of these raised while reading means the byte stream can no longer be
/// trusted and the owning connection must be closed.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The stream ended partway through a frame.
    #[error("truncated frame: needed {needed} bytes, stream ended after {available}")]
    Truncated {
        /// Bytes required to complete the header or payload being read.
        needed: usize,
        /// Bytes that actually arrived.
        available: usize,
    },

    /// A payload does not fit the length field or the configured limit.
    #[error("payload of {len} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Offending payload length.
        len: u64,
        /// Largest accepted payload length.
        max: u64,
    },

    /// The redundant total-length field of an extended header disagrees with
    /// the payload length.
    #[error("header length mismatch: total length {total} but payload length {payload}")]
    LengthMismatch {
        /// Declared total length (header included).
        total: u32,
        /// Declared payload length.
        payload: u32,
    },

    /// Underlying stream failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
