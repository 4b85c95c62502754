//! Connection state types.

use std::sync::atomic::{AtomicU8, Ordering};

/// State of a peer connection.
///
/// A single [`Connection`](super::Connection) moves through
/// `Connecting → Handshaking → Connected → Closing → Disconnected`.
/// `Reconnecting` is only reported by the supervisor while a retry is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// No live stream.
    Disconnected = 0,
    /// Dialing the endpoint.
    Connecting = 1,
    /// Stream open, sending the handshake frame.
    Handshaking = 2,
    /// Handshake sent, background tasks running.
    Connected = 3,
    /// Close requested, background tasks stopping.
    Closing = 4,
    /// Waiting to retry after a failure.
    Reconnecting = 5,
}

impl ConnectionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Handshaking,
            3 => Self::Connected,
            4 => Self::Closing,
            5 => Self::Reconnecting,
            _ => Self::Disconnected,
        }
    }

    /// Lowercase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic wrapper for connection state.
#[derive(Debug)]
pub struct AtomicConnectionState(AtomicU8);

impl AtomicConnectionState {
    /// Create a new atomic state.
    #[must_use]
    pub const fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    /// Load the current state.
    #[must_use]
    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Store a new state.
    pub fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}
