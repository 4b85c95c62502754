//! Link event types.

use std::net::SocketAddr;
use std::time::Duration;

use peerlink_proto::Frame;

/// Why a connection was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` or `disconnect()` was called.
    Requested,
    /// The peer closed the stream on a frame boundary.
    PeerClosed,
    /// The inbound stream was corrupt or truncated.
    Protocol(String),
    /// A write failed.
    SendFailed(String),
}

impl CloseReason {
    /// Whether the supervisor should try to restore the link.
    #[must_use]
    pub const fn should_reconnect(&self) -> bool {
        !matches!(self, Self::Requested)
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => write!(f, "closed by request"),
            Self::PeerClosed => write!(f, "peer closed the connection"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::SendFailed(e) => write!(f, "send failed: {e}"),
        }
    }
}

/// Events emitted by the peer link.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Handshake sent, link is up.
    Connected {
        /// Remote address of the stream.
        addr: SocketAddr,
    },
    /// Frame received from the peer.
    Frame(Frame),
    /// Link lost or closed.
    Disconnected {
        /// Reason for disconnection.
        reason: CloseReason,
    },
    /// Waiting before the next connect attempt.
    Reconnecting {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// The attempt cap was reached; no more retries.
    ReconnectFailed {
        /// Attempts made.
        attempts: u32,
        /// Error from the last attempt.
        last_error: String,
    },
    /// Auto-reconnect was disabled while a retry was pending.
    ReconnectStopped,
}
