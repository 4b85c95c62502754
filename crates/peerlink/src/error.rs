//! Error types for peerlink.

use std::net::SocketAddr;

use peerlink_proto::ProtocolError;
use thiserror::Error;

/// Errors that can occur in peer link operations.
#[derive(Debug, Error)]
pub enum PeerError {
    /// The TCP stream could not be established.
    #[error("connect to {addr} failed: {reason}")]
    Connect {
        /// Address that was dialed.
        addr: String,
        /// Why the attempt failed.
        reason: String,
    },

    /// The byte stream is corrupt or a frame was rejected.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A write to the peer failed; the connection is closing.
    #[error("send failed: {0}")]
    Send(String),

    /// No live connection.
    #[error("not connected")]
    NotConnected,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// External collaborator (device discovery, port forwarding) failed.
    #[error("tunnel error: {0}")]
    Tunnel(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PeerError {
    pub(crate) fn connect(addr: &str, reason: impl std::fmt::Display) -> Self {
        Self::Connect {
            addr: addr.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Returns true if retrying the operation later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Send(_) | Self::NotConnected | Self::Io(_)
        )
    }
}

/// Result alias for peerlink operations.
pub type Result<T> = std::result::Result<T, PeerError>;

/// Format a socket address the way log lines and errors show it.
pub(crate) fn endpoint(host: &str, port: u16) -> String {
    match host.parse::<std::net::IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port).to_string(),
        Err(_) => format!("{host}:{port}"),
    }
}
