//! Peer link: connection lifecycle over a forwarded TCP endpoint.
//!
//! A [`Connection`] owns one stream and its receive and heartbeat tasks.
//! The [`ReconnectSupervisor`] keeps at most one connection alive and
//! retries after failures. [`PeerClient`] puts both behind one surface.

mod client;
mod connection;
mod events;
mod heartbeat;
mod reconnect;
mod state;
mod supervisor;

pub use client::PeerClient;
pub use connection::{CloseHook, Connection, ConnectionOptions, ConnectionStats};
pub use events::{CloseReason, PeerEvent};
pub use heartbeat::HeartbeatConfig;
pub use reconnect::ReconnectConfig;
pub use state::{AtomicConnectionState, ConnectionState};
pub use supervisor::ReconnectSupervisor;
