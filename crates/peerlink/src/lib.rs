//! # peerlink
//!
//! Reliable, reconnecting message channel to a single peer reachable through
//! a forwarded local TCP endpoint.
//!
//! ```no_run
//! use peerlink::{PeerClient, PeerConfig, PeerEvent};
//!
//! # async fn demo() -> peerlink::Result<()> {
//! let client = PeerClient::new(PeerConfig::default())?;
//! let mut events = client.take_events().expect("first call");
//! client.connect().await?;
//! client.send("hello").await?;
//! while let Some(event) = events.recv().await {
//!     if let PeerEvent::Frame(frame) = event {
//!         println!("{}", frame.payload_text());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod console;
pub mod error;
pub mod external;
pub mod link;

pub use config::PeerConfig;
pub use console::ConsoleCommand;
pub use error::{PeerError, Result};
pub use external::{DeviceDiscovery, DeviceId, ForwardHandle, InterfaceProbe, PortForwarder, StatusReporter, Tunnel};
pub use link::{
    CloseReason, Connection, ConnectionOptions, ConnectionState, ConnectionStats, HeartbeatConfig,
    PeerClient, PeerEvent, ReconnectConfig, ReconnectSupervisor,
};
pub use peerlink_proto as proto;
