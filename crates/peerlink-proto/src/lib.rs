//! # peerlink-proto
//!
//! Wire protocol for peerlink peer channels.
//!
//! A frame is a big-endian header followed by an opaque payload:
//!
//! ```text
//! compact  (12 bytes): frame_type:u32 | tag:u32 | length:u32 | payload
//! extended (16 bytes): total_length:u32 | frame_type:u32 | tag:u32 | length:u32 | payload
//! ```
//!
//! The stream carries no delimiters. Once a reader loses alignment the only
//! recovery is a fresh connection, so decode errors are surfaced, never skipped.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod error;
pub mod frame;
pub mod messages;
pub mod reader;

pub use codec::{FrameCodec, Header, HeaderProfile};
pub use error::ProtocolError;
pub use frame::{Frame, frame_types, NO_TAG};
pub use messages::{ClientIdentity, PeerMessage};
pub use reader::{FrameReader, read_frame};

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
