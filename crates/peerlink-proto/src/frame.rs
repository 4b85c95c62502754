//! The frame value type and the well-known frame types.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ProtocolError;

/// Tag value meaning "untagged".
pub const NO_TAG: u32 = 0;

/// Frame types used by peerlink peers.
///
/// The codec does not interpret these; they are a convention between the
/// two ends of a channel.
pub mod frame_types {
    /// Handshake and control messages.
    pub const CONTROL: u32 = 100;
    /// Free-form application data.
    pub const DATA: u32 = 101;
    /// Device information reports.
    pub const DEVICE_INFO: u32 = 102;
    /// Link status reports.
    pub const STATUS: u32 = 103;
    /// Keep-alive.
    pub const HEARTBEAT: u32 = 104;
}

/// One length-delimited protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Application-defined payload kind.
    pub frame_type: u32,
    /// Correlation tag, [`NO_TAG`] when unused.
    pub tag: u32,
    /// Opaque payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame.
    #[must_use]
    pub fn new(frame_type: u32, tag: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            tag,
            payload: payload.into(),
        }
    }

    /// Create an untagged data frame.
    #[must_use]
    pub fn data(payload: impl Into<Bytes>) -> Self {
        Self::new(frame_types::DATA, NO_TAG, payload)
    }

    /// Create a frame whose payload is `value` serialized as JSON.
    pub fn json<T: Serialize>(frame_type: u32, tag: u32, value: &T) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_vec(value)?;
        Ok(Self::new(frame_type, tag, payload))
    }

    /// Deserialize the payload as JSON.
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Payload length as carried in the header.
    pub fn payload_len(&self) -> Result<u32, ProtocolError> {
        u32::try_from(self.payload.len()).map_err(|_| ProtocolError::PayloadTooLarge {
            len: self.payload.len() as u64,
            max: u64::from(u32::MAX),
        })
    }

    /// Payload interpreted as UTF-8 text, lossily.
    #[must_use]
    pub fn payload_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}
