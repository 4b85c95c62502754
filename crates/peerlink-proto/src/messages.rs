//! JSON application messages carried in frame payloads.
//!
//! The codec never looks inside payloads. These types are the convention the
//! peers on either end of a link agree on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::frame::{Frame, NO_TAG, frame_types};

/// Messages exchanged between peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    /// Handshake identity record, sent first on every connection.
    Connect {
        /// Protocol version.
        version: String,
        /// Client name.
        client: String,
        /// Capability bitmask.
        capabilities: u32,
    },
    /// Device description.
    #[serde(rename = "deviceInfo")]
    DeviceInfo {
        /// USB vendor ID.
        vid: String,
        /// USB product ID.
        pid: String,
        /// Network interface name.
        interface: String,
        /// Time of the report.
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
    /// Link status.
    Status {
        /// Whether a physical link is present.
        connected: bool,
        /// Interface carrying the link.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interface: Option<String>,
        /// Time of the report.
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
    /// Keep-alive.
    Heartbeat {
        /// Time the heartbeat was sent.
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
}

impl PeerMessage {
    /// Status message stamped with the current time.
    #[must_use]
    pub fn status(interface: Option<String>) -> Self {
        Self::Status {
            connected: interface.is_some(),
            interface,
            timestamp: Utc::now(),
        }
    }

    /// Heartbeat stamped with the current time.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: Utc::now(),
        }
    }

    /// The frame type this message travels on.
    #[must_use]
    pub const fn frame_type(&self) -> u32 {
        match self {
            Self::Connect { .. } => frame_types::CONTROL,
            Self::DeviceInfo { .. } => frame_types::DEVICE_INFO,
            Self::Status { .. } => frame_types::STATUS,
            Self::Heartbeat { .. } => frame_types::HEARTBEAT,
        }
    }

    /// Encode as an untagged frame of the matching type.
    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        Frame::json(self.frame_type(), NO_TAG, self)
    }

    /// Decode from a frame payload. The frame type is not checked.
    pub fn from_frame(frame: &Frame) -> Result<Self, serde_json::Error> {
        frame.parse_json()
    }
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_client() -> String {
    "peerlink".to_string()
}

const fn default_handshake_type() -> u32 {
    frame_types::CONTROL
}

/// Identity announced in the handshake frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Client name.
    #[serde(default = "default_client")]
    pub client: String,
    /// Protocol version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Capability bitmask.
    #[serde(default)]
    pub capabilities: u32,
    /// Frame type used for the handshake.
    #[serde(default = "default_handshake_type")]
    pub frame_type: u32,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            client: default_client(),
            version: default_version(),
            capabilities: 0,
            frame_type: default_handshake_type(),
        }
    }
}

impl ClientIdentity {
    /// Create an identity with the given client name and defaults otherwise.
    #[must_use]
    pub fn new(client: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            ..Self::default()
        }
    }

    /// The `connect` message for this identity.
    #[must_use]
    pub fn to_message(&self) -> PeerMessage {
        PeerMessage::Connect {
            version: self.version.clone(),
            client: self.client.clone(),
            capabilities: self.capabilities,
        }
    }

    /// The handshake frame for this identity.
    pub fn handshake_frame(&self) -> Result<Frame, serde_json::Error> {
        Frame::json(self.frame_type, NO_TAG, &self.to_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    #[test]
    fn test_connect_wire_shape() {
        let msg = ClientIdentity::new("tester").to_message();
        let value: serde_json::Value = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(value["type"], "connect");
        assert_eq!(value["client"], "tester");
        assert_eq!(value["version"], "1.0");
        assert_eq!(value["capabilities"], 0);
    }

    #[test]
    fn test_device_info_uses_camel_case_tag() {
        let msg = PeerMessage::DeviceInfo {
            vid: "0x05AC".to_string(),
            pid: "0x12A8".to_string(),
            interface: "en0".to_string(),
            timestamp: at(1_700_000_000),
        };
        let json = serde_json::to_string(&msg).expect("serialize");
        assert!(json.contains(r#""type":"deviceInfo""#));
        assert!(json.contains(r#""timestamp":1700000000"#));
        assert_eq!(msg.frame_type(), frame_types::DEVICE_INFO);
    }

    #[test]
    fn test_status_from_interface() {
        let up = PeerMessage::status(Some("en5".to_string()));
        assert!(matches!(up, PeerMessage::Status { connected: true, .. }));

        let down = PeerMessage::status(None);
        let json = serde_json::to_string(&down).expect("serialize");
        assert!(json.contains(r#""connected":false"#));
        assert!(!json.contains("interface"));
    }

    #[test]
    fn test_frame_round_trip() {
        let msg = PeerMessage::Heartbeat {
            timestamp: at(42),
        };
        let frame = msg.to_frame().expect("encode");
        assert_eq!(frame.frame_type, frame_types::HEARTBEAT);
        assert_eq!(frame.tag, NO_TAG);
        assert_eq!(PeerMessage::from_frame(&frame).expect("decode"), msg);
    }

    #[test]
    fn test_parse_peer_status() {
        let frame = Frame::new(
            frame_types::STATUS,
            NO_TAG,
            &br#"{"type":"status","connected":true,"timestamp":5}"#[..],
        );
        let msg = PeerMessage::from_frame(&frame).expect("decode");
        assert_eq!(
            msg,
            PeerMessage::Status {
                connected: true,
                interface: None,
                timestamp: at(5),
            }
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        let frame = Frame::data(&br#"{"type":"bogus"}"#[..]);
        assert!(PeerMessage::from_frame(&frame).is_err());
    }

    #[test]
    fn test_identity_defaults_from_partial_json() {
        let identity: ClientIdentity =
            serde_json::from_str(r#"{"client":"ios-bridge"}"#).expect("parse");
        assert_eq!(identity.client, "ios-bridge");
        assert_eq!(identity.version, "1.0");
        assert_eq!(identity.frame_type, frame_types::CONTROL);
    }

    #[test]
    fn test_handshake_frame() {
        let frame = ClientIdentity::default().handshake_frame().expect("encode");
        assert_eq!(frame.frame_type, frame_types::CONTROL);
        let msg = PeerMessage::from_frame(&frame).expect("decode");
        assert!(matches!(msg, PeerMessage::Connect { ref client, .. } if client == "peerlink"));
    }
}
