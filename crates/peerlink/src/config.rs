//! Configuration for peerlink.
//!
//! Configuration is stored as JSON. Every field has a default, so a config
//! file only needs the values it changes.

use std::path::Path;
use std::time::Duration;

use peerlink_proto::{ClientIdentity, FrameCodec, HeaderProfile};
use serde::{Deserialize, Serialize};

use crate::error::{PeerError, endpoint};
use crate::link::{HeartbeatConfig, ReconnectConfig};

/// Serialize a [`Duration`] as whole milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as milliseconds.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    /// Deserialize from milliseconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    /// Same, for optional durations.
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        /// Serialize as milliseconds or null.
        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialize from milliseconds or null.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    2345
}

const fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_max_payload() -> u32 {
    u32::MAX
}

const fn default_event_buffer() -> usize {
    64
}

/// Peer link configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Host of the forwarded endpoint.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port of the forwarded endpoint.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bound on TCP connect.
    #[serde(
        rename = "connect_timeout_ms",
        default = "default_connect_timeout",
        with = "duration_ms"
    )]
    pub connect_timeout: Duration,

    /// Wait for a first frame after the handshake (None = don't wait).
    #[serde(
        rename = "handshake_reply_timeout_ms",
        default,
        with = "duration_ms::option"
    )]
    pub handshake_reply_timeout: Option<Duration>,

    /// Wire header layout.
    #[serde(default)]
    pub header_profile: HeaderProfile,

    /// Largest payload accepted in either direction.
    #[serde(default = "default_max_payload")]
    pub max_payload_size: u32,

    /// Capacity of the event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Identity announced in the handshake.
    #[serde(default)]
    pub identity: ClientIdentity,

    /// Heartbeat settings.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Reconnect settings.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout: default_connect_timeout(),
            handshake_reply_timeout: None,
            header_profile: HeaderProfile::default(),
            max_payload_size: default_max_payload(),
            event_buffer: default_event_buffer(),
            identity: ClientIdentity::default(),
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl PeerConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PeerError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PeerError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration from a JSON string.
    pub fn from_json(content: &str) -> Result<Self, PeerError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| PeerError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PeerError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PeerError> {
        if self.host.trim().is_empty() {
            return Err(PeerError::Config("host cannot be empty".to_string()));
        }

        if self.port == 0 {
            return Err(PeerError::Config(
                "port must be greater than 0".to_string(),
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(PeerError::Config(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.heartbeat.enabled && self.heartbeat.interval.is_zero() {
            return Err(PeerError::Config(
                "heartbeat.interval_ms must be greater than 0".to_string(),
            ));
        }

        let multiplier = self.reconnect.backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(PeerError::Config(
                "reconnect.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }

        if self.reconnect.max_delay < self.reconnect.delay {
            return Err(PeerError::Config(
                "reconnect.max_delay_ms must not be less than reconnect.delay_ms".to_string(),
            ));
        }

        if self.event_buffer == 0 {
            return Err(PeerError::Config(
                "event_buffer must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// `host:port` to dial.
    #[must_use]
    pub fn endpoint(&self) -> String {
        endpoint(&self.host, self.port)
    }

    /// Codec for the configured profile and payload limit.
    #[must_use]
    pub const fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.header_profile).with_max_payload(self.max_payload_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // Helper to create a temporary config file
    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("failed to write temp file");
        file
    }

    #[test]
    fn test_defaults() {
        let config = PeerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 2345);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.handshake_reply_timeout.is_none());
        assert_eq!(config.header_profile, HeaderProfile::Compact);
        assert_eq!(config.max_payload_size, u32::MAX);
        assert_eq!(config.event_buffer, 64);
        assert!(config.heartbeat.enabled);
        assert_eq!(config.heartbeat.interval, Duration::from_secs(5));
        assert!(config.reconnect.enabled);
        assert_eq!(config.reconnect.delay, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_empty_object() {
        let config = PeerConfig::from_json("{}").expect("should parse empty config");
        assert_eq!(config, PeerConfig::default());
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            "host": "192.168.2.1",
            "port": 2346,
            "connect_timeout_ms": 3000,
            "handshake_reply_timeout_ms": 1500,
            "header_profile": "extended",
            "max_payload_size": 1048576,
            "event_buffer": 8,
            "identity": { "client": "bridge", "capabilities": 3 },
            "heartbeat": { "enabled": true, "interval_ms": 1000, "frame_type": 200 },
            "reconnect": {
                "enabled": true,
                "delay_ms": 500,
                "max_delay_ms": 8000,
                "backoff_multiplier": 2.0,
                "max_attempts": 10
            }
        }"#;

        let config = PeerConfig::from_json(json).expect("should parse full config");
        assert_eq!(config.endpoint(), "192.168.2.1:2346");
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.handshake_reply_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.header_profile, HeaderProfile::Extended);
        assert_eq!(config.identity.client, "bridge");
        assert_eq!(config.identity.capabilities, 3);
        assert_eq!(config.heartbeat.frame_type, 200);
        assert_eq!(config.reconnect.max_attempts, Some(10));

        let codec = config.codec();
        assert_eq!(codec.profile(), HeaderProfile::Extended);
        assert_eq!(codec.max_payload(), 1_048_576);
    }

    #[test]
    fn test_load_from_file() {
        let file = create_temp_config(r#"{ "port": 4000 }"#);
        let config = PeerConfig::load(file.path()).expect("should load config");
        assert_eq!(config.port, 4000);
    }

    #[test]
    fn test_file_not_found() {
        let result = PeerConfig::load("/nonexistent/peerlink.json");
        assert!(matches!(result, Err(PeerError::Config(_))));
    }

    #[test]
    fn test_invalid_json_rejected() {
        let result = PeerConfig::from_json("{ port = 1 }");
        assert!(matches!(result, Err(PeerError::Config(_))));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("peerlink.json");
        let config = PeerConfig {
            port: 7000,
            handshake_reply_timeout: Some(Duration::from_millis(250)),
            ..Default::default()
        };
        config.save(&path).expect("save");
        let loaded = PeerConfig::load(&path).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_empty_host_rejected() {
        let config = PeerConfig {
            host: "  ".to_string(),
            ..Default::default()
        };
        let err = config.validate().expect_err("empty host");
        assert!(err.to_string().contains("host cannot be empty"));
    }

    #[test]
    fn test_zero_port_rejected() {
        let result = PeerConfig::from_json(r#"{ "port": 0 }"#);
        assert!(matches!(result, Err(PeerError::Config(msg)) if msg.contains("port")));
    }

    #[test]
    fn test_zero_connect_timeout_rejected() {
        let result = PeerConfig::from_json(r#"{ "connect_timeout_ms": 0 }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_heartbeat_interval_rejected_only_when_enabled() {
        assert!(PeerConfig::from_json(r#"{ "heartbeat": { "interval_ms": 0 } }"#).is_err());
        assert!(
            PeerConfig::from_json(r#"{ "heartbeat": { "enabled": false, "interval_ms": 0 } }"#)
                .is_ok()
        );
    }

    #[test]
    fn test_backoff_below_one_rejected() {
        let result = PeerConfig::from_json(r#"{ "reconnect": { "backoff_multiplier": 0.5 } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_max_delay_below_delay_rejected() {
        let result =
            PeerConfig::from_json(r#"{ "reconnect": { "delay_ms": 5000, "max_delay_ms": 100 } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_event_buffer_rejected() {
        let result = PeerConfig::from_json(r#"{ "event_buffer": 0 }"#);
        assert!(result.is_err());
    }
}
