//! Heartbeat/keepalive mechanism.

use std::time::Duration;

use peerlink_proto::{Frame, NO_TAG, PeerMessage, frame_types};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use super::connection::Connection;
use crate::config::duration_ms;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Send heartbeats while connected.
    pub enabled: bool,
    /// Interval between heartbeats.
    #[serde(rename = "interval_ms", with = "duration_ms")]
    pub interval: Duration,
    /// Frame type carrying the heartbeat.
    pub frame_type: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(5),
            frame_type: frame_types::HEARTBEAT,
        }
    }
}

impl HeartbeatConfig {
    /// Build one heartbeat frame.
    pub fn frame(&self) -> Result<Frame, serde_json::Error> {
        Frame::json(self.frame_type, NO_TAG, &PeerMessage::heartbeat())
    }
}

/// Send heartbeats on `conn` until it starts closing.
///
/// The first heartbeat goes out one interval after the task starts. A failed
/// send closes the connection through [`Connection::send`], so this task only
/// has to stop.
pub(crate) async fn run_heartbeat(conn: Connection, config: HeartbeatConfig) {
    if config.interval.is_zero() {
        warn!(conn = conn.id(), "heartbeat interval is zero, heartbeat disabled");
        return;
    }
    let shutdown = conn.shutdown_token();
    let mut ticker = tokio::time::interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let frame = match config.frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to build heartbeat frame");
                break;
            }
        };

        match conn.send(&frame).await {
            Ok(()) => {
                conn.record_heartbeat();
                trace!(conn = conn.id(), "heartbeat sent");
            }
            Err(e) => {
                debug!(conn = conn.id(), error = %e, "heartbeat stopped");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_config_default() {
        let config = HeartbeatConfig::default();
        assert!(config.enabled);
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.frame_type, frame_types::HEARTBEAT);
    }

    #[test]
    fn test_heartbeat_frame_payload() {
        let config = HeartbeatConfig {
            frame_type: 900,
            ..Default::default()
        };
        let frame = config.frame().expect("frame");
        assert_eq!(frame.frame_type, 900);
        assert_eq!(frame.tag, NO_TAG);
        assert!(matches!(
            PeerMessage::from_frame(&frame).expect("decode"),
            PeerMessage::Heartbeat { .. }
        ));
    }

    #[test]
    fn test_heartbeat_config_serde() {
        let parsed: HeartbeatConfig =
            serde_json::from_str(r#"{"interval_ms": 100}"#).expect("parse");
        assert!(parsed.enabled);
        assert_eq!(parsed.interval, Duration::from_millis(100));
        assert_eq!(parsed.frame_type, frame_types::HEARTBEAT);
    }
}
