//! High-level client for one peer endpoint.

use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use peerlink_proto::{Frame, NO_TAG, PeerMessage, frame_types};
use tokio::sync::mpsc;

use super::connection::{ConnectionOptions, ConnectionStats};
use super::events::PeerEvent;
use super::reconnect::ReconnectConfig;
use super::state::ConnectionState;
use super::supervisor::ReconnectSupervisor;
use crate::config::PeerConfig;
use crate::error::Result;

/// A peer link client.
///
/// Composes the connection, heartbeat and reconnect supervisor behind one
/// surface. Inbound frames and lifecycle changes arrive on the event
/// receiver returned by [`take_events`](Self::take_events); the receiver must
/// be drained, since a full channel applies backpressure to the receive loop.
/// `connect`, `disconnect` and reconnection never wait on the channel.
#[derive(Debug)]
pub struct PeerClient {
    config: PeerConfig,
    supervisor: ReconnectSupervisor,
    events: Mutex<Option<mpsc::Receiver<PeerEvent>>>,
}

impl PeerClient {
    /// Create a client from a validated configuration.
    pub fn new(config: PeerConfig) -> Result<Self> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.event_buffer);
        let supervisor = ReconnectSupervisor::new(
            config.endpoint(),
            ConnectionOptions::from(&config),
            config.reconnect.clone(),
            tx,
        );
        Ok(Self {
            config,
            supervisor,
            events: Mutex::new(Some(rx)),
        })
    }

    /// Take the event receiver. Returns `None` after the first call.
    pub fn take_events(&self) -> Option<mpsc::Receiver<PeerEvent>> {
        self.events.lock().take()
    }

    /// Connect using the configured auto-reconnect setting.
    pub async fn connect(&self) -> Result<()> {
        self.connect_with(self.config.reconnect.enabled).await
    }

    /// Connect once, retrying in the background on failure if `auto_reconnect`.
    pub async fn connect_with(&self, auto_reconnect: bool) -> Result<()> {
        self.supervisor.connect(auto_reconnect).await.map(|_| ())
    }

    /// Send `payload` as an untagged data frame.
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.send_typed(frame_types::DATA, NO_TAG, payload).await
    }

    /// Send `payload` with an explicit frame type and tag.
    pub async fn send_typed(&self, frame_type: u32, tag: u32, payload: impl Into<Bytes>) -> Result<()> {
        self.send_frame(&Frame::new(frame_type, tag, payload)).await
    }

    /// Send a prepared frame.
    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.supervisor.send(frame).await
    }

    /// Send a JSON application message on its usual frame type.
    pub async fn send_message(&self, message: &PeerMessage) -> Result<()> {
        let frame = message.to_frame()?;
        self.send_frame(&frame).await
    }

    /// Cancel any pending retry and close the connection.
    pub async fn disconnect(&self) {
        self.supervisor.disconnect().await;
    }

    /// Enable or disable auto reconnection, optionally changing the delay.
    pub fn set_auto_reconnect(&self, enabled: bool, delay: Option<Duration>) {
        self.supervisor.set_auto_reconnect(enabled, delay);
    }

    /// Current reconnect policy.
    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectConfig {
        self.supervisor.policy()
    }

    /// Current link state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Check whether frames can be sent right now.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Counters of the live connection.
    #[must_use]
    pub fn stats(&self) -> Option<ConnectionStats> {
        self.supervisor.current().map(|c| c.stats())
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &PeerConfig {
        &self.config
    }

    /// Endpoint this client dials.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.supervisor.addr()
    }
}
