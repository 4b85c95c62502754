//! Collaborators that sit outside the link itself.
//!
//! Device discovery, port forwarding and interface probing are provided by
//! the embedding application (usually by shelling out to platform tools).
//! The link only needs a reachable loopback endpoint and, optionally, a way
//! to report interface changes to the peer.

use std::sync::Arc;
use std::time::Duration;

use peerlink_proto::PeerMessage;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PeerError, Result, endpoint};
use crate::link::PeerClient;

/// Opaque device identifier (for example a UDID).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(pub String);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Finds the device to tunnel to.
pub trait DeviceDiscovery: Send + Sync {
    /// The attached device, if any.
    fn find_device(&self) -> Option<DeviceId>;
}

/// A running port forward.
pub trait ForwardHandle: Send {
    /// Stop forwarding. Called at most once.
    fn terminate(&mut self) -> Result<()>;
}

/// Starts port forwards to a device.
pub trait PortForwarder: Send + Sync {
    /// Forward `127.0.0.1:<port>` to `device`.
    fn forward(&self, device: &DeviceId, port: u16) -> Result<Box<dyn ForwardHandle>>;
}

/// Reports the network interface currently carrying the physical link.
pub trait InterfaceProbe: Send + Sync {
    /// Interface name, or `None` when there is no link.
    fn current_interface(&self) -> Option<String>;
}

/// A forwarded loopback endpoint. Stops the forward when dropped.
pub struct Tunnel {
    device: DeviceId,
    port: u16,
    handle: Option<Box<dyn ForwardHandle>>,
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("device", &self.device)
            .field("port", &self.port)
            .field("active", &self.handle.is_some())
            .finish()
    }
}

impl Tunnel {
    /// Discover a device and forward `port` to it.
    pub fn establish(
        discovery: &dyn DeviceDiscovery,
        forwarder: &dyn PortForwarder,
        port: u16,
    ) -> Result<Self> {
        let device = discovery
            .find_device()
            .ok_or_else(|| PeerError::Tunnel("no device found".to_string()))?;
        info!(%device, port, "starting port forward");
        let handle = forwarder.forward(&device, port)?;
        Ok(Self {
            device,
            port,
            handle: Some(handle),
        })
    }

    /// Device at the other end.
    #[must_use]
    pub const fn device(&self) -> &DeviceId {
        &self.device
    }

    /// Local port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Loopback endpoint to dial.
    #[must_use]
    pub fn endpoint(&self) -> String {
        endpoint("127.0.0.1", self.port)
    }

    /// Stop the forward, reporting failure.
    pub fn close(mut self) -> Result<()> {
        self.terminate()
    }

    fn terminate(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(mut handle) => {
                info!(device = %self.device, port = self.port, "stopping port forward");
                handle.terminate()
            }
            None => Ok(()),
        }
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            warn!(error = %e, "failed to stop port forward");
        }
    }
}

/// Sends a `status` message whenever the probed interface changes.
///
/// The first poll always reports. A report that fails to send is retried on
/// the next poll.
pub struct StatusReporter {
    probe: Arc<dyn InterfaceProbe>,
    interval: Duration,
}

impl std::fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusReporter")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl StatusReporter {
    /// Default poll interval.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

    /// Create a reporter polling `probe` every second.
    pub fn new(probe: Arc<dyn InterfaceProbe>) -> Self {
        Self {
            probe,
            interval: Self::DEFAULT_INTERVAL,
        }
    }

    /// Change the poll interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll and report until `shutdown` is cancelled.
    pub async fn run(self, client: Arc<PeerClient>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reported: Option<Option<String>> = None;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let probe = Arc::clone(&self.probe);
            let current = match tokio::task::spawn_blocking(move || probe.current_interface()).await {
                Ok(current) => current,
                Err(e) => {
                    warn!(error = %e, "interface probe failed");
                    continue;
                }
            };
            if reported.as_ref() == Some(&current) {
                continue;
            }

            let message = PeerMessage::status(current.clone());
            match client.send_message(&message).await {
                Ok(()) => {
                    info!(
                        interface = current.as_deref().unwrap_or("none"),
                        "sent link status"
                    );
                    reported = Some(current);
                }
                Err(e) => {
                    debug!(error = %e, "status not sent");
                    reported = None;
                }
            }
        }
    }
}
