//! A single live TCP stream to the peer.
//!
//! Each connection owns its socket and two background tasks: the receive loop
//! and the heartbeat. Writes from any number of callers go through one async
//! mutex around the write half, so frames never interleave on the wire and
//! leave in call order. The receive task is the one that tears the connection
//! down: it stops the heartbeat, shuts the write half, runs the close hook
//! and then publishes `Disconnected`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use peerlink_proto::{ClientIdentity, Frame, FrameCodec, FrameReader};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::events::{CloseReason, PeerEvent};
use super::heartbeat::{HeartbeatConfig, run_heartbeat};
use super::state::{AtomicConnectionState, ConnectionState};
use crate::config::PeerConfig;
use crate::error::{PeerError, Result};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Called once by the receive task after the connection has fully closed.
pub type CloseHook = Box<dyn FnOnce(u64, &CloseReason) + Send + 'static>;

/// Settings for opening a connection.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Bound on TCP connect.
    pub connect_timeout: Duration,
    /// Wait this long for a first frame after the handshake. A timeout is
    /// logged and the connection proceeds.
    pub handshake_reply_timeout: Option<Duration>,
    /// Header profile and payload limit.
    pub codec: FrameCodec,
    /// Identity sent in the handshake frame.
    pub identity: ClientIdentity,
    /// Heartbeat settings.
    pub heartbeat: HeartbeatConfig,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::from(&PeerConfig::default())
    }
}

impl From<&PeerConfig> for ConnectionOptions {
    fn from(config: &PeerConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            handshake_reply_timeout: config.handshake_reply_timeout,
            codec: config.codec(),
            identity: config.identity.clone(),
            heartbeat: config.heartbeat.clone(),
        }
    }
}

/// Per-connection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Frames written, heartbeats and handshake included.
    pub frames_sent: u64,
    /// Frames read.
    pub frames_received: u64,
    /// Heartbeats written.
    pub heartbeats_sent: u64,
}

#[derive(Debug, Default)]
struct Counters {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    heartbeats_sent: AtomicU64,
}

#[derive(Debug)]
struct Shared {
    id: u64,
    peer_addr: SocketAddr,
    codec: FrameCodec,
    state: AtomicConnectionState,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    /// Close-once guard: the first reason stored wins.
    close_reason: Mutex<Option<CloseReason>>,
    shutdown: CancellationToken,
    terminated: CancellationToken,
    counters: Counters,
}

/// Handle to a live connection. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Dial `addr`, send the handshake and start the background tasks.
    ///
    /// Inbound frames and lifecycle changes are published on `events`.
    /// `on_close` runs once the connection has fully shut down.
    pub async fn open(
        addr: &str,
        options: &ConnectionOptions,
        events: mpsc::Sender<PeerEvent>,
        on_close: Option<CloseHook>,
    ) -> Result<Self> {
        debug!(addr, "connecting");
        let stream = match tokio::time::timeout(options.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(PeerError::connect(addr, e)),
            Err(_) => {
                return Err(PeerError::connect(
                    addr,
                    format!("timed out after {}ms", options.connect_timeout.as_millis()),
                ));
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!(addr, error = %e, "failed to set TCP_NODELAY");
        }
        let peer_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        let conn = Self {
            shared: Arc::new(Shared {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                peer_addr,
                codec: options.codec,
                state: AtomicConnectionState::new(ConnectionState::Handshaking),
                writer: tokio::sync::Mutex::new(Some(write_half)),
                close_reason: Mutex::new(None),
                shutdown: CancellationToken::new(),
                terminated: CancellationToken::new(),
                counters: Counters::default(),
            }),
        };

        let mut reader = FrameReader::new(read_half, options.codec);
        let reply = match conn.handshake(&mut reader, options).await {
            Ok(reply) => reply,
            Err(e) => {
                conn.shared.state.store(ConnectionState::Disconnected);
                conn.shared.terminated.cancel();
                return Err(e);
            }
        };

        conn.shared.state.store(ConnectionState::Connected);
        info!(conn = conn.id(), %peer_addr, "connected");

        let heartbeat = options
            .heartbeat
            .enabled
            .then(|| tokio::spawn(run_heartbeat(conn.clone(), options.heartbeat.clone())));
        tokio::spawn(conn.clone().receive_loop(reader, reply, events, heartbeat, on_close));

        Ok(conn)
    }

    async fn handshake(
        &self,
        reader: &mut FrameReader<OwnedReadHalf>,
        options: &ConnectionOptions,
    ) -> Result<Option<Frame>> {
        let frame = options.identity.handshake_frame()?;
        let bytes = self.shared.codec.encode_frame(&frame)?;
        self.write_bytes(&bytes)
            .await
            .map_err(|e| PeerError::connect(&self.shared.peer_addr.to_string(), format!("handshake failed: {e}")))?;
        debug!(conn = self.id(), client = %options.identity.client, "handshake sent");

        let Some(wait) = options.handshake_reply_timeout else {
            return Ok(None);
        };
        match tokio::time::timeout(wait, reader.read_frame()).await {
            Ok(Ok(Some(reply))) => {
                self.shared.counters.frames_received.fetch_add(1, Ordering::Relaxed);
                debug!(conn = self.id(), frame_type = reply.frame_type, "handshake reply received");
                Ok(Some(reply))
            }
            Ok(Ok(None)) => Err(PeerError::connect(
                &self.shared.peer_addr.to_string(),
                "peer closed during handshake",
            )),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!(conn = self.id(), wait_ms = wait.as_millis() as u64, "no handshake reply, continuing");
                Ok(None)
            }
        }
    }

    /// Publishes `Connected` and inbound frames, then tears the connection
    /// down. Every event publish races the shutdown token so a consumer that
    /// stops draining cannot hold up `close`.
    async fn receive_loop(
        self,
        mut reader: FrameReader<OwnedReadHalf>,
        reply: Option<Frame>,
        events: mpsc::Sender<PeerEvent>,
        heartbeat: Option<JoinHandle<()>>,
        on_close: Option<CloseHook>,
    ) {
        let shutdown = self.shutdown_token();
        let greeting = async {
            events
                .send(PeerEvent::Connected {
                    addr: self.shared.peer_addr,
                })
                .await?;
            if let Some(frame) = reply {
                events.send(PeerEvent::Frame(frame)).await?;
            }
            Ok::<_, mpsc::error::SendError<PeerEvent>>(())
        };
        tokio::select! {
            () = shutdown.cancelled() => {}
            _ = greeting => {}
        }

        let observed = loop {
            if shutdown.is_cancelled() {
                break CloseReason::Requested;
            }
            let result = tokio::select! {
                () = shutdown.cancelled() => break CloseReason::Requested,
                result = reader.read_frame() => result,
            };
            match result {
                Ok(Some(frame)) => {
                    self.shared.counters.frames_received.fetch_add(1, Ordering::Relaxed);
                    trace!(
                        conn = self.id(),
                        frame_type = frame.frame_type,
                        tag = frame.tag,
                        len = frame.payload.len(),
                        "frame received"
                    );
                    tokio::select! {
                        () = shutdown.cancelled() => break CloseReason::Requested,
                        _ = events.send(PeerEvent::Frame(frame)) => {}
                    }
                }
                Ok(None) => break CloseReason::PeerClosed,
                Err(e) => {
                    warn!(conn = self.id(), error = %e, "inbound stream corrupt");
                    break CloseReason::Protocol(e.to_string());
                }
            }
        };

        self.begin_close(observed);
        let reason = self.shared.close_reason.lock().clone().unwrap_or(CloseReason::Requested);

        if let Some(heartbeat) = heartbeat {
            let _ = heartbeat.await;
        }
        let writer = self.shared.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
        }
        drop(reader);

        self.shared.state.store(ConnectionState::Disconnected);
        let stats = self.stats();
        info!(
            conn = self.id(),
            peer = %self.shared.peer_addr,
            %reason,
            frames_sent = stats.frames_sent,
            frames_received = stats.frames_received,
            "disconnected"
        );
        self.shared.terminated.cancel();

        // Hook before publish: the publish may wait on a slow consumer.
        if let Some(hook) = on_close {
            hook(self.id(), &reason);
        }
        drop(self);
        if events.send(PeerEvent::Disconnected { reason }).await.is_err() {
            trace!("event receiver gone, disconnect not published");
        }
    }

    /// Record `reason` and signal the background tasks to stop.
    ///
    /// Returns false if the connection was already closing.
    fn begin_close(&self, reason: CloseReason) -> bool {
        {
            let mut slot = self.shared.close_reason.lock();
            if slot.is_some() {
                return false;
            }
            debug!(conn = self.id(), %reason, "closing");
            *slot = Some(reason);
        }
        self.shared.state.store(ConnectionState::Closing);
        self.shared.shutdown.cancel();
        true
    }

    async fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        let shutdown = &self.shared.shutdown;
        let mut guard = tokio::select! {
            biased;
            () = shutdown.cancelled() => return Err(PeerError::NotConnected),
            guard = self.shared.writer.lock() => guard,
        };
        let Some(writer) = guard.as_mut() else {
            return Err(PeerError::NotConnected);
        };

        let result = tokio::select! {
            biased;
            () = shutdown.cancelled() => return Err(PeerError::NotConnected),
            result = writer.write_all(bytes) => result,
        };
        drop(guard);

        match result {
            Ok(()) => {
                self.shared.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                warn!(conn = self.id(), error = %e, "write failed");
                self.begin_close(CloseReason::SendFailed(e.to_string()));
                Err(PeerError::Send(e.to_string()))
            }
        }
    }

    /// Send one frame.
    ///
    /// Fails with [`PeerError::NotConnected`] unless the connection is
    /// `Connected`. A write failure closes the connection and returns
    /// [`PeerError::Send`].
    ///
    /// A frame over the payload limit is rejected with
    /// [`PeerError::Protocol`] before any byte is written, so unlike an
    /// oversized inbound frame it leaves the connection open.
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(PeerError::NotConnected);
        }
        let bytes = self.shared.codec.encode_frame(frame)?;
        self.write_bytes(&bytes).await?;
        trace!(
            conn = self.id(),
            frame_type = frame.frame_type,
            tag = frame.tag,
            len = frame.payload.len(),
            "frame sent"
        );
        Ok(())
    }

    /// Close the connection and wait until its tasks have stopped and the
    /// socket is released. Safe to call repeatedly and from many tasks.
    pub async fn close(&self) {
        self.begin_close(CloseReason::Requested);
        self.shared.terminated.cancelled().await;
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    /// Process-unique connection id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Remote address.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.peer_addr
    }

    /// True once teardown has finished.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.is_cancelled()
    }

    /// Why the connection closed, once it has started closing.
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.close_reason.lock().clone()
    }

    /// Wait until teardown has finished.
    pub async fn closed(&self) {
        self.shared.terminated.cancelled().await;
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        let c = &self.shared.counters;
        ConnectionStats {
            frames_sent: c.frames_sent.load(Ordering::Relaxed),
            frames_received: c.frames_received.load(Ordering::Relaxed),
            heartbeats_sent: c.heartbeats_sent.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    pub(crate) fn record_heartbeat(&self) {
        self.shared.counters.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Shut the socket for writing while leaving the connection open, so
    /// the next write fails.
    #[cfg(test)]
    pub(crate) async fn shut_write_half(&self) {
        if let Some(writer) = self.shared.writer.lock().await.as_mut() {
            let _ = writer.shutdown().await;
        }
    }
}
