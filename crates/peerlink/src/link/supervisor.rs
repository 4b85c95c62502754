//! Keeps one connection alive across failures.
//!
//! The supervisor owns at most one live [`Connection`] and at most one retry
//! task. Retry scheduling is idempotent: a second request while a retry is
//! pending is a no-op. When a live connection drops for any reason other than
//! an explicit close, its close hook asks the supervisor to schedule a retry.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use peerlink_proto::Frame;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::{CloseHook, Connection, ConnectionOptions};
use super::events::{CloseReason, PeerEvent};
use super::reconnect::ReconnectConfig;
use super::state::ConnectionState;
use crate::error::{PeerError, Result};

#[derive(Debug)]
struct RetrySlot {
    generation: u64,
    cancel: CancellationToken,
}

enum RetryOutcome {
    Connected(Connection),
    Cancelled,
    Stopped,
    Exhausted { attempts: u32, last_error: String },
}

struct Inner {
    addr: String,
    options: ConnectionOptions,
    events: mpsc::Sender<PeerEvent>,
    policy: Mutex<ReconnectConfig>,
    policy_changed: Notify,
    current: Mutex<Option<Connection>>,
    retry: Mutex<Option<RetrySlot>>,
    next_generation: AtomicU64,
    /// Serializes connection attempts so at most one stream is being set up.
    open_lock: tokio::sync::Mutex<()>,
    opening: AtomicBool,
    /// Id of the last connection taken down by `disconnect`.
    detached: AtomicU64,
}

/// Supervises the connection to one endpoint.
#[derive(Clone)]
pub struct ReconnectSupervisor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ReconnectSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectSupervisor")
            .field("addr", &self.inner.addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ReconnectSupervisor {
    /// Create a supervisor for `addr`. Nothing is dialed until
    /// [`connect`](Self::connect).
    pub fn new(
        addr: impl Into<String>,
        options: ConnectionOptions,
        policy: ReconnectConfig,
        events: mpsc::Sender<PeerEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                addr: addr.into(),
                options,
                events,
                policy: Mutex::new(policy),
                policy_changed: Notify::new(),
                current: Mutex::new(None),
                retry: Mutex::new(None),
                next_generation: AtomicU64::new(1),
                open_lock: tokio::sync::Mutex::new(()),
                opening: AtomicBool::new(false),
                detached: AtomicU64::new(0),
            }),
        }
    }

    /// Try to connect once.
    ///
    /// `auto_reconnect` becomes the retry policy from here on. If the attempt
    /// fails and it is set, one retry task is scheduled. Returns the live
    /// connection, which may be one that already existed.
    pub async fn connect(&self, auto_reconnect: bool) -> Result<Connection> {
        self.inner.policy.lock().enabled = auto_reconnect;
        self.inner.policy_changed.notify_waiters();

        match Inner::open_once(&self.inner, None).await {
            Ok(conn) => Ok(conn),
            Err(e) => {
                warn!(addr = %self.inner.addr, error = %e, "connect failed");
                if auto_reconnect {
                    Inner::schedule_retry(&self.inner);
                }
                Err(e)
            }
        }
    }

    /// Update the retry policy.
    ///
    /// Disabling makes a pending retry stop at its next wake without another
    /// attempt. Enabling does not start a retry by itself; the next failure
    /// or `connect` does.
    pub fn set_auto_reconnect(&self, enabled: bool, delay: Option<Duration>) {
        self.inner.policy.lock().set_enabled(enabled, delay);
        info!(enabled, delay_ms = delay.map(|d| d.as_millis() as u64), "auto reconnect updated");
        self.inner.policy_changed.notify_waiters();
    }

    /// Current retry policy.
    #[must_use]
    pub fn policy(&self) -> ReconnectConfig {
        self.inner.policy.lock().clone()
    }

    /// Cancel any pending retry and close the live connection, if any.
    pub async fn disconnect(&self) {
        if let Some(slot) = self.inner.retry.lock().take() {
            debug!(generation = slot.generation, "cancelling pending retry");
            slot.cancel.cancel();
        }
        let _guard = self.inner.open_lock.lock().await;
        let conn = self.inner.current.lock().take();
        if let Some(conn) = conn {
            self.inner.detached.store(conn.id(), Ordering::Release);
            conn.close().await;
        }
    }

    /// Send on the live connection.
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        let conn = self.current().ok_or(PeerError::NotConnected)?;
        conn.send(frame).await
    }

    /// The live connection, if any.
    #[must_use]
    pub fn current(&self) -> Option<Connection> {
        self.inner
            .current
            .lock()
            .as_ref()
            .filter(|c| !c.is_terminated())
            .cloned()
    }

    /// Link state as seen from outside.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        if let Some(conn) = self.current() {
            return conn.state();
        }
        if self.inner.opening.load(Ordering::Acquire) {
            ConnectionState::Connecting
        } else if self.inner.retry.lock().is_some() {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Disconnected
        }
    }

    /// True while a retry task is pending.
    #[must_use]
    pub fn retry_pending(&self) -> bool {
        self.inner.retry.lock().is_some()
    }

    /// Endpoint being supervised.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.inner.addr
    }
}

impl Inner {
    async fn open_once(this: &Arc<Self>, cancel: Option<&CancellationToken>) -> Result<Connection> {
        let _guard = this.open_lock.lock().await;
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(PeerError::NotConnected);
        }
        if let Some(conn) = this.current.lock().as_ref().filter(|c| !c.is_terminated()) {
            debug!(conn = conn.id(), "already connected");
            return Ok(conn.clone());
        }

        this.opening.store(true, Ordering::Release);
        let opened = Connection::open(
            &this.addr,
            &this.options,
            this.events.clone(),
            Some(Self::close_hook(Arc::downgrade(this))),
        )
        .await;
        this.opening.store(false, Ordering::Release);
        let conn = opened?;

        let mut current = this.current.lock();
        if conn.is_terminated() {
            return Err(PeerError::connect(&this.addr, "connection closed during setup"));
        }
        *current = Some(conn.clone());
        Ok(conn)
    }

    fn close_hook(weak: Weak<Self>) -> CloseHook {
        Box::new(move |id, reason| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            Self::on_connection_closed(&inner, id, reason);
        })
    }

    fn on_connection_closed(this: &Arc<Self>, id: u64, reason: &CloseReason) {
        // A connection that `disconnect` already detached, or one that was
        // never installed, does not heal.
        let was_current = {
            let mut current = this.current.lock();
            let matches = current.as_ref().is_some_and(|c| c.id() == id);
            if matches {
                *current = None;
            }
            matches
        };
        if was_current && reason.should_reconnect() && this.policy.lock().enabled {
            info!(conn = id, %reason, "connection lost, scheduling reconnect");
            Self::schedule_retry(this);
        }
    }

    fn schedule_retry(this: &Arc<Self>) {
        if !this.policy.lock().enabled {
            return;
        }
        let mut slot = this.retry.lock();
        if let Some(pending) = slot.as_ref() {
            debug!(generation = pending.generation, "retry already scheduled");
            return;
        }
        let generation = this.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        *slot = Some(RetrySlot {
            generation,
            cancel: cancel.clone(),
        });
        drop(slot);

        tokio::spawn(Self::retry_loop(Arc::clone(this), generation, cancel));
    }

    async fn retry_loop(this: Arc<Self>, generation: u64, cancel: CancellationToken) {
        let outcome = Self::retry_until_done(&this, &cancel).await;

        {
            let mut slot = this.retry.lock();
            if slot.as_ref().is_some_and(|s| s.generation == generation) {
                *slot = None;
            }
        }

        match outcome {
            RetryOutcome::Connected(conn) => {
                // The new connection may have dropped while this retry still
                // held the slot, in which case its hook could not schedule.
                if conn.is_terminated()
                    && conn.id() != this.detached.load(Ordering::Acquire)
                    && conn.close_reason().is_some_and(|r| r.should_reconnect())
                {
                    Self::schedule_retry(&this);
                }
            }
            RetryOutcome::Cancelled => debug!(generation, "retry cancelled"),
            RetryOutcome::Stopped => {
                info!("auto reconnect disabled, retry stopped");
                let _ = this.events.send(PeerEvent::ReconnectStopped).await;
            }
            RetryOutcome::Exhausted { attempts, last_error } => {
                warn!(attempts, error = %last_error, "giving up on reconnect");
                let _ = this
                    .events
                    .send(PeerEvent::ReconnectFailed { attempts, last_error })
                    .await;
            }
        }
    }

    async fn retry_until_done(this: &Arc<Self>, cancel: &CancellationToken) -> RetryOutcome {
        let mut attempts = 0u32;
        let mut last_error = String::new();

        loop {
            let policy = this.policy.lock().clone();
            if !policy.enabled {
                return RetryOutcome::Stopped;
            }
            if !policy.should_reconnect(attempts) {
                return RetryOutcome::Exhausted { attempts, last_error };
            }

            let delay = policy.delay_for_attempt(attempts + 1);
            info!(addr = %this.addr, attempt = attempts + 1, delay_ms = delay.as_millis() as u64, "reconnecting");
            let _ = this.events.try_send(PeerEvent::Reconnecting {
                attempt: attempts + 1,
                delay,
            });

            let policy_changed = this.policy_changed.notified();
            tokio::select! {
                () = cancel.cancelled() => return RetryOutcome::Cancelled,
                () = tokio::time::sleep(delay) => {}
                () = policy_changed => continue,
            }

            if !this.policy.lock().enabled {
                return RetryOutcome::Stopped;
            }
            attempts += 1;
            match Self::open_once(this, Some(cancel)).await {
                Ok(conn) => return RetryOutcome::Connected(conn),
                Err(_) if cancel.is_cancelled() => return RetryOutcome::Cancelled,
                Err(e) => {
                    debug!(attempt = attempts, error = %e, "reconnect attempt failed");
                    last_error = e.to_string();
                }
            }
        }
    }
}
