//! Request/response multiplexer
//!
//! # Architecture
//!
//! ```text
//!   request()/request_with_listener()          receiver loop (one task)
//!            │                                          │
//!            │ 1. key = KeyBuilder::key(msg)            │ channel.receive()
//!            │ 2. pending.insert(key)                   │ key = KeyBuilder::key(rsp)
//!            │ 3. channel.send(msg)                     │ pending.remove(key)
//!            │ 4. arm expiry timer                      │   ├─ found  → complete(Some(rsp))
//!            ▼                                          │   └─ absent → unhandled queue
//!   ┌─────────────────────────────┐                     │
//!   │ pending: DashMap<key, Pending> ◄──────────────────┘
//!   └─────────────────────────────┘
//!            ▲
//!            │ expiry timer: pending.remove_if(key, seq) → complete(None)
//! ```
//!
//! Whoever removes the entry from the pending table completes the request;
//! the loser of the race between the receiver loop and the expiry timer finds
//! nothing to remove and does nothing. Each request therefore completes at
//! most once: a value or `None` for blocking callers, `response_received` or
//! `expired` for listeners. A request whose send fails is withdrawn without
//! completing, so expiry is only armed after the send returns.

use crate::channel::Channel;
use crate::config::MuxConfig;
use crate::key::KeyBuilder;
use crate::message::IsoMsg;
use crate::metrics::MuxMetrics;
use crate::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Opaque value handed back to a [`ResponseListener`]
pub type Handback = Box<dyn Any + Send + Sync>;

/// Completion callbacks for asynchronous requests.
///
/// Exactly one of the two methods is called per request. Both run on the
/// multiplexer's own tasks and must not block.
pub trait ResponseListener: Send + Sync {
    /// A matching response arrived before the deadline
    fn response_received(&self, response: IsoMsg, handback: Handback);

    /// The deadline elapsed first
    fn expired(&self, handback: Handback);
}

enum Waiter {
    Blocking(oneshot::Sender<Option<IsoMsg>>),
    Continuation {
        listener: Arc<dyn ResponseListener>,
        handback: Handback,
    },
}

struct Pending {
    seq: u64,
    deadline: Instant,
    waiter: Waiter,
    armed: bool,
    timer: Option<AbortHandle>,
}

impl Pending {
    fn complete(mut self, key: &str, response: Option<IsoMsg>) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }

        match self.waiter {
            Waiter::Blocking(tx) => {
                // Receiver gone means the caller stopped waiting
                let _ = tx.send(response);
            }
            Waiter::Continuation { listener, handback } => {
                let outcome = catch_unwind(AssertUnwindSafe(|| match response {
                    Some(rsp) => listener.response_received(rsp, handback),
                    None => listener.expired(handback),
                }));
                if outcome.is_err() {
                    error!(key, "Response listener panicked");
                }
            }
        }
    }
}

struct MuxInner {
    channel: Arc<dyn Channel>,
    config: MuxConfig,
    keys: KeyBuilder,
    pending: DashMap<String, Pending>,
    seq: AtomicU64,
    unhandled_tx: mpsc::Sender<IsoMsg>,
    unhandled_rx: Mutex<Option<mpsc::Receiver<IsoMsg>>>,
    shutdown: watch::Sender<bool>,
    running: AtomicBool,
    metrics: MuxMetrics,
}

/// Multiplexer handle (cheap to clone)
#[derive(Clone)]
pub struct Mux {
    inner: Arc<MuxInner>,
}

impl Mux {
    /// Create a multiplexer over a channel.
    ///
    /// The receiver loop is not started until [`Mux::spawn_receiver`].
    pub fn new(channel: Arc<dyn Channel>, config: MuxConfig) -> Result<Self> {
        let keys = KeyBuilder::new(&config)?;
        let metrics = MuxMetrics::new().map_err(|e| Error::Config(e.to_string()))?;
        let (unhandled_tx, unhandled_rx) = mpsc::channel(config.unhandled_capacity);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(MuxInner {
                channel,
                config,
                keys,
                pending: DashMap::new(),
                seq: AtomicU64::new(0),
                unhandled_tx,
                unhandled_rx: Mutex::new(Some(unhandled_rx)),
                shutdown,
                running: AtomicBool::new(false),
                metrics,
            }),
        })
    }

    /// Start the receiver loop. Only one loop may run per multiplexer.
    pub fn spawn_receiver(&self) -> Result<JoinHandle<()>> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(Error::Config(format!(
                "receiver already running on {}",
                self.inner.channel.name()
            )));
        }

        let inner = self.inner.clone();
        let shutdown = self.inner.shutdown.subscribe();
        Ok(tokio::spawn(async move {
            inner.receive_loop(shutdown).await;
        }))
    }

    /// Stop the receiver loop. Pending requests still expire normally.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
    }

    /// Whether the underlying channel is connected
    pub fn is_connected(&self) -> bool {
        self.inner.channel.is_connected()
    }

    /// Send a request and wait for its response.
    ///
    /// Returns `Ok(None)` when `timeout` elapses first.
    pub async fn request(&self, msg: IsoMsg, timeout: Duration) -> Result<Option<IsoMsg>> {
        let (tx, rx) = oneshot::channel();
        self.submit(msg, timeout, Waiter::Blocking(tx)).await?;
        rx.await.map_err(|_| Error::Shutdown)
    }

    /// Send a request and return immediately.
    ///
    /// Later, exactly one of `listener.response_received` or
    /// `listener.expired` is called with `handback`. If this returns an
    /// error, neither is called.
    pub async fn request_with_listener(
        &self,
        msg: IsoMsg,
        timeout: Duration,
        listener: Arc<dyn ResponseListener>,
        handback: Handback,
    ) -> Result<()> {
        self.submit(msg, timeout, Waiter::Continuation { listener, handback })
            .await
    }

    /// Take the receiver for unmatched inbound messages (once)
    pub fn take_unhandled(&self) -> Option<mpsc::Receiver<IsoMsg>> {
        self.inner.unhandled_rx.lock().take()
    }

    /// Number of requests awaiting a response
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Expire every pending request whose deadline has passed
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let due: Vec<(String, u64)> = self
            .inner
            .pending
            .iter()
            .filter(|entry| entry.armed && entry.deadline <= now)
            .map(|entry| (entry.key().clone(), entry.seq))
            .collect();

        due.into_iter()
            .filter(|(key, seq)| self.inner.expire(key, *seq))
            .count()
    }

    /// Metrics collector
    pub fn metrics(&self) -> &MuxMetrics {
        &self.inner.metrics
    }

    async fn submit(&self, msg: IsoMsg, timeout: Duration, waiter: Waiter) -> Result<()> {
        let inner = &self.inner;

        if !inner.channel.is_connected() {
            return Err(Error::NotConnected(inner.channel.name().to_string()));
        }

        let key = inner.keys.key(&msg)?;
        let seq = inner.seq.fetch_add(1, Ordering::Relaxed);
        let deadline = deadline_after(timeout);

        match inner.pending.entry(key.clone()) {
            Entry::Occupied(_) => return Err(Error::DuplicateKey(key)),
            Entry::Vacant(slot) => {
                slot.insert(Pending {
                    seq,
                    deadline,
                    waiter,
                    armed: false,
                    timer: None,
                });
            }
        }
        inner.metrics.rx_pending.inc();

        debug!(key = %key, timeout_ms = timeout.as_millis() as u64, "Sending request");

        if let Err(e) = inner.channel.send(msg).await {
            inner.metrics.send_errors.inc();
            if inner.pending.remove_if(&key, |_, p| p.seq == seq).is_none() {
                // A response already completed the request
                warn!(key = %key, "Request send failed after completion: {}", e);
                return Ok(());
            }
            inner.metrics.rx_pending.dec();
            warn!(key = %key, "Request send failed: {}", e);
            return Err(e);
        }
        inner.metrics.tx_total.inc();

        // Expiry is armed only once the request is on the wire
        match inner.pending.get_mut(&key) {
            Some(mut entry) if entry.seq == seq => entry.armed = true,
            _ => return Ok(()),
        }
        let timer = {
            let inner = inner.clone();
            let key = key.clone();
            tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                inner.expire(&key, seq);
            })
        };
        match inner.pending.get_mut(&key) {
            Some(mut entry) if entry.seq == seq => entry.timer = Some(timer.abort_handle()),
            _ => timer.abort(),
        }

        Ok(())
    }
}

/// `now + timeout`, saturating far in the future
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(FAR_FUTURE_SECS))
}

const FAR_FUTURE_SECS: u64 = 86_400 * 365 * 30;

impl MuxInner {
    async fn receive_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(channel = %self.channel.name(), "Multiplexer receiver started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                result = self.channel.receive() => match result {
                    Ok(msg) => {
                        self.metrics.rx_total.inc();
                        self.dispatch(msg);
                    }
                    Err(e) => {
                        warn!(channel = %self.channel.name(), "Receive failed: {}", e);
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
                        }
                        if !self.channel.is_connected() {
                            match self.channel.connect().await {
                                Ok(()) => info!(channel = %self.channel.name(), "Reconnected"),
                                Err(e) => warn!(channel = %self.channel.name(), "Reconnect failed: {}", e),
                            }
                        }
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!(channel = %self.channel.name(), "Multiplexer receiver stopped");
    }

    fn dispatch(&self, msg: IsoMsg) {
        if msg.is_request() {
            self.unhandled(msg, "inbound request");
            return;
        }

        let key = match self.keys.key(&msg) {
            Ok(key) => key,
            Err(e) => {
                debug!("Cannot correlate inbound message: {}", e);
                self.unhandled(msg, "no correlation key");
                return;
            }
        };

        match self.pending.remove(&key) {
            Some((_, pending)) => {
                self.metrics.rx_pending.dec();
                if Instant::now() > pending.deadline {
                    // Timer has not run yet but the deadline is gone
                    self.metrics.rx_expired.inc();
                    debug!(key = %key, "Response arrived after deadline");
                    pending.complete(&key, None);
                    self.unhandled(msg, "late response");
                } else {
                    self.metrics.rx_matched.inc();
                    debug!(key = %key, "Response matched");
                    pending.complete(&key, Some(msg));
                }
            }
            None => self.unhandled(msg, "no pending request"),
        }
    }

    /// Expire one armed request; false if it was already completed or its
    /// send is still in progress
    fn expire(&self, key: &str, seq: u64) -> bool {
        match self.pending.remove_if(key, |_, p| p.seq == seq && p.armed) {
            Some((_, pending)) => {
                self.metrics.rx_pending.dec();
                self.metrics.rx_expired.inc();
                debug!(key, "Request expired");
                pending.complete(key, None);
                true
            }
            None => false,
        }
    }

    fn unhandled(&self, msg: IsoMsg, reason: &str) {
        self.metrics.rx_unhandled.inc();
        match self.unhandled_tx.try_send(msg) {
            Ok(()) => debug!(reason, "Routed message to unhandled queue"),
            Err(mpsc::error::TrySendError::Full(msg)) => warn!(
                reason,
                mti = msg.mti().unwrap_or("----"),
                "Unhandled queue full, message not queued"
            ),
            Err(mpsc::error::TrySendError::Closed(msg)) => warn!(
                reason,
                mti = msg.mti().unwrap_or("----"),
                "Unhandled queue closed, message not queued"
            ),
        }
    }
}
