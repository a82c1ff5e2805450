//! Channel abstraction
//!
//! Wire framing and socket I/O live behind [`Channel`]. The multiplexer only
//! needs to send a message, block on the next inbound one and know whether
//! the link is up.

use crate::message::IsoMsg;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};

/// Bidirectional message channel
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name, used in logs
    fn name(&self) -> &str;

    /// Establish the link
    async fn connect(&self) -> Result<()>;

    /// Tear the link down. Pending `receive` calls fail with `Disconnected`.
    async fn disconnect(&self) -> Result<()>;

    /// Whether the link is up
    fn is_connected(&self) -> bool;

    /// Send a message
    async fn send(&self, msg: IsoMsg) -> Result<()>;

    /// Wait for the next inbound message
    async fn receive(&self) -> Result<IsoMsg>;
}

/// In-memory channel endpoint
///
/// Endpoints come in pairs: whatever one side sends, the other receives.
#[derive(Debug)]
pub struct MemoryChannel {
    name: String,
    outbound: mpsc::UnboundedSender<IsoMsg>,
    inbound: Mutex<mpsc::UnboundedReceiver<IsoMsg>>,
    connected: Arc<AtomicBool>,
    peer_connected: Arc<AtomicBool>,
    closed: Notify,
}

impl MemoryChannel {
    /// Create two connected endpoints
    pub fn pair(name: &str) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let a_connected = Arc::new(AtomicBool::new(true));
        let b_connected = Arc::new(AtomicBool::new(true));

        let a = Self {
            name: format!("{}-local", name),
            outbound: a_tx,
            inbound: Mutex::new(a_rx),
            connected: a_connected.clone(),
            peer_connected: b_connected.clone(),
            closed: Notify::new(),
        };
        let b = Self {
            name: format!("{}-remote", name),
            outbound: b_tx,
            inbound: Mutex::new(b_rx),
            connected: b_connected,
            peer_connected: a_connected,
            closed: Notify::new(),
        };
        (a, b)
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!(channel = %self.name, "Connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.closed.notify_waiters();
        tracing::debug!(channel = %self.name, "Disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, msg: IsoMsg) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected(self.name.clone()));
        }
        if !self.peer_connected.load(Ordering::SeqCst) {
            return Err(Error::Disconnected(format!("{} peer is down", self.name)));
        }
        self.outbound
            .send(msg)
            .map_err(|_| Error::Send(format!("{} peer dropped", self.name)))
    }

    async fn receive(&self) -> Result<IsoMsg> {
        let closed = self.closed.notified();
        tokio::pin!(closed);
        closed.as_mut().enable();

        if !self.is_connected() {
            return Err(Error::NotConnected(self.name.clone()));
        }

        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            _ = &mut closed => Err(Error::Disconnected(self.name.clone())),
            msg = inbound.recv() => {
                msg.ok_or_else(|| Error::Disconnected(format!("{} peer dropped", self.name)))
            }
        }
    }
}
