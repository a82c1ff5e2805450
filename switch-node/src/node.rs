//! Node assembly
//!
//! Wires a channel, the MUX, the configured participants and the
//! transaction manager into one running node. Messages the MUX cannot
//! correlate (host-initiated 08xx traffic, duplicates, late responses) are
//! drained by a consumer task that logs and counts them.

use crate::config::NodeConfig;
use crate::factory::{build_participants, ParticipantDeps, REQUEST, RESPONSE};
use crate::{Error, Result};
use iso_mux::{Channel, IsoMsg, Mux};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use txn_core::{
    spawn_transaction_manager, ManagerHandle, ManagerMetrics, TransactionManager, TxnOutcome,
    TxnResult, WorkerPool,
};

/// What an authorization produced
#[derive(Debug, Clone)]
pub struct Authorization {
    /// Terminal state of the transaction
    pub outcome: TxnOutcome,
    /// Host response, if one arrived
    pub response: Option<IsoMsg>,
    /// Result entries recorded by participants
    pub result: TxnResult,
}

/// Running switching node
pub struct SwitchNode {
    config: NodeConfig,
    mux: Mux,
    manager: Arc<TransactionManager>,
    handle: ManagerHandle,
    receiver: JoinHandle<()>,
    unhandled: JoinHandle<()>,
    unhandled_seen: Arc<AtomicU64>,
}

impl SwitchNode {
    /// Build and start a node over `channel`
    pub fn build(config: NodeConfig, channel: Arc<dyn Channel>) -> Result<Self> {
        config.validate()?;

        let mux = Mux::new(channel, config.mux.clone())?;

        let pool = WorkerPool::new(config.manager.max_in_flight)?;
        let deps = ParticipantDeps {
            mux: Some(mux.clone()),
            pool: pool.clone(),
        };
        let participants = build_participants(&config.participants, &deps)?;
        let metrics = ManagerMetrics::new().map_err(|e| Error::Config(e.to_string()))?;
        let manager = Arc::new(TransactionManager::new(
            participants,
            config.manager.clone(),
            pool,
            metrics,
        )?);

        let unhandled_rx = mux
            .take_unhandled()
            .ok_or_else(|| Error::Config("unhandled queue already taken".to_string()))?;
        let unhandled_seen = Arc::new(AtomicU64::new(0));
        let unhandled = spawn_unhandled_consumer(unhandled_rx, unhandled_seen.clone());
        let receiver = mux.spawn_receiver()?;
        let handle = spawn_transaction_manager(manager.clone());

        info!(
            service = %config.service_name,
            participants = config.participants.len(),
            "Switch node ready"
        );

        Ok(Self {
            config,
            mux,
            manager,
            handle,
            receiver,
            unhandled,
            unhandled_seen,
        })
    }

    /// Run `request` through the participants.
    ///
    /// The request is stored under [`REQUEST`]; the host response is read
    /// back from [`RESPONSE`].
    pub async fn authorize(&self, request: IsoMsg) -> Result<Authorization> {
        let ctx = self.manager.new_context();
        ctx.put(REQUEST, request);

        let outcome = self.handle.submit(ctx.clone()).await?;
        let response = ctx.get::<IsoMsg>(RESPONSE).map(|rsp| IsoMsg::clone(&rsp));

        Ok(Authorization {
            outcome,
            response,
            result: ctx.result(),
        })
    }

    /// Node configuration
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Multiplexer
    pub fn mux(&self) -> &Mux {
        &self.mux
    }

    /// Transaction manager
    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Uncorrelated messages drained from the MUX so far
    pub fn unhandled_seen(&self) -> u64 {
        self.unhandled_seen.load(Ordering::Relaxed)
    }

    /// Stop the manager and the receiver loop
    pub async fn shutdown(self) -> Result<()> {
        info!(service = %self.config.service_name, "Shutting down switch node");
        self.handle.shutdown().await?;
        self.mux.shutdown();
        self.manager.pool().close();
        self.unhandled.abort();
        self.receiver
            .await
            .map_err(|e| Error::Other(format!("receiver task failed: {}", e)))?;
        Ok(())
    }
}

fn spawn_unhandled_consumer(
    mut queue: mpsc::Receiver<IsoMsg>,
    seen: Arc<AtomicU64>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = queue.recv().await {
            let count = seen.fetch_add(1, Ordering::Relaxed) + 1;
            let mti = msg.mti().unwrap_or("----");
            let stan = msg.get(11).unwrap_or("-");
            if msg.is_request() {
                info!(mti, stan, count, "Host-initiated message not handled");
            } else {
                debug!(mti, stan, count, "Uncorrelated response dropped");
            }
        }
        debug!("Unhandled queue closed");
    })
}
