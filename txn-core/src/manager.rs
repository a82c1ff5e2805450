//! In-memory transaction manager
//!
//! Drives one transaction at a time through the participant protocol:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │               ManagerHandle (Clone)                   │
//! │         Sends contexts to the manager mailbox         │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              ManagerActor (Single Task)               │
//! │   spawns TransactionManager::execute per context      │
//! └─────────────────────┬────────────────────────────────┘
//!                       ▼
//!   admit ─► prepare each participant in order ─► commit | abort members
//!                 │            ▲
//!          PAUSE  │            │ Context::resume(flags)
//!                 ▼            │
//!        permit released, waiting on the context
//! ```
//!
//! Members are the participants whose final flags lack `NO_JOIN`; only they
//! see `commit` or `abort`, in prepare order.

use crate::config::ManagerConfig;
use crate::context::Context;
use crate::flags::ResultFlags;
use crate::metrics::ManagerMetrics;
use crate::participant::{
    abort_guarded, commit_guarded, prepare_for_abort_guarded, prepare_guarded, Participant,
};
use crate::pool::WorkerPool;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Flags assumed when a pause ends without a resume
const UNRESUMED: ResultFlags = ResultFlags::ABORTED.readonly().no_join();

/// Terminal state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnStatus {
    /// Every participant prepared and members committed
    Committed,
    /// Members were aborted
    Aborted,
}

/// What `execute` reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnOutcome {
    /// Transaction id
    pub id: u64,
    /// Terminal state
    pub status: TxnStatus,
    /// Restarts performed
    pub retries: u32,
}

enum Pass {
    Done(TxnStatus),
    Retry,
}

/// Runs transactions through an ordered participant list
pub struct TransactionManager {
    participants: Vec<Arc<dyn Participant>>,
    config: ManagerConfig,
    pool: WorkerPool,
    metrics: ManagerMetrics,
    next_id: AtomicU64,
}

impl TransactionManager {
    /// Create a manager; fails on an empty participant list or bad config
    pub fn new(
        participants: Vec<Arc<dyn Participant>>,
        config: ManagerConfig,
        pool: WorkerPool,
        metrics: ManagerMetrics,
    ) -> Result<Self> {
        config.validate()?;
        if participants.is_empty() {
            return Err(Error::Config("no participants configured".to_string()));
        }
        Ok(Self {
            participants,
            config,
            pool,
            metrics,
            next_id: AtomicU64::new(1),
        })
    }

    /// Fresh context with the next transaction id
    pub fn new_context(&self) -> Arc<Context> {
        Arc::new(Context::new(self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    /// Metrics collector
    pub fn metrics(&self) -> &ManagerMetrics {
        &self.metrics
    }

    /// Worker pool
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Run `execute` as a task on the worker pool
    pub fn spawn(self: &Arc<Self>, ctx: Arc<Context>) -> JoinHandle<Result<TxnOutcome>> {
        let manager = self.clone();
        self.pool.spawn(async move { manager.execute(ctx).await })
    }

    /// Run one transaction to its terminal state and destroy its context
    pub async fn execute(&self, ctx: Arc<Context>) -> Result<TxnOutcome> {
        let id = ctx.id();
        let timer = self.metrics.duration.start_timer();
        self.metrics.in_flight.inc();

        let driven = self.drive(id, &ctx).await;

        self.metrics.in_flight.dec();
        timer.observe_duration();
        self.metrics.anomalies.inc_by(ctx.anomalies());
        ctx.destroy();

        let (status, retries) = driven?;
        match status {
            TxnStatus::Committed => self.metrics.committed.inc(),
            TxnStatus::Aborted => self.metrics.aborted.inc(),
        }
        info!(id, ?status, retries, "Transaction finished");
        Ok(TxnOutcome {
            id,
            status,
            retries,
        })
    }

    async fn drive(&self, id: u64, ctx: &Arc<Context>) -> Result<(TxnStatus, u32)> {
        let mut permit = Some(self.pool.admit().await?);
        let mut retries = 0;

        loop {
            match self.run_once(id, ctx, &mut permit).await? {
                Pass::Done(status) => return Ok((status, retries)),
                Pass::Retry if retries < self.config.max_retries => {
                    retries += 1;
                    self.metrics.retried.inc();
                    debug!(id, retries, "Restarting transaction");
                    ctx.checkpoint(format!("retry:{}", retries));
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
                Pass::Retry => {
                    warn!(id, retries, "Retry limit reached, aborting");
                    ctx.fail("RETRY_LIMIT", "retry limit reached");
                    return Ok((TxnStatus::Aborted, retries));
                }
            }
        }
    }

    async fn run_once(
        &self,
        id: u64,
        ctx: &Arc<Context>,
        permit: &mut Option<OwnedSemaphorePermit>,
    ) -> Result<Pass> {
        let mut members: Vec<&Arc<dyn Participant>> = Vec::new();
        let mut aborting = false;

        for participant in &self.participants {
            ctx.rearm();
            let flags = if aborting {
                let Some(ap) = participant.as_abort_participant() else {
                    continue;
                };
                ctx.checkpoint(format!("prepare_for_abort:{}", participant.name()));
                prepare_for_abort_guarded(ap, id, ctx).await
            } else {
                ctx.checkpoint(format!("prepare:{}", participant.name()));
                prepare_guarded(participant.as_ref(), id, ctx).await
            };
            let flags = match self.await_resume(id, participant.name(), ctx, flags, permit).await {
                Ok(resumed) => resumed,
                Err(e) => {
                    if !flags.is_no_join() {
                        members.push(participant);
                    }
                    warn!(id, participant = participant.name(), "Cannot resume, aborting: {}", e);
                    ctx.fail("SHUTDOWN", "worker pool closed while paused");
                    self.abort_members(id, ctx, &members).await;
                    return Err(e);
                }
            };
            debug!(id, participant = participant.name(), %flags, "Prepared");

            if flags.is_retry() && !aborting {
                self.abort_members(id, ctx, &members).await;
                return Ok(Pass::Retry);
            }
            if !flags.is_no_join() {
                members.push(participant);
            }
            if !flags.is_prepared() {
                aborting = true;
            }
        }

        if aborting {
            self.abort_members(id, ctx, &members).await;
            Ok(Pass::Done(TxnStatus::Aborted))
        } else {
            for participant in members {
                ctx.checkpoint(format!("commit:{}", participant.name()));
                commit_guarded(participant.as_ref(), id, ctx).await;
            }
            Ok(Pass::Done(TxnStatus::Committed))
        }
    }

    /// Suspend while `flags` carries PAUSE, without holding a worker permit
    async fn await_resume(
        &self,
        id: u64,
        name: &str,
        ctx: &Arc<Context>,
        mut flags: ResultFlags,
        permit: &mut Option<OwnedSemaphorePermit>,
    ) -> Result<ResultFlags> {
        while flags.is_pause() {
            self.metrics.paused.inc();
            ctx.checkpoint(format!("pause:{}", name));
            permit.take();

            let paused = ctx.pause();
            let resumed = match self.config.pause_timeout() {
                None => paused.resumed().await,
                Some(limit) => match tokio::time::timeout(limit, paused.resumed()).await {
                    Ok(resumed) => resumed,
                    Err(_) => {
                        ctx.cancel_pause();
                        warn!(id, participant = name, "Pause timed out");
                        ctx.fail("PAUSE_TIMEOUT", "transaction was not resumed in time");
                        None
                    }
                },
            };

            *permit = Some(self.pool.admit().await?);
            ctx.checkpoint(format!("resume:{}", name));
            flags = resumed.unwrap_or(UNRESUMED);
        }
        ctx.discard_stray_resume();
        Ok(flags)
    }

    async fn abort_members(&self, id: u64, ctx: &Arc<Context>, members: &[&Arc<dyn Participant>]) {
        for participant in members {
            ctx.checkpoint(format!("abort:{}", participant.name()));
            abort_guarded(participant.as_ref(), id, ctx).await;
        }
    }
}

/// Message sent to the manager actor
pub enum ManagerMessage {
    /// Run a transaction
    Submit {
        /// Context of the transaction
        ctx: Arc<Context>,
        /// Receives the outcome
        response: oneshot::Sender<Result<TxnOutcome>>,
    },

    /// Stop accepting transactions
    Shutdown,
}

/// Actor feeding contexts into the manager
pub struct ManagerActor {
    manager: Arc<TransactionManager>,
    mailbox: mpsc::Receiver<ManagerMessage>,
}

impl ManagerActor {
    /// Create new actor
    pub fn new(manager: Arc<TransactionManager>, mailbox: mpsc::Receiver<ManagerMessage>) -> Self {
        Self { manager, mailbox }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                ManagerMessage::Submit { ctx, response } => {
                    let manager = self.manager.clone();
                    self.manager.pool().spawn(async move {
                        let outcome = manager.execute(ctx).await;
                        let _ = response.send(outcome);
                    });
                }
                ManagerMessage::Shutdown => {
                    info!("Transaction manager shutting down");
                    break;
                }
            }
        }
    }
}

/// Handle for submitting transactions to the actor
#[derive(Clone)]
pub struct ManagerHandle {
    sender: mpsc::Sender<ManagerMessage>,
}

impl ManagerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<ManagerMessage>) -> Self {
        Self { sender }
    }

    /// Submit a transaction and wait for its outcome
    pub async fn submit(&self, ctx: Arc<Context>) -> Result<TxnOutcome> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ManagerMessage::Submit { ctx, response: tx })
            .await
            .map_err(|_| Error::Concurrency("Manager mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(ManagerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Manager mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the manager actor
pub fn spawn_transaction_manager(manager: Arc<TransactionManager>) -> ManagerHandle {
    let (tx, rx) = mpsc::channel(manager.config.queue_capacity);
    let actor = ManagerActor::new(manager, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    ManagerHandle::new(tx)
}
