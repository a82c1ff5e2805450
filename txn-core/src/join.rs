//! Parallel fan-out/fan-in participant
//!
//! A [`Join`] runs one phase of every child concurrently and presents the
//! group to the driver as a single participant.
//!
//! ```text
//!              prepare(id, ctx)
//!                    │
//!      ┌─────────────┼─────────────┐        one Runner per child,
//!      ▼             ▼             ▼        spawned on the worker pool
//!   Runner[0]     Runner[1]     Runner[2]
//!      │             │             │
//!      └─────────────┼─────────────┘        barrier: join_all
//!                    ▼
//!     ResultFlags::merge(results in configured order)
//! ```
//!
//! Per-child prepare results are kept per transaction so that `commit` and
//! `abort` skip children that answered `NO_JOIN`. A child that panics
//! contributes `ABORTED` with no modifiers; its siblings keep running.
//!
//! Children cannot suspend the transaction. A child answering `PAUSE`
//! contributes `ABORTED` as well and receives `abort`.

use crate::context::Context;
use crate::flags::ResultFlags;
use crate::participant::{AbortParticipant, Participant};
use crate::pool::WorkerPool;
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Phase delegated to the children
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// `prepare`
    Prepare,
    /// `prepare_for_abort`
    PrepareForAbort,
    /// `commit`
    Commit,
    /// `abort`
    Abort,
}

/// Flags contributed by a child whose runner failed
pub const RUNNER_FAULT: ResultFlags = ResultFlags::ABORTED;

/// Flags contributed by a child that tried to pause
pub const PAUSED_CHILD: ResultFlags = ResultFlags::ABORTED;

/// One child bound to one phase of one transaction
struct Runner {
    participant: Arc<dyn Participant>,
    phase: Phase,
    previous: Option<ResultFlags>,
}

impl Runner {
    async fn run(self, id: u64, ctx: Arc<Context>) -> ResultFlags {
        match self.phase {
            Phase::Prepare => self.participant.prepare(id, &ctx).await,
            Phase::PrepareForAbort => match self.participant.as_abort_participant() {
                Some(ap) => ap.prepare_for_abort(id, &ctx).await,
                None => ResultFlags::ABORTED,
            },
            Phase::Commit | Phase::Abort => {
                if let Some(rc) = self.previous.filter(ResultFlags::is_no_join) {
                    debug!(id, participant = self.participant.name(), "Skipping NO_JOIN child");
                    return rc;
                }
                if self.phase == Phase::Commit {
                    self.participant.commit(id, &ctx).await;
                } else {
                    self.participant.abort(id, &ctx).await;
                }
                self.previous.unwrap_or(ResultFlags::PREPARED)
            }
        }
    }
}

/// Composite participant running its children in parallel
pub struct Join {
    name: String,
    participants: Vec<Arc<dyn Participant>>,
    pool: WorkerPool,
    results: DashMap<u64, Vec<ResultFlags>>,
}

impl Join {
    /// Create a join over an ordered, non-empty list of children
    pub fn new(
        name: impl Into<String>,
        participants: Vec<Arc<dyn Participant>>,
        pool: WorkerPool,
    ) -> Result<Self> {
        let name = name.into();
        if participants.is_empty() {
            return Err(Error::Config(format!("join '{}' has no participants", name)));
        }
        Ok(Self {
            name,
            participants,
            pool,
            results: DashMap::new(),
        })
    }

    /// Children in configured order
    pub fn participants(&self) -> &[Arc<dyn Participant>] {
        &self.participants
    }

    /// Transactions whose per-child results are still held
    pub fn tracked(&self) -> usize {
        self.results.len()
    }

    async fn run_phase(&self, phase: Phase, id: u64, ctx: &Arc<Context>) -> Vec<ResultFlags> {
        let previous = match phase {
            Phase::Commit | Phase::Abort => self.results.remove(&id).map(|(_, rcs)| rcs),
            Phase::Prepare | Phase::PrepareForAbort => None,
        };

        let handles: Vec<_> = self
            .participants
            .iter()
            .enumerate()
            .map(|(i, participant)| {
                let runner = Runner {
                    participant: participant.clone(),
                    phase,
                    previous: previous.as_ref().and_then(|rcs| rcs.get(i).copied()),
                };
                self.pool.spawn(runner.run(id, ctx.clone()))
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .zip(&self.participants)
            .map(|(joined, participant)| match joined {
                Ok(rc) => rc,
                Err(e) => {
                    error!(
                        join = %self.name,
                        participant = participant.name(),
                        id,
                        ?phase,
                        "Runner failed: {}",
                        e
                    );
                    RUNNER_FAULT
                }
            })
            .collect()
    }

    fn settle(&self, id: u64, results: Vec<ResultFlags>) -> ResultFlags {
        let results: Vec<ResultFlags> = results
            .into_iter()
            .zip(&self.participants)
            .map(|(rc, participant)| {
                if rc.is_pause() {
                    warn!(
                        join = %self.name,
                        participant = participant.name(),
                        id,
                        "Child paused inside a join, aborting it"
                    );
                    PAUSED_CHILD
                } else {
                    rc
                }
            })
            .collect();

        let merged = ResultFlags::merge(&results);
        debug!(join = %self.name, id, %merged, "Join merged");

        // Commit/abort will not reach us in these cases
        if !merged.is_retry() && !merged.is_no_join() {
            self.results.insert(id, results);
        } else {
            self.results.remove(&id);
        }
        merged
    }
}

#[async_trait]
impl Participant for Join {
    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare(&self, id: u64, ctx: &Arc<Context>) -> ResultFlags {
        let results = self.run_phase(Phase::Prepare, id, ctx).await;
        self.settle(id, results)
    }

    async fn commit(&self, id: u64, ctx: &Arc<Context>) {
        self.run_phase(Phase::Commit, id, ctx).await;
    }

    async fn abort(&self, id: u64, ctx: &Arc<Context>) {
        self.run_phase(Phase::Abort, id, ctx).await;
    }

    fn as_abort_participant(&self) -> Option<&dyn AbortParticipant> {
        Some(self)
    }
}

#[async_trait]
impl AbortParticipant for Join {
    async fn prepare_for_abort(&self, id: u64, ctx: &Arc<Context>) -> ResultFlags {
        let results = self.run_phase(Phase::PrepareForAbort, id, ctx).await;
        self.settle(id, results)
    }
}
