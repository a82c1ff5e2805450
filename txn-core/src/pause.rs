//! Participant that suspends the transaction
//!
//! `prepare` answers `PAUSE | NO_JOIN | READONLY`. With a positive timeout a
//! timer resumes the transaction with `PREPARED | NO_JOIN | READONLY`; with
//! a zero timeout nothing resumes it here and some other component must.

use crate::context::Context;
use crate::flags::ResultFlags;
use crate::participant::Participant;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Flags returned from `prepare`
pub const PAUSE_FLAGS: ResultFlags = ResultFlags::PREPARED.pause().no_join().readonly();

/// Flags used when the timer resumes the transaction
pub const RESUME_FLAGS: ResultFlags = ResultFlags::PREPARED.no_join().readonly();

/// Suspends a transaction, optionally resuming it after a delay
#[derive(Debug, Clone)]
pub struct Pause {
    name: String,
    timeout: Duration,
}

impl Pause {
    /// Pause with a resume timer; `Duration::ZERO` disables the timer
    pub fn new(name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            timeout,
        }
    }

    /// Configured timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Participant for Pause {
    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare(&self, id: u64, ctx: &Arc<Context>) -> ResultFlags {
        if !self.timeout.is_zero() {
            let timeout = self.timeout;
            let ctx = Arc::downgrade(ctx);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                match ctx.upgrade() {
                    Some(ctx) if !ctx.is_destroyed() => {
                        debug!(id, "Pause timer resuming transaction");
                        ctx.resume(RESUME_FLAGS);
                    }
                    _ => debug!(id, "Pause timer fired after transaction ended"),
                }
            });
        }
        PAUSE_FLAGS
    }
}
