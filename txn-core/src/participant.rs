//! Participant capability traits
//!
//! Per transaction, a participant moves through:
//!
//! ```text
//! NEW → PREPARING → PREPARED | ABORTED | PAUSED | RETRY-REQUESTED
//!                       │         │        │
//!                       │         │        └─ Context::resume(flags) → PREPARED | ABORTED
//!                       ▼         ▼
//!                  COMMITTING  ABORTING → DONE      (skipped when NO_JOIN)
//! ```
//!
//! [`Participant`] is the base capability. [`AbortParticipant`] is the
//! optional second one, discovered through
//! [`Participant::as_abort_participant`].

use crate::context::Context;
use crate::flags::ResultFlags;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::error;

/// Unit of transaction logic
#[async_trait]
pub trait Participant: Send + Sync {
    /// Name used in logs and checkpoints
    fn name(&self) -> &str;

    /// Vote on the transaction
    async fn prepare(&self, id: u64, ctx: &Arc<Context>) -> ResultFlags;

    /// Make the prepared work permanent
    async fn commit(&self, _id: u64, _ctx: &Arc<Context>) {}

    /// Undo the prepared work
    async fn abort(&self, _id: u64, _ctx: &Arc<Context>) {}

    /// The abortable capability, if this participant has it
    fn as_abort_participant(&self) -> Option<&dyn AbortParticipant> {
        None
    }
}

/// Participant that wants a say while a transaction it never prepared for
/// is being aborted.
///
/// `prepare_for_abort` may record diagnostic state in the context. It must
/// not perform the participant's commit-time side effects.
#[async_trait]
pub trait AbortParticipant: Participant {
    /// Called instead of `prepare` once the transaction is known to abort
    async fn prepare_for_abort(&self, id: u64, ctx: &Arc<Context>) -> ResultFlags;
}

/// Flags substituted for a `prepare` that panicked
pub const FAULT_FLAGS: ResultFlags = ResultFlags::ABORTED.readonly();

/// Run `prepare`, mapping a panic to `ABORTED | READONLY`
pub async fn prepare_guarded(p: &dyn Participant, id: u64, ctx: &Arc<Context>) -> ResultFlags {
    match AssertUnwindSafe(p.prepare(id, ctx)).catch_unwind().await {
        Ok(flags) => flags,
        Err(_) => {
            error!(id, participant = p.name(), "prepare panicked");
            FAULT_FLAGS
        }
    }
}

/// Run `prepare_for_abort`, mapping a panic to `ABORTED | READONLY`
pub async fn prepare_for_abort_guarded(
    p: &dyn AbortParticipant,
    id: u64,
    ctx: &Arc<Context>,
) -> ResultFlags {
    match AssertUnwindSafe(p.prepare_for_abort(id, ctx))
        .catch_unwind()
        .await
    {
        Ok(flags) => flags,
        Err(_) => {
            error!(id, participant = p.name(), "prepare_for_abort panicked");
            FAULT_FLAGS
        }
    }
}

/// Run `commit`; a panic is logged and swallowed
pub async fn commit_guarded(p: &dyn Participant, id: u64, ctx: &Arc<Context>) {
    if AssertUnwindSafe(p.commit(id, ctx))
        .catch_unwind()
        .await
        .is_err()
    {
        error!(id, participant = p.name(), "commit panicked");
    }
}

/// Run `abort`; a panic is logged and swallowed
pub async fn abort_guarded(p: &dyn Participant, id: u64, ctx: &Arc<Context>) {
    if AssertUnwindSafe(p.abort(id, ctx))
        .catch_unwind()
        .await
        .is_err()
    {
        error!(id, participant = p.name(), "abort panicked");
    }
}
