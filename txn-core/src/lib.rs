//! Transaction participant core
//!
//! Participant protocol for a switching node.
//!
//! # Architecture
//!
//! - **Result flags**: one outcome plus independent modifiers
//! - **Participants**: prepare/commit/abort with an optional abort capability
//! - **Context**: per-transaction key/value bag with pause/resume
//! - **Join**: parallel fan-out over child participants
//! - **Manager**: in-memory driver bounded by a shared worker pool
//!
//! # Invariants
//!
//! - `RETRY` absorbs every other flag
//! - A context honours one resume per pause
//! - Commit/abort never reach a participant that answered `NO_JOIN`

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod context;
pub mod error;
pub mod flags;
pub mod join;
pub mod manager;
pub mod metrics;
pub mod participant;
pub mod pause;
pub mod pool;

// Re-exports
pub use config::ManagerConfig;
pub use context::{Checkpoint, Context, PausedTransaction, ResultKind, TxnResult};
pub use error::{Error, Result};
pub use flags::{Outcome, ResultFlags};
pub use join::Join;
pub use manager::{
    spawn_transaction_manager, ManagerHandle, TransactionManager, TxnOutcome, TxnStatus,
};
pub use metrics::ManagerMetrics;
pub use participant::{AbortParticipant, Participant};
pub use pause::Pause;
pub use pool::WorkerPool;
