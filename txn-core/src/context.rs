//! Per-transaction context
//!
//! The context is the only channel between participants: an
//! insertion-ordered key/value bag, an append-only [`TxnResult`] and a
//! checkpoint trace. It also carries the pause/resume handshake.
//!
//! # Pause/resume
//!
//! ```text
//!            resume(f)                pause()
//!  Running ───────────► Early(f) ─────────────► Resumed   (flags ready at once)
//!     │                                            ▲
//!     │ pause()                   resume(f)        │
//!     └────────► Waiting(tx) ──────────────────────┘
//!
//!  destroy() from any state ──► Destroyed
//! ```
//!
//! The driver rearms a `Resumed` context back to `Running` before each
//! prepare call, so every participant gets its own pause cycle.
//!
//! A resume that finds the context `Early`, `Resumed` or `Destroyed` is a
//! protocol violation: it is ignored, logged and counted as an anomaly.

use crate::flags::ResultFlags;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, warn};

type Value = Arc<dyn Any + Send + Sync>;

/// Kind of a result entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultKind {
    /// Positive outcome
    Success,
    /// Failure that should reach the response
    Fail,
}

/// One pass/fail record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEntry {
    /// Pass or fail
    pub kind: ResultKind,
    /// Result code (e.g. ISO-8583 field 39 value)
    pub code: String,
    /// Human-readable detail
    pub message: String,
}

/// Append-only transaction result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnResult {
    entries: Vec<ResultEntry>,
}

impl TxnResult {
    /// All entries in insertion order
    pub fn entries(&self) -> &[ResultEntry] {
        &self.entries
    }

    /// Whether any failure was recorded
    pub fn is_failed(&self) -> bool {
        self.entries.iter().any(|e| e.kind == ResultKind::Fail)
    }

    /// First failure recorded
    pub fn failure(&self) -> Option<&ResultEntry> {
        self.entries.iter().find(|e| e.kind == ResultKind::Fail)
    }

    fn push(&mut self, kind: ResultKind, code: &str, message: &str) {
        self.entries.push(ResultEntry {
            kind,
            code: code.to_string(),
            message: message.to_string(),
        });
    }
}

/// Trace point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Label
    pub label: String,
    /// Milliseconds since the context was created
    pub elapsed_ms: u64,
    /// Wall clock time
    pub at: DateTime<Utc>,
}

enum Suspension {
    Running,
    Early(ResultFlags),
    Waiting(oneshot::Sender<ResultFlags>),
    Resumed,
    Destroyed,
}

#[derive(Default)]
struct State {
    entries: Vec<(String, Value)>,
    result: TxnResult,
    trace: Vec<Checkpoint>,
}

/// Transaction context
pub struct Context {
    id: u64,
    created: Instant,
    state: Mutex<State>,
    suspension: Mutex<Suspension>,
    anomalies: AtomicU64,
}

impl Context {
    /// Create a context for transaction `id`
    pub fn new(id: u64) -> Self {
        Self {
            id,
            created: Instant::now(),
            state: Mutex::new(State::default()),
            suspension: Mutex::new(Suspension::Running),
            anomalies: AtomicU64::new(0),
        }
    }

    /// Transaction id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Store a value, replacing any previous value in place
    pub fn put<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        let key = key.into();
        let value: Value = Arc::new(value);
        let mut state = self.state.lock();
        match state.entries.iter().position(|(k, _)| *k == key) {
            Some(i) => state.entries[i].1 = value,
            None => state.entries.push((key, value)),
        }
    }

    /// Fetch a value of type `T`; `None` if absent or of another type
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = {
            let state = self.state.lock();
            state
                .entries
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())?
        };
        value.downcast::<T>().ok()
    }

    /// Remove a value; true if it was present
    pub fn remove(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|(k, _)| k != key);
        state.entries.len() != before
    }

    /// Whether a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.iter().any(|(k, _)| k == key)
    }

    /// Keys in insertion order
    pub fn keys(&self) -> Vec<String> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Record a success entry
    pub fn success(&self, code: &str, message: &str) {
        self.state
            .lock()
            .result
            .push(ResultKind::Success, code, message);
    }

    /// Record a failure entry
    pub fn fail(&self, code: &str, message: &str) {
        self.state.lock().result.push(ResultKind::Fail, code, message);
    }

    /// Snapshot of the result
    pub fn result(&self) -> TxnResult {
        self.state.lock().result.clone()
    }

    /// Add a trace point
    pub fn checkpoint(&self, label: impl Into<String>) {
        let checkpoint = Checkpoint {
            label: label.into(),
            elapsed_ms: self.created.elapsed().as_millis() as u64,
            at: Utc::now(),
        };
        self.state.lock().trace.push(checkpoint);
    }

    /// Snapshot of the trace
    pub fn trace(&self) -> Vec<Checkpoint> {
        self.state.lock().trace.clone()
    }

    /// Suspend the transaction until [`Context::resume`] is called.
    ///
    /// Called by the driver after a participant answered `PAUSE`. If the
    /// resume already happened, the returned handle is ready immediately.
    pub fn pause(&self) -> PausedTransaction {
        let mut suspension = self.suspension.lock();
        match std::mem::replace(&mut *suspension, Suspension::Resumed) {
            Suspension::Early(flags) => {
                debug!(id = self.id, "Resume arrived before pause");
                PausedTransaction::Ready(flags)
            }
            Suspension::Destroyed => {
                *suspension = Suspension::Destroyed;
                PausedTransaction::Destroyed
            }
            previous => {
                if matches!(previous, Suspension::Waiting(_)) {
                    self.anomaly("pause called on a paused context");
                }
                let (tx, rx) = oneshot::channel();
                *suspension = Suspension::Waiting(tx);
                PausedTransaction::Waiting(rx)
            }
        }
    }

    /// Hand the transaction back to the driver with the final flags of the
    /// paused phase.
    ///
    /// Only the first resume per pause is honoured; returns false when the
    /// call was ignored.
    pub fn resume(&self, flags: ResultFlags) -> bool {
        let mut suspension = self.suspension.lock();
        match std::mem::replace(&mut *suspension, Suspension::Resumed) {
            Suspension::Running => {
                *suspension = Suspension::Early(flags);
                true
            }
            Suspension::Waiting(tx) => {
                if tx.send(flags).is_err() {
                    debug!(id = self.id, "Driver stopped waiting before resume");
                }
                true
            }
            previous @ (Suspension::Early(_) | Suspension::Resumed) => {
                *suspension = previous;
                drop(suspension);
                self.anomaly("duplicate resume ignored");
                false
            }
            Suspension::Destroyed => {
                *suspension = Suspension::Destroyed;
                drop(suspension);
                self.anomaly("resume on destroyed context ignored");
                false
            }
        }
    }

    /// Whether a driver is waiting on this context
    pub fn is_paused(&self) -> bool {
        matches!(*self.suspension.lock(), Suspension::Waiting(_))
    }

    /// Mark the transaction finished. Later resumes are ignored and a
    /// waiting driver wakes with no flags.
    pub fn destroy(&self) {
        *self.suspension.lock() = Suspension::Destroyed;
    }

    /// Whether [`Context::destroy`] was called
    pub fn is_destroyed(&self) -> bool {
        matches!(*self.suspension.lock(), Suspension::Destroyed)
    }

    /// Number of protocol violations observed
    pub fn anomalies(&self) -> u64 {
        self.anomalies.load(Ordering::Relaxed)
    }

    /// Accept the next resume as belonging to a new pause cycle
    pub(crate) fn rearm(&self) {
        let mut suspension = self.suspension.lock();
        if matches!(*suspension, Suspension::Resumed) {
            *suspension = Suspension::Running;
        }
    }

    /// Give up waiting: a later resume counts as a duplicate
    pub(crate) fn cancel_pause(&self) {
        let mut suspension = self.suspension.lock();
        if matches!(*suspension, Suspension::Waiting(_)) {
            *suspension = Suspension::Resumed;
        }
    }

    /// Drop a resume nobody paused for
    pub(crate) fn discard_stray_resume(&self) {
        let mut suspension = self.suspension.lock();
        if matches!(*suspension, Suspension::Early(_)) {
            *suspension = Suspension::Running;
            drop(suspension);
            self.anomaly("resume without pause discarded");
        }
    }

    fn anomaly(&self, what: &str) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
        warn!(id = self.id, "Context protocol violation: {}", what);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("keys", &self.keys())
            .field("anomalies", &self.anomalies())
            .finish()
    }
}

/// Handle returned by [`Context::pause`]
#[derive(Debug)]
pub enum PausedTransaction {
    /// Resume already happened
    Ready(ResultFlags),
    /// Waiting for a resume
    Waiting(oneshot::Receiver<ResultFlags>),
    /// Context destroyed; no resume will come
    Destroyed,
}

impl PausedTransaction {
    /// Wait for the resume flags; `None` if the context was destroyed
    pub async fn resumed(self) -> Option<ResultFlags> {
        match self {
            PausedTransaction::Ready(flags) => Some(flags),
            PausedTransaction::Waiting(rx) => rx.await.ok(),
            PausedTransaction::Destroyed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_put_get_typed() {
        let ctx = Context::new(1);
        ctx.put("AMOUNT", 1_000u64);
        ctx.put("CURRENCY", "USD".to_string());

        assert_eq!(*ctx.get::<u64>("AMOUNT").unwrap(), 1_000);
        assert_eq!(ctx.get::<String>("CURRENCY").unwrap().as_str(), "USD");
        assert!(ctx.get::<String>("AMOUNT").is_none());
        assert!(ctx.get::<u64>("MISSING").is_none());
    }

    #[test]
    fn test_insertion_order_kept_on_replace() {
        let ctx = Context::new(1);
        ctx.put("A", 1u8);
        ctx.put("B", 2u8);
        ctx.put("C", 3u8);
        ctx.put("A", 10u8);

        assert_eq!(ctx.keys(), vec!["A", "B", "C"]);
        assert_eq!(*ctx.get::<u8>("A").unwrap(), 10);

        assert!(ctx.remove("B"));
        assert!(!ctx.remove("B"));
        assert_eq!(ctx.keys(), vec!["A", "C"]);
        assert!(ctx.contains("C"));
    }

    #[test]
    fn test_result_append_only() {
        let ctx = Context::new(1);
        ctx.success("00", "approved by rule");
        assert!(!ctx.result().is_failed());

        ctx.fail("91", "issuer unavailable");
        ctx.success("00", "late success");

        let result = ctx.result();
        assert!(result.is_failed());
        assert_eq!(result.entries().len(), 3);
        assert_eq!(result.failure().unwrap().code, "91");
    }

    #[test]
    fn test_checkpoints() {
        let ctx = Context::new(1);
        ctx.checkpoint("prepare:a");
        ctx.checkpoint("prepare:b");
        let trace = ctx.trace();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[1].label, "prepare:b");
        assert!(trace[0].elapsed_ms <= trace[1].elapsed_ms);
    }

    #[tokio::test]
    async fn test_pause_then_resume() {
        let ctx = Arc::new(Context::new(7));
        let paused = ctx.pause();
        assert!(ctx.is_paused());

        let resumer = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(resumer.resume(ResultFlags::PREPARED));
        });

        assert_eq!(paused.resumed().await, Some(ResultFlags::PREPARED));
        assert!(!ctx.is_paused());
        assert_eq!(ctx.anomalies(), 0);
    }

    #[tokio::test]
    async fn test_resume_before_pause() {
        let ctx = Context::new(7);
        assert!(ctx.resume(ResultFlags::ABORTED));
        let paused = ctx.pause();
        assert!(matches!(paused, PausedTransaction::Ready(_)));
        assert_eq!(paused.resumed().await, Some(ResultFlags::ABORTED));
    }

    #[tokio::test]
    async fn test_second_resume_ignored() {
        let ctx = Context::new(7);
        let paused = ctx.pause();

        assert!(ctx.resume(ResultFlags::PREPARED));
        assert!(!ctx.resume(ResultFlags::ABORTED));

        assert_eq!(paused.resumed().await, Some(ResultFlags::PREPARED));
        assert_eq!(ctx.anomalies(), 1);
    }

    #[tokio::test]
    async fn test_resume_after_destroy_ignored() {
        let ctx = Context::new(7);
        let paused = ctx.pause();
        ctx.destroy();

        assert!(!ctx.resume(ResultFlags::PREPARED));
        assert!(ctx.is_destroyed());
        assert_eq!(paused.resumed().await, None);
        assert_eq!(ctx.anomalies(), 1);

        assert!(matches!(ctx.pause(), PausedTransaction::Destroyed));
    }

    #[tokio::test]
    async fn test_second_pause_cycle() {
        let ctx = Context::new(7);
        let first = ctx.pause();
        assert!(ctx.resume(ResultFlags::PREPARED));
        assert_eq!(first.resumed().await, Some(ResultFlags::PREPARED));

        let second = ctx.pause();
        assert!(ctx.resume(ResultFlags::PREPARED.readonly()));
        assert_eq!(second.resumed().await, Some(ResultFlags::PREPARED.readonly()));
        assert_eq!(ctx.anomalies(), 0);
    }

    #[tokio::test]
    async fn test_early_resume_after_rearm() {
        let ctx = Context::new(7);
        let first = ctx.pause();
        assert!(ctx.resume(ResultFlags::PREPARED));
        assert_eq!(first.resumed().await, Some(ResultFlags::PREPARED));

        ctx.rearm();
        assert!(ctx.resume(ResultFlags::ABORTED));
        assert_eq!(ctx.pause().resumed().await, Some(ResultFlags::ABORTED));
        assert_eq!(ctx.anomalies(), 0);
    }

    #[test]
    fn test_stray_resume_discarded() {
        let ctx = Context::new(7);
        assert!(ctx.resume(ResultFlags::PREPARED));
        ctx.discard_stray_resume();
        assert_eq!(ctx.anomalies(), 1);
        assert!(matches!(ctx.pause(), PausedTransaction::Waiting(_)));
    }
}
