//! Metrics collection for the transaction manager
//!
//! # Metrics
//!
//! - `txn_committed_total` - Transactions committed
//! - `txn_aborted_total` - Transactions aborted
//! - `txn_retried_total` - Restarts requested by participants
//! - `txn_paused_total` - Pauses entered
//! - `txn_in_flight` - Transactions currently executing
//! - `txn_duration_seconds` - Histogram of transaction latencies
//! - `txn_context_anomalies_total` - Pause/resume protocol violations

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct ManagerMetrics {
    /// Committed transactions
    pub committed: IntCounter,

    /// Aborted transactions
    pub aborted: IntCounter,

    /// Retries
    pub retried: IntCounter,

    /// Pauses
    pub paused: IntCounter,

    /// Executing transactions
    pub in_flight: IntGauge,

    /// Transaction duration histogram
    pub duration: Histogram,

    /// Context anomalies
    pub anomalies: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl ManagerMetrics {
    /// Create a collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let committed = IntCounter::new("txn_committed_total", "Transactions committed")?;
        registry.register(Box::new(committed.clone()))?;

        let aborted = IntCounter::new("txn_aborted_total", "Transactions aborted")?;
        registry.register(Box::new(aborted.clone()))?;

        let retried = IntCounter::new("txn_retried_total", "Restarts requested by participants")?;
        registry.register(Box::new(retried.clone()))?;

        let paused = IntCounter::new("txn_paused_total", "Pauses entered")?;
        registry.register(Box::new(paused.clone()))?;

        let in_flight = IntGauge::new("txn_in_flight", "Transactions currently executing")?;
        registry.register(Box::new(in_flight.clone()))?;

        let duration = Histogram::with_opts(
            HistogramOpts::new("txn_duration_seconds", "Histogram of transaction latencies")
                .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 5.0]),
        )?;
        registry.register(Box::new(duration.clone()))?;

        let anomalies = IntCounter::new(
            "txn_context_anomalies_total",
            "Pause/resume protocol violations",
        )?;
        registry.register(Box::new(anomalies.clone()))?;

        Ok(Self {
            committed,
            aborted,
            retried,
            paused,
            in_flight,
            duration,
            anomalies,
            registry,
        })
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
