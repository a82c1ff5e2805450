//! Prometheus metrics for the multiplexer
//!
//! # Metrics
//!
//! - `mux_tx_total` - Requests handed to the channel
//! - `mux_rx_total` - Inbound messages read from the channel
//! - `mux_rx_matched_total` - Inbound messages that completed a request
//! - `mux_rx_expired_total` - Requests that expired without a response
//! - `mux_rx_unhandled_total` - Inbound messages with no pending request
//! - `mux_rx_pending` - Requests currently awaiting a response
//! - `mux_send_errors_total` - Requests that failed to send

use prometheus::{IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct MuxMetrics {
    /// Requests sent
    pub tx_total: IntCounter,

    /// Messages received
    pub rx_total: IntCounter,

    /// Responses matched to a pending request
    pub rx_matched: IntCounter,

    /// Requests expired
    pub rx_expired: IntCounter,

    /// Unmatched inbound messages
    pub rx_unhandled: IntCounter,

    /// Pending requests
    pub rx_pending: IntGauge,

    /// Send failures
    pub send_errors: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl MuxMetrics {
    /// Create a collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let tx_total = IntCounter::new("mux_tx_total", "Requests handed to the channel")?;
        registry.register(Box::new(tx_total.clone()))?;

        let rx_total = IntCounter::new("mux_rx_total", "Inbound messages read from the channel")?;
        registry.register(Box::new(rx_total.clone()))?;

        let rx_matched = IntCounter::new(
            "mux_rx_matched_total",
            "Inbound messages that completed a request",
        )?;
        registry.register(Box::new(rx_matched.clone()))?;

        let rx_expired = IntCounter::new(
            "mux_rx_expired_total",
            "Requests that expired without a response",
        )?;
        registry.register(Box::new(rx_expired.clone()))?;

        let rx_unhandled = IntCounter::new(
            "mux_rx_unhandled_total",
            "Inbound messages with no pending request",
        )?;
        registry.register(Box::new(rx_unhandled.clone()))?;

        let rx_pending = IntGauge::new("mux_rx_pending", "Requests awaiting a response")?;
        registry.register(Box::new(rx_pending.clone()))?;

        let send_errors = IntCounter::new("mux_send_errors_total", "Requests that failed to send")?;
        registry.register(Box::new(send_errors.clone()))?;

        Ok(Self {
            tx_total,
            rx_total,
            rx_matched,
            rx_expired,
            rx_unhandled,
            rx_pending,
            send_errors,
            registry,
        })
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = MuxMetrics::new().unwrap();
        assert_eq!(metrics.tx_total.get(), 0);
        assert_eq!(metrics.rx_pending.get(), 0);
    }

    #[test]
    fn test_independent_registries() {
        let a = MuxMetrics::new().unwrap();
        let b = MuxMetrics::new().unwrap();
        a.tx_total.inc();
        assert_eq!(a.tx_total.get(), 1);
        assert_eq!(b.tx_total.get(), 0);
        assert_eq!(a.registry().gather().len(), 7);
    }
}
