//! Configuration for the transaction manager

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Transaction manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Restarts allowed per transaction before it is aborted
    pub max_retries: u32,

    /// Delay between a RETRY and the restart (milliseconds)
    pub retry_delay_ms: u64,

    /// Transactions allowed to hold a worker at once
    pub max_in_flight: usize,

    /// Upper bound on a pause (milliseconds, 0 = wait forever)
    pub pause_timeout_ms: u64,

    /// Manager mailbox capacity
    pub queue_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 100,
            max_in_flight: 100,
            pause_timeout_ms: 0,
            queue_capacity: 1_000,
        }
    }
}

impl ManagerConfig {
    /// Retry delay as a duration
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Pause bound, `None` when unbounded
    pub fn pause_timeout(&self) -> Option<Duration> {
        (self.pause_timeout_ms > 0).then(|| Duration::from_millis(self.pause_timeout_ms))
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight == 0 {
            return Err(Error::Config("max_in_flight must be positive".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be positive".to_string()));
        }
        Ok(())
    }

    /// Load from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from a variable lookup, falling back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = ManagerConfig::default();

        if let Some(v) = lookup("TXN_MAX_RETRIES") {
            config.max_retries = parse_var("TXN_MAX_RETRIES", &v)?;
        }

        if let Some(v) = lookup("TXN_RETRY_DELAY_MS") {
            config.retry_delay_ms = parse_var("TXN_RETRY_DELAY_MS", &v)?;
        }

        if let Some(v) = lookup("TXN_MAX_IN_FLIGHT") {
            config.max_in_flight = parse_var("TXN_MAX_IN_FLIGHT", &v)?;
        }

        if let Some(v) = lookup("TXN_PAUSE_TIMEOUT_MS") {
            config.pause_timeout_ms = parse_var("TXN_PAUSE_TIMEOUT_MS", &v)?;
        }

        if let Some(v) = lookup("TXN_QUEUE_CAPACITY") {
            config.queue_capacity = parse_var("TXN_QUEUE_CAPACITY", &v)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{} has invalid value '{}'", name, value)))
}
