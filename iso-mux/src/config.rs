//! Multiplexer configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Multiplexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    /// Fields whose values make up the correlation key, in order
    pub key_fields: Vec<u16>,

    /// Digit mapping for the first three MTI positions
    pub mti_mapping: Vec<String>,

    /// Delay before reconnecting after a receive failure (milliseconds)
    pub reconnect_delay_ms: u64,

    /// Capacity of the unhandled message queue
    pub unhandled_capacity: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            key_fields: vec![41, 11],
            mti_mapping: vec![
                "0123456789".to_string(),
                "0123456789".to_string(),
                "0022446689".to_string(),
            ],
            reconnect_delay_ms: 1_000,
            unhandled_capacity: 1_024,
        }
    }
}

impl MuxConfig {
    /// Reconnect delay as a duration
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Validate settings, failing fast on anything unusable
    pub fn validate(&self) -> Result<()> {
        if self.key_fields.is_empty() {
            return Err(Error::Config("key_fields must not be empty".to_string()));
        }
        if self.mti_mapping.len() != 3 {
            return Err(Error::Config(format!(
                "mti_mapping needs 3 entries, got {}",
                self.mti_mapping.len()
            )));
        }
        for (pos, mapping) in self.mti_mapping.iter().enumerate() {
            if mapping.len() != 10 || !mapping.chars().all(|c| c.is_ascii_digit()) {
                return Err(Error::Config(format!(
                    "mti_mapping[{}] must be 10 digits, got '{}'",
                    pos, mapping
                )));
            }
        }
        if self.unhandled_capacity == 0 {
            return Err(Error::Config(
                "unhandled_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
