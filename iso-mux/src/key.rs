//! Correlation keys
//!
//! A request and its response must map to the same key. The key is the
//! mapped MTI followed by the values of the configured fields:
//!
//! ```text
//! 0200 + [41=TERM0001, 11=000042]  ->  "0200|TERM0001|000042"
//! 0210 + [41=TERM0001, 11=000042]  ->  "0200|TERM0001|000042"
//! ```
//!
//! The default mapping folds odd function digits onto the even request
//! digit, so 0200/0210 and 0800/0810 pair up.

use crate::config::MuxConfig;
use crate::message::IsoMsg;
use crate::{Error, Result};

/// Builds correlation keys from messages
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    fields: Vec<u16>,
    mapping: [[char; 10]; 3],
}

impl KeyBuilder {
    /// Create a key builder from validated configuration
    pub fn new(config: &MuxConfig) -> Result<Self> {
        config.validate()?;

        let mut mapping = [['0'; 10]; 3];
        for (pos, digits) in config.mti_mapping.iter().enumerate() {
            for (i, c) in digits.chars().enumerate() {
                mapping[pos][i] = c;
            }
        }

        Ok(Self {
            fields: config.key_fields.clone(),
            mapping,
        })
    }

    /// Compute the correlation key for a message
    pub fn key(&self, msg: &IsoMsg) -> Result<String> {
        let mut key = self.map_mti(msg.mti().unwrap_or_default());

        for field in &self.fields {
            let value = msg
                .get(*field)
                .ok_or(Error::MissingKeyField { field: *field })?;
            key.push('|');
            key.push_str(value.trim());
        }

        Ok(key)
    }

    fn map_mti(&self, mti: &str) -> String {
        mti.chars()
            .enumerate()
            .map(|(pos, c)| match (pos, c.to_digit(10)) {
                (0..=2, Some(d)) => self.mapping[pos][d as usize],
                _ => c,
            })
            .collect()
    }
}
