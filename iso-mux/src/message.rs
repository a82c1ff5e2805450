//! ISO-8583 message model
//!
//! Field codecs are not part of this crate: an [`IsoMsg`] is a sparse map of
//! field index to its already-unpacked string value, plus optional raw
//! header bytes. Field 0 carries the MTI.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Highest field index accepted (tertiary bitmap)
pub const MAX_FIELD: u16 = 192;

/// Field carrying the message type indicator
pub const MTI_FIELD: u16 = 0;

/// ISO-8583 message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsoMsg {
    fields: BTreeMap<u16, String>,

    #[serde(skip)]
    header: Option<Bytes>,
}

impl IsoMsg {
    /// Create an empty message
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a message with the given MTI
    pub fn with_mti(mti: impl Into<String>) -> Self {
        let mut msg = Self::new();
        msg.set_mti(mti);
        msg
    }

    /// Builder-style field setter
    pub fn with_field(mut self, field: u16, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    /// Set a field. Indices above [`MAX_FIELD`] are ignored.
    pub fn set(&mut self, field: u16, value: impl Into<String>) {
        if field > MAX_FIELD {
            tracing::warn!(field, "Ignoring field beyond maximum index");
            return;
        }
        self.fields.insert(field, value.into());
    }

    /// Get a field value
    pub fn get(&self, field: u16) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    /// Remove a field, returning its previous value
    pub fn unset(&mut self, field: u16) -> Option<String> {
        self.fields.remove(&field)
    }

    /// Whether the field is present
    pub fn has_field(&self, field: u16) -> bool {
        self.fields.contains_key(&field)
    }

    /// Highest field index present (0 for an empty message)
    pub fn max_field(&self) -> u16 {
        self.fields.keys().next_back().copied().unwrap_or(0)
    }

    /// Message type indicator
    pub fn mti(&self) -> Option<&str> {
        self.get(MTI_FIELD)
    }

    /// Set the message type indicator
    pub fn set_mti(&mut self, mti: impl Into<String>) {
        self.set(MTI_FIELD, mti);
    }

    /// Function digit of the MTI (third position), if well formed
    fn function_digit(&self) -> Option<u32> {
        self.mti()
            .filter(|mti| mti.len() == 4)
            .and_then(|mti| mti.chars().nth(2))
            .and_then(|c| c.to_digit(10))
    }

    /// Request MTIs have an even function digit (x0xx, x2xx, ...)
    pub fn is_request(&self) -> bool {
        matches!(self.function_digit(), Some(d) if d % 2 == 0)
    }

    /// Response MTIs have an odd function digit (x1xx, x3xx, ...)
    pub fn is_response(&self) -> bool {
        matches!(self.function_digit(), Some(d) if d % 2 == 1)
    }

    /// Turn a request MTI into its response MTI (0200 → 0210).
    ///
    /// Messages that are already responses, or have no well formed MTI, are
    /// left untouched.
    pub fn set_response_mti(&mut self) {
        if !self.is_request() {
            return;
        }
        if let Some(mti) = self.mti() {
            let mut digits: Vec<char> = mti.chars().collect();
            if let Some(d) = digits[2].to_digit(10) {
                if let Some(next) = char::from_digit(d + 1, 10) {
                    digits[2] = next;
                }
            }
            let response: String = digits.into_iter().collect();
            self.set_mti(response);
        }
    }

    /// Raw header bytes
    pub fn header(&self) -> Option<&Bytes> {
        self.header.as_ref()
    }

    /// Set raw header bytes
    pub fn set_header(&mut self, header: impl Into<Bytes>) {
        self.header = Some(header.into());
    }

    /// Copy only the listed fields into a new message
    pub fn clone_fields(&self, fields: &[u16]) -> IsoMsg {
        let mut msg = IsoMsg::new();
        for field in fields {
            if let Some(value) = self.get(*field) {
                msg.set(*field, value);
            }
        }
        msg.header = self.header.clone();
        msg
    }

    /// Iterate over present fields in ascending index order
    pub fn fields(&self) -> impl Iterator<Item = (u16, &str)> {
        self.fields.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_access() {
        let mut msg = IsoMsg::with_mti("0200");
        msg.set(11, "000001");
        msg.set(41, "TERM0001");

        assert_eq!(msg.mti(), Some("0200"));
        assert_eq!(msg.get(11), Some("000001"));
        assert!(msg.has_field(41));
        assert_eq!(msg.max_field(), 41);

        assert_eq!(msg.unset(41), Some("TERM0001".to_string()));
        assert_eq!(msg.max_field(), 11);
    }

    #[test]
    fn test_field_beyond_max_is_ignored() {
        let mut msg = IsoMsg::new();
        msg.set(MAX_FIELD + 1, "x");
        assert!(!msg.has_field(MAX_FIELD + 1));
        assert_eq!(msg.max_field(), 0);
    }

    #[test]
    fn test_response_mti() {
        let mut msg = IsoMsg::with_mti("0200");
        assert!(msg.is_request());
        msg.set_response_mti();
        assert_eq!(msg.mti(), Some("0210"));
        assert!(msg.is_response());

        // Already a response: unchanged
        msg.set_response_mti();
        assert_eq!(msg.mti(), Some("0210"));

        let mut network = IsoMsg::with_mti("0800");
        network.set_response_mti();
        assert_eq!(network.mti(), Some("0810"));
    }

    #[test]
    fn test_malformed_mti() {
        let mut msg = IsoMsg::with_mti("02");
        assert!(!msg.is_request());
        assert!(!msg.is_response());
        msg.set_response_mti();
        assert_eq!(msg.mti(), Some("02"));
    }

    #[test]
    fn test_clone_fields_and_header() {
        let mut msg = IsoMsg::with_mti("0200")
            .with_field(2, "4111111111111111")
            .with_field(11, "000042");
        msg.set_header(&b"ISO0160000"[..]);

        let copy = msg.clone_fields(&[0, 11]);
        assert_eq!(copy.mti(), Some("0200"));
        assert_eq!(copy.get(11), Some("000042"));
        assert!(!copy.has_field(2));
        assert_eq!(copy.header().map(|h| &h[..]), Some(&b"ISO0160000"[..]));
    }
}
