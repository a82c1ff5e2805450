//! ISO-8583 request/response multiplexer
//!
//! Correlates outbound requests with their inbound responses:
//! - Deterministic correlation keys (mapped MTI + configured fields)
//! - Blocking and listener-based request forms
//! - Deadline expiry independent of the caller
//! - At-most-once completion per request
//! - Unmatched inbound messages routed to an unhandled queue
//! - Observability via Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod channel;
pub mod config;
pub mod error;
pub mod key;
pub mod message;
pub mod metrics;
pub mod mux;

pub use channel::{Channel, MemoryChannel};
pub use config::MuxConfig;
pub use error::{Error, Result};
pub use key::KeyBuilder;
pub use message::IsoMsg;
pub use mux::{Handback, Mux, ResponseListener};
