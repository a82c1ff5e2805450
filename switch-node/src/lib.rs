//! Switching node
//!
//! Authorizes ISO-8583 requests by running them through configured
//! participants and forwarding them to the remote host over the MUX.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod factory;
pub mod node;
pub mod query_host;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use factory::{build_participant, build_participants, ParticipantDeps, ParticipantDescriptor};
pub use node::{Authorization, SwitchNode};
pub use query_host::QueryHost;
