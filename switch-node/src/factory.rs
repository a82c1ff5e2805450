//! Participant construction from configuration
//!
//! ```toml
//! [[participants]]
//! kind = "check_field"
//! field = 11
//!
//! [[participants]]
//! kind = "join"
//! name = "risk"
//!
//! [[participants.participants]]
//! kind = "script"
//! name = "velocity"
//!
//! [[participants]]
//! kind = "query_host"
//! timeout_ms = 30000
//! ```

use crate::query_host::QueryHost;
use crate::{Error, Result};
use async_trait::async_trait;
use iso_mux::{IsoMsg, Mux};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use txn_core::{Context, Join, Participant, Pause, ResultFlags, WorkerPool};

/// Context key holding the inbound request
pub const REQUEST: &str = "REQUEST";

/// Context key holding the host response
pub const RESPONSE: &str = "RESPONSE";

fn default_request_key() -> String {
    REQUEST.to_string()
}

fn default_response_key() -> String {
    RESPONSE.to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

/// Configured participant, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParticipantDescriptor {
    /// Suspend the transaction, resuming after `timeout_ms` when positive
    Pause {
        /// Participant name, "pause" when absent
        #[serde(default)]
        name: Option<String>,
        /// Resume delay (milliseconds, 0 = never)
        #[serde(default)]
        timeout_ms: u64,
    },

    /// Forward the request to the host through the MUX
    QueryHost {
        /// Context key of the request
        #[serde(default = "default_request_key")]
        request_key: String,
        /// Context key for the response
        #[serde(default = "default_response_key")]
        response_key: String,
        /// Request timeout (milliseconds)
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
        /// Pause instead of blocking a worker
        #[serde(default = "default_true")]
        continuations: bool,
    },

    /// Run the nested participants in parallel. Children may not pause.
    Join {
        /// Participant name, "join" when absent
        #[serde(default)]
        name: Option<String>,
        /// Children in merge order
        participants: Vec<ParticipantDescriptor>,
    },

    /// Require a field in the request
    CheckField {
        /// Field index
        field: u16,
        /// Context key of the request
        #[serde(default = "default_request_key")]
        request_key: String,
    },

    /// Externally scripted participant
    Script {
        /// Script name
        name: String,
    },
}

impl ParticipantDescriptor {
    /// Whether the built participant may answer `PAUSE`
    pub fn can_pause(&self) -> bool {
        match self {
            ParticipantDescriptor::Pause { .. } => true,
            ParticipantDescriptor::QueryHost { continuations, .. } => *continuations,
            ParticipantDescriptor::Join { participants, .. } => {
                participants.iter().any(ParticipantDescriptor::can_pause)
            }
            ParticipantDescriptor::CheckField { .. } | ParticipantDescriptor::Script { .. } => {
                false
            }
        }
    }
}

/// Shared collaborators participants are built with
#[derive(Clone)]
pub struct ParticipantDeps {
    /// Multiplexer for host queries
    pub mux: Option<Mux>,
    /// Pool running Join children
    pub pool: WorkerPool,
}

/// Build one participant from its descriptor
pub fn build_participant(
    descriptor: &ParticipantDescriptor,
    deps: &ParticipantDeps,
) -> Result<Arc<dyn Participant>> {
    let participant: Arc<dyn Participant> = match descriptor {
        ParticipantDescriptor::Pause { name, timeout_ms } => Arc::new(Pause::new(
            name.as_deref().unwrap_or("pause"),
            Duration::from_millis(*timeout_ms),
        )),
        ParticipantDescriptor::QueryHost {
            request_key,
            response_key,
            timeout_ms,
            continuations,
        } => {
            let mux = deps
                .mux
                .clone()
                .ok_or_else(|| Error::Config("query_host needs a MUX".to_string()))?;
            Arc::new(QueryHost::new(
                mux,
                request_key.clone(),
                response_key.clone(),
                Duration::from_millis(*timeout_ms),
                *continuations,
            ))
        }
        ParticipantDescriptor::Join { name, participants } => {
            let name = name.as_deref().unwrap_or("join");
            if participants.iter().any(ParticipantDescriptor::can_pause) {
                return Err(Error::Config(format!(
                    "join '{}' contains a participant that can pause",
                    name
                )));
            }
            let children = build_participants(participants, deps)?;
            Arc::new(Join::new(name, children, deps.pool.clone())?)
        }
        ParticipantDescriptor::CheckField { field, request_key } => {
            Arc::new(CheckField::new(*field, request_key.clone()))
        }
        ParticipantDescriptor::Script { name } => Arc::new(Script { name: name.clone() }),
    };
    debug!(participant = participant.name(), "Participant built");
    Ok(participant)
}

/// Build an ordered participant list
pub fn build_participants(
    descriptors: &[ParticipantDescriptor],
    deps: &ParticipantDeps,
) -> Result<Vec<Arc<dyn Participant>>> {
    descriptors
        .iter()
        .map(|descriptor| build_participant(descriptor, deps))
        .collect()
}

/// Aborts the transaction when a request field is missing
pub struct CheckField {
    name: String,
    field: u16,
    request_key: String,
}

impl CheckField {
    /// Check `field` of the request stored under `request_key`
    pub fn new(field: u16, request_key: impl Into<String>) -> Self {
        Self {
            name: format!("check-field-{}", field),
            field,
            request_key: request_key.into(),
        }
    }
}

#[async_trait]
impl Participant for CheckField {
    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare(&self, _id: u64, ctx: &Arc<Context>) -> ResultFlags {
        let present = ctx
            .get::<IsoMsg>(&self.request_key)
            .map_or(false, |msg| msg.has_field(self.field));
        if present {
            ResultFlags::PREPARED.readonly().no_join()
        } else {
            ctx.fail("INVALID_REQUEST", &format!("field {} missing", self.field));
            ResultFlags::ABORTED.readonly().no_join()
        }
    }
}

/// Placeholder for a scripted participant; its body lives elsewhere
pub struct Script {
    name: String,
}

#[async_trait]
impl Participant for Script {
    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare(&self, id: u64, _ctx: &Arc<Context>) -> ResultFlags {
        debug!(id, script = %self.name, "Script prepared");
        ResultFlags::PREPARED.readonly()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iso_mux::{MemoryChannel, MuxConfig};

    #[derive(Deserialize)]
    struct Doc {
        participants: Vec<ParticipantDescriptor>,
    }

    fn deps(with_mux: bool) -> ParticipantDeps {
        let mux = with_mux.then(|| {
            let (local, _remote) = MemoryChannel::pair("factory");
            Mux::new(Arc::new(local), MuxConfig::default()).unwrap()
        });
        ParticipantDeps {
            mux,
            pool: WorkerPool::new(4).unwrap(),
        }
    }

    #[test]
    fn test_parse_descriptors() {
        let doc: Doc = toml::from_str(
            r#"
            [[participants]]
            kind = "check_field"
            field = 11

            [[participants]]
            kind = "join"

            [[participants.participants]]
            kind = "script"
            name = "velocity"

            [[participants.participants]]
            kind = "pause"
            timeout_ms = 10

            [[participants]]
            kind = "query_host"
            timeout_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(doc.participants.len(), 3);
        assert_eq!(
            doc.participants[2],
            ParticipantDescriptor::QueryHost {
                request_key: REQUEST.to_string(),
                response_key: RESPONSE.to_string(),
                timeout_ms: 500,
                continuations: true,
            }
        );
        match &doc.participants[1] {
            ParticipantDescriptor::Join { name, participants } => {
                assert_eq!(*name, None);
                assert_eq!(participants.len(), 2);
            }
            other => panic!("expected join, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let parsed: std::result::Result<Doc, _> = toml::from_str(
            r#"
            [[participants]]
            kind = "teleport"
            "#,
        );
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn test_build_participants() {
        let descriptors = vec![
            ParticipantDescriptor::CheckField {
                field: 41,
                request_key: REQUEST.to_string(),
            },
            ParticipantDescriptor::Join {
                name: None,
                participants: vec![ParticipantDescriptor::Script {
                    name: "fraud".to_string(),
                }],
            },
            ParticipantDescriptor::QueryHost {
                request_key: REQUEST.to_string(),
                response_key: RESPONSE.to_string(),
                timeout_ms: 500,
                continuations: false,
            },
        ];

        let built = build_participants(&descriptors, &deps(true)).unwrap();
        let names: Vec<_> = built.iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["check-field-41", "join", "query-host"]);
        assert!(built[1].as_abort_participant().is_some());
    }

    #[tokio::test]
    async fn test_invalid_assemblies_fail_fast() {
        let empty_join = ParticipantDescriptor::Join {
            name: None,
            participants: Vec::new(),
        };
        assert!(matches!(
            build_participant(&empty_join, &deps(false)),
            Err(Error::Txn(txn_core::Error::Config(_)))
        ));

        let host = ParticipantDescriptor::QueryHost {
            request_key: REQUEST.to_string(),
            response_key: RESPONSE.to_string(),
            timeout_ms: 500,
            continuations: true,
        };
        assert!(matches!(
            build_participant(&host, &deps(false)),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_join_rejects_pausing_children() {
        let waiting_host = ParticipantDescriptor::QueryHost {
            request_key: REQUEST.to_string(),
            response_key: RESPONSE.to_string(),
            timeout_ms: 500,
            continuations: true,
        };
        let join = ParticipantDescriptor::Join {
            name: Some("host-and-fraud".to_string()),
            participants: vec![
                waiting_host,
                ParticipantDescriptor::Script {
                    name: "fraud".to_string(),
                },
            ],
        };
        assert!(join.can_pause());
        assert!(matches!(
            build_participant(&join, &deps(true)),
            Err(Error::Config(_))
        ));

        let nested = ParticipantDescriptor::Join {
            name: None,
            participants: vec![ParticipantDescriptor::Join {
                name: None,
                participants: vec![ParticipantDescriptor::Pause {
                    name: None,
                    timeout_ms: 10,
                }],
            }],
        };
        assert!(matches!(
            build_participant(&nested, &deps(false)),
            Err(Error::Config(_))
        ));

        let blocking_host = ParticipantDescriptor::QueryHost {
            request_key: REQUEST.to_string(),
            response_key: RESPONSE.to_string(),
            timeout_ms: 500,
            continuations: false,
        };
        let join = ParticipantDescriptor::Join {
            name: None,
            participants: vec![blocking_host],
        };
        assert!(!join.can_pause());
        assert!(build_participant(&join, &deps(true)).is_ok());
    }

    #[tokio::test]
    async fn test_descriptor_names() {
        let doc: Doc = toml::from_str(
            r#"
            [[participants]]
            kind = "pause"
            name = "cool-off"
            timeout_ms = 10

            [[participants]]
            kind = "join"
            name = "risk"

            [[participants.participants]]
            kind = "script"
            name = "velocity"

            [[participants]]
            kind = "pause"
            "#,
        )
        .unwrap();

        let built = build_participants(&doc.participants, &deps(false)).unwrap();
        let names: Vec<_> = built.iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["cool-off", "risk", "pause"]);
    }

    #[tokio::test]
    async fn test_check_field() {
        let check = CheckField::new(11, REQUEST);
        let ctx = Arc::new(Context::new(1));
        ctx.put(REQUEST, IsoMsg::with_mti("0200").with_field(11, "000001"));
        assert!(check.prepare(1, &ctx).await.is_prepared());

        let strict = CheckField::new(2, REQUEST);
        assert!(strict.prepare(1, &ctx).await.is_aborted());
        assert_eq!(ctx.result().failure().unwrap().code, "INVALID_REQUEST");
    }
}
