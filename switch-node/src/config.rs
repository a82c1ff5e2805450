//! Configuration for the switching node

use crate::factory::{ParticipantDescriptor, REQUEST, RESPONSE};
use crate::{Error, Result};
use iso_mux::MuxConfig;
use serde::{Deserialize, Serialize};
use txn_core::ManagerConfig;

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Service name
    pub service_name: String,

    /// Metrics listen address
    pub metrics_listen_addr: String,

    /// Transaction manager configuration
    pub manager: ManagerConfig,

    /// Multiplexer configuration
    pub mux: MuxConfig,

    /// Participants in prepare order
    pub participants: Vec<ParticipantDescriptor>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            service_name: "switch-node".to_string(),
            metrics_listen_addr: "0.0.0.0:9092".to_string(),
            manager: ManagerConfig::default(),
            mux: MuxConfig::default(),
            participants: vec![
                ParticipantDescriptor::CheckField {
                    field: 11,
                    request_key: REQUEST.to_string(),
                },
                ParticipantDescriptor::CheckField {
                    field: 41,
                    request_key: REQUEST.to_string(),
                },
                ParticipantDescriptor::Join {
                    name: Some("risk".to_string()),
                    participants: vec![
                        ParticipantDescriptor::Script {
                            name: "velocity".to_string(),
                        },
                        ParticipantDescriptor::Script {
                            name: "fraud".to_string(),
                        },
                    ],
                },
                ParticipantDescriptor::QueryHost {
                    request_key: REQUEST.to_string(),
                    response_key: RESPONSE.to_string(),
                    timeout_ms: 30_000,
                    continuations: true,
                },
            ],
        }
    }
}

impl NodeConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = NodeConfig {
            manager: ManagerConfig::from_env()?,
            ..Default::default()
        };

        if let Ok(name) = std::env::var("SWITCH_SERVICE_NAME") {
            config.service_name = name;
        }

        if let Ok(addr) = std::env::var("SWITCH_METRICS_ADDR") {
            config.metrics_listen_addr = addr;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate nested settings
    pub fn validate(&self) -> Result<()> {
        self.manager.validate()?;
        self.mux.validate()?;
        if self.participants.is_empty() {
            return Err(Error::Config("no participants configured".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.service_name, "switch-node");
        assert_eq!(config.participants.len(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_sections() {
        let config: NodeConfig = toml::from_str(
            r#"
            service_name = "acquirer-a"

            [manager]
            max_in_flight = 8

            [mux]
            key_fields = [41, 11, 37]

            [[participants]]
            kind = "pause"
            timeout_ms = 200
            "#,
        )
        .unwrap();

        assert_eq!(config.service_name, "acquirer-a");
        assert_eq!(config.manager.max_in_flight, 8);
        assert_eq!(config.manager.max_retries, 3);
        assert_eq!(config.mux.key_fields, vec![41, 11, 37]);
        assert_eq!(
            config.participants,
            vec![ParticipantDescriptor::Pause {
                name: None,
                timeout_ms: 200,
            }]
        );
    }

    #[test]
    fn test_invalid_nested_config() {
        let mut config = NodeConfig::default();
        config.mux.key_fields.clear();
        assert!(matches!(
            config.validate(),
            Err(Error::Mux(iso_mux::Error::Config(_)))
        ));

        let config = NodeConfig {
            participants: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            NodeConfig::from_file("/nonexistent/switch.toml"),
            Err(Error::Io(_))
        ));
    }
}
