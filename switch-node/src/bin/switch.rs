//! Switching node binary
//!
//! Runs against a loopback host over an in-memory channel and pushes one
//! sample authorization through the configured participants.

use anyhow::Context as _;
use iso_mux::{Channel, IsoMsg, MemoryChannel};
use std::sync::Arc;
use switch_node::{NodeConfig, SwitchNode};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if std::env::var("SWITCH_LOG_JSON").map_or(false, |v| v == "1") {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Approves every request it receives
fn spawn_loopback_host(remote: Arc<MemoryChannel>) {
    tokio::spawn(async move {
        while let Ok(request) = remote.receive().await {
            let mut response = request.clone();
            response.set_response_mti();
            response.set(39, "00");
            if let Err(e) = remote.send(response).await {
                tracing::warn!("Loopback host failed to answer: {}", e);
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = match std::env::args().nth(1) {
        Some(path) => NodeConfig::from_file(&path)
            .with_context(|| format!("loading config from {}", path))?,
        None => NodeConfig::from_env().context("loading config from environment")?,
    };

    tracing::info!("Starting {}", config.service_name);

    let (local, remote) = MemoryChannel::pair("host");
    spawn_loopback_host(Arc::new(remote));

    let node = SwitchNode::build(config, Arc::new(local))?;

    let request = IsoMsg::with_mti("0200")
        .with_field(2, "4111111111111111")
        .with_field(3, "000000")
        .with_field(4, "000000001000")
        .with_field(11, "000001")
        .with_field(41, "TERM0001");

    let authorization = node.authorize(request).await?;
    tracing::info!(
        outcome = %serde_json::to_string(&authorization.outcome)?,
        response_code = authorization
            .response
            .as_ref()
            .and_then(|rsp| rsp.get(39))
            .unwrap_or("--"),
        "Sample authorization finished"
    );

    tokio::signal::ctrl_c().await?;

    node.shutdown().await?;
    tracing::info!("Switch node stopped");
    Ok(())
}
