use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use weft_daemon::{
    config::NodeConfig,
    core::{storage::SledStorage, Node},
    plugins::simulator::{self, SimulatedNetwork},
};

// Standalone entry point. Without external connectors configured this runs
// the node against the in-process simulator plugin set, which is a
// single-party loopback network useful for development.
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = NodeConfig::parse();

    let storage = SledStorage::open(&config.data_dir)
        .with_context(|| format!("opening database at {}", config.data_dir.display()))?;

    let network = SimulatedNetwork::new();
    let plugins = simulator::simulator_plugins(
        Arc::clone(&network),
        &config.org,
        &config.node,
        &config.signing_key,
    );

    let node = Node::new(config, storage, plugins);
    network
        .register_node(
            &node.config().org,
            &node.config().node,
            node.events_sender(),
        )
        .await;
    node.start().await.context("starting node")?;
    info!("Node is up, press ctrl-c to stop");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    node.stop();
    Ok(())
}
