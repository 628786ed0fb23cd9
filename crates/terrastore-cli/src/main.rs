//! # Terrastore Node Entry Point
//!
//! Starts one Terrastore node from a JSON configuration file and serves its
//! cluster's share of the bucket space until interrupted.
//!
//! ## Usage
//!
//! ```bash
//! # Start a node
//! terrastore server -c node.json
//!
//! # Fetch one value from a running node (for smoke tests and scripting)
//! terrastore get 127.0.0.1:6200 books dune
//! ```
//!
//! The configuration surface is documented on
//! [`terrastore_cluster::config::Config`]; a minimal file is
//! `{"node": {"id": "node-1"}}`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use argh::FromArgs;
use tracing::info;

use terrastore_cluster::config::Config;
use terrastore_cluster::{
    AddressTable, Coordinator, EnsembleManager, LocalGroupMembership, RemoteNode,
};
use terrastore_common::protocol::{Command, NodeAddress};
use terrastore_routing::{Cluster, Node, Router};
use terrastore_service::StatsService;
use terrastore_store::{MemoryEventBus, Store};

/// Terrastore - distributed document store
#[derive(FromArgs)]
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Server(ServerArgs),
    Get(GetArgs),
}

/// start a Terrastore node
#[derive(FromArgs)]
#[argh(subcommand, name = "server")]
struct ServerArgs {
    /// path to the JSON configuration file
    #[argh(option, short = 'c')]
    config: String,
}

/// fetch one value from a running node
#[derive(FromArgs)]
#[argh(subcommand, name = "get")]
struct GetArgs {
    /// node endpoint, e.g. 127.0.0.1:6200
    #[argh(positional)]
    endpoint: String,

    /// bucket name
    #[argh(positional)]
    bucket: String,

    /// key
    #[argh(positional)]
    key: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli: Cli = argh::from_env();
    match cli.command {
        Commands::Server(args) => run_server(&args.config).await,
        Commands::Get(args) => run_get(&args.endpoint, &args.bucket, &args.key).await,
    }
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = Config::load(config_path)?;
    if config.event_bus.implementation != "memory" {
        anyhow::bail!(
            "Unsupported event bus implementation: {} (only \"memory\" is built in)",
            config.event_bus.implementation
        );
    }

    let store = Arc::new(Store::new(MemoryEventBus::new(Vec::new())));
    let router = Arc::new(Router::new(config.cluster.partitions));

    let mut clusters = vec![Cluster::local(config.cluster.name.clone())];
    clusters.extend(
        config
            .ensemble
            .clusters
            .keys()
            .map(|name| Cluster::remote(name.clone())),
    );
    router.setup_clusters(clusters)?;

    let membership = Arc::new(LocalGroupMembership::new());
    let address_table = Arc::new(AddressTable::new());
    let coordinator = Coordinator::new(
        &config,
        store,
        router.clone(),
        membership.clone(),
        address_table,
    );
    let port = coordinator.start().await?;
    membership.join(config.node.id.clone());
    info!(
        "Node {} of cluster {} serving on {}:{}",
        config.node.id, config.cluster.name, config.node.host, port
    );

    if !config.ensemble.clusters.is_empty() {
        let node_timeout = Duration::from_millis(config.node.timeout_ms);
        EnsembleManager::new(router.clone(), &config.ensemble, node_timeout).spawn();
        info!(
            "Polling {} remote cluster(s) with the {:?} strategy",
            config.ensemble.clusters.len(),
            config.ensemble.strategy
        );
    }

    let stats = StatsService::new(router);

    tokio::signal::ctrl_c().await?;
    if let Ok(report) = stats.ensemble_stats() {
        info!(
            "Shutting down with {} cluster(s) routed",
            report.clusters.len()
        );
    }
    coordinator.shutdown().await;
    Ok(())
}

async fn run_get(endpoint: &str, bucket: &str, key: &str) -> Result<()> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("Endpoint must be host:port, got {}", endpoint))?;
    let port: u16 = port.parse()?;

    let node = RemoteNode::new(
        NodeAddress::new("cli", host, port),
        Duration::from_secs(5),
    );
    node.connect().await?;
    let value = node
        .send(Command::GetValue {
            bucket: bucket.to_string(),
            key: key.to_string(),
            predicate: None,
        })
        .await?
        .into_value()?;
    node.disconnect().await;

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
