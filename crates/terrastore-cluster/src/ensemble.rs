//! Remote-cluster membership polling.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use terrastore_common::protocol::{Command, NodeAddress};
use terrastore_common::{Result, TerrastoreError};
use terrastore_routing::{Cluster, Node, Router};

use crate::config::{EnsembleConfig, PollingStrategy};
use crate::node::RemoteNode;

/// Keeps remote clusters' membership fresh.
///
/// Each tick polls every remote cluster with a `Membership` command: first
/// through the already-connected members, then through the configured seed
/// contacts. A successful answer replaces the cluster's node set in the
/// router; when every contact fails the view is left untouched and the
/// cluster is only unreachable for that tick.
pub struct EnsembleManager {
    router: Arc<Router>,
    node_timeout: Duration,
    strategy: PollingStrategy,
    fixed_interval: Duration,
    controller: AdaptiveController,
    views: Mutex<HashMap<String, ClusterView>>,
}

struct ClusterView {
    cluster: Cluster,
    seeds: Vec<String>,
    nodes: HashMap<String, Arc<RemoteNode>>,
}

impl EnsembleManager {
    pub fn new(router: Arc<Router>, config: &EnsembleConfig, node_timeout: Duration) -> Self {
        let views: HashMap<String, ClusterView> = config
            .clusters
            .iter()
            .map(|(name, seeds)| {
                (
                    name.clone(),
                    ClusterView {
                        cluster: Cluster::remote(name.clone()),
                        seeds: seeds.clone(),
                        nodes: HashMap::new(),
                    },
                )
            })
            .collect();
        Self {
            router,
            node_timeout,
            strategy: config.strategy,
            fixed_interval: Duration::from_millis(config.interval_ms),
            controller: AdaptiveController {
                min: Duration::from_millis(config.min_interval_ms),
                max: Duration::from_millis(config.max_interval_ms),
            },
            views: Mutex::new(views),
        }
    }

    /// Runs the polling loop in the background.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = match self.strategy {
                PollingStrategy::Fixed => self.fixed_interval,
                PollingStrategy::Adaptive => self.controller.min,
            };
            loop {
                tokio::time::sleep(interval).await;
                let started = Instant::now();
                let churned = self.tick().await;
                interval = match self.strategy {
                    PollingStrategy::Fixed => self.fixed_interval,
                    PollingStrategy::Adaptive => {
                        self.controller
                            .next_interval(interval, churned, started.elapsed())
                    }
                };
                debug!("Next ensemble poll in {}ms", interval.as_millis());
            }
        })
    }

    /// Polls every remote cluster once; returns whether any view changed.
    pub async fn tick(&self) -> bool {
        let mut views = self.views.lock().await;
        let mut churned = false;
        for (name, view) in views.iter_mut() {
            match self.poll_cluster(view).await {
                Ok(changed) => churned |= changed,
                Err(e) => warn!("Cluster {} unreachable for this tick: {}", name, e),
            }
        }
        churned
    }

    async fn poll_cluster(&self, view: &mut ClusterView) -> Result<bool> {
        let members = self.fetch_membership(view).await?;
        self.apply_view(view, members).await
    }

    /// Asks the cluster for its membership, trying connected members first
    /// and falling back to the seed contacts.
    async fn fetch_membership(&self, view: &ClusterView) -> Result<Vec<NodeAddress>> {
        for (name, node) in &view.nodes {
            match node.send(Command::Membership).await {
                Ok(result) => return result.into_members(),
                Err(e) => warn!("Membership contact {} failed: {}", name, e),
            }
        }

        for seed in &view.seeds {
            let Some(address) = parse_endpoint(seed) else {
                warn!("Skipping malformed seed contact {}", seed);
                continue;
            };
            let contact = RemoteNode::new(address, self.node_timeout);
            if let Err(e) = contact.connect().await {
                debug!("Seed contact {} unreachable: {}", seed, e);
                continue;
            }
            let outcome = contact.send(Command::Membership).await;
            contact.disconnect().await;
            match outcome {
                Ok(result) => return result.into_members(),
                Err(e) => warn!("Seed contact {} failed: {}", seed, e),
            }
        }

        Err(TerrastoreError::Communication(format!(
            "No reachable contact in cluster {}",
            view.cluster.name()
        )))
    }

    /// Replaces the cluster's node set in the router: departed members are
    /// disconnected and dropped, new addresses connected and inserted.
    async fn apply_view(
        &self,
        view: &mut ClusterView,
        members: Vec<NodeAddress>,
    ) -> Result<bool> {
        let target: HashMap<String, NodeAddress> = members
            .into_iter()
            .map(|address| (address.name.clone(), address))
            .collect();
        let mut changed = false;

        let departed: Vec<String> = view
            .nodes
            .keys()
            .filter(|name| !target.contains_key(*name))
            .cloned()
            .collect();
        for name in departed {
            if let Some(node) = view.nodes.remove(&name) {
                node.disconnect().await;
                if let Err(e) = self.router.remove_route_to(&view.cluster, &name) {
                    warn!("Dropping route to {} failed: {}", name, e);
                }
                info!("Discarded node {} of cluster {}", name, view.cluster.name());
                changed = true;
            }
        }

        for (name, address) in target {
            if view.nodes.contains_key(&name) {
                continue;
            }
            let node = RemoteNode::new(address, self.node_timeout);
            match node.connect().await {
                Ok(()) => {
                    self.router.add_route_to(&view.cluster, node.clone())?;
                    view.nodes.insert(name.clone(), node);
                    info!("Set up node {} of cluster {}", name, view.cluster.name());
                    changed = true;
                }
                Err(e) => warn!("Cannot set up node {}: {}", name, e),
            }
        }

        Ok(changed)
    }
}

fn parse_endpoint(endpoint: &str) -> Option<NodeAddress> {
    let (host, port) = endpoint.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    Some(NodeAddress::new(
        format!("contact@{}", endpoint),
        host,
        port,
    ))
}

/// Interval controller for the adaptive strategy.
///
/// Three bands: a tick that changed the topology polls again soon, a slow
/// tick backs off hard, a quiet tick drifts towards the upper bound. The
/// produced interval is always inside `[min, max]`, and nothing but the
/// current interval carries over between ticks.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveController {
    pub min: Duration,
    pub max: Duration,
}

impl AdaptiveController {
    pub fn next_interval(&self, current: Duration, churned: bool, latency: Duration) -> Duration {
        let scaled = if churned {
            current / 2
        } else if latency * 2 > current {
            current * 2
        } else {
            current * 3 / 2
        };
        scaled.clamp(self.min, self.max)
    }
}
