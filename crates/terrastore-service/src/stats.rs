//! Ensemble topology reporting.

use std::sync::Arc;

use serde::Serialize;

use terrastore_common::Result;
use terrastore_routing::{Node as _, Router};

/// One cluster's membership as currently routed.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ClusterStats {
    pub name: String,
    pub local: bool,
    pub nodes: Vec<String>,
}

/// The whole ensemble, for the front-end's status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EnsembleStats {
    pub clusters: Vec<ClusterStats>,
}

impl EnsembleStats {
    /// Whether every cluster currently has at least one routed member.
    pub fn is_healthy(&self) -> bool {
        self.clusters.iter().all(|c| !c.nodes.is_empty())
    }
}

/// Reports the router's view of the ensemble.
pub struct StatsService {
    router: Arc<Router>,
}

impl StatsService {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }

    pub fn ensemble_stats(&self) -> Result<EnsembleStats> {
        let mut clusters: Vec<ClusterStats> = self
            .router
            .broadcast_route()?
            .into_iter()
            .map(|(cluster, nodes)| {
                let mut names: Vec<String> =
                    nodes.iter().map(|n| n.name().to_string()).collect();
                names.sort_unstable();
                ClusterStats {
                    name: cluster.name().to_string(),
                    local: cluster.is_local(),
                    nodes: names,
                }
            })
            .collect();
        clusters.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(EnsembleStats { clusters })
    }
}
