//! Route composition over both partitioning tiers.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tracing::info;

use terrastore_common::{Result, TerrastoreError};

use crate::cluster::Cluster;
use crate::node::{Node as _, NodeRef};
use crate::partition::{ClusterPartitioner, EnsemblePartitioner};

/// A key set grouped under its owning node, keyed by node name.
pub type NodeKeyGroups = HashMap<String, (NodeRef, HashSet<String>)>;

/// Composes the ensemble and cluster partitioners behind the routing surface
/// the service layer consumes.
///
/// Route changes serialise through the partitioners' write locks; lookups
/// read the immutable slot tables those writes swap in, so routing a command
/// never blocks behind a rebuild for long.
pub struct Router {
    cluster_partitioner: ClusterPartitioner,
    ensemble_partitioner: EnsemblePartitioner,
    local_cluster: RwLock<Option<Cluster>>,
    local_node: RwLock<Option<NodeRef>>,
}

impl Router {
    pub fn new(max_partitions: usize) -> Self {
        Self {
            cluster_partitioner: ClusterPartitioner::new(max_partitions),
            ensemble_partitioner: EnsemblePartitioner::new(),
            local_cluster: RwLock::new(None),
            local_node: RwLock::new(None),
        }
    }

    /// Declares the ensemble's cluster set. Called once at startup; exactly
    /// one cluster must be flagged local.
    pub fn setup_clusters(&self, clusters: Vec<Cluster>) -> Result<()> {
        let locals: Vec<&Cluster> = clusters.iter().filter(|c| c.is_local()).collect();
        if locals.len() != 1 {
            return Err(TerrastoreError::MissingRoute(format!(
                "Expected exactly one local cluster, found {}",
                locals.len()
            )));
        }
        *self.local_cluster.write() = Some(locals[0].clone());
        self.ensemble_partitioner.setup_clusters(&clusters);
        self.cluster_partitioner.setup_clusters(&clusters);
        info!("Routing over {} clusters", clusters.len());
        Ok(())
    }

    /// Registers the local node and routes to it inside the local cluster.
    pub fn add_route_to_local_node(&self, node: NodeRef) -> Result<()> {
        let local_cluster = self.local_cluster()?;
        *self.local_node.write() = Some(node.clone());
        self.cluster_partitioner.add_node(&local_cluster, node)
    }

    pub fn add_route_to(&self, cluster: &Cluster, node: NodeRef) -> Result<()> {
        self.cluster_partitioner.add_node(cluster, node)
    }

    pub fn remove_route_to(&self, cluster: &Cluster, node_name: &str) -> Result<()> {
        self.cluster_partitioner.remove_node(cluster, node_name)
    }

    /// The node this process runs in, once joined.
    pub fn local_node(&self) -> Result<NodeRef> {
        self.local_node
            .read()
            .clone()
            .ok_or_else(|| TerrastoreError::MissingRoute("Local node not joined".to_string()))
    }

    pub fn local_cluster(&self) -> Result<Cluster> {
        self.local_cluster
            .read()
            .clone()
            .ok_or_else(|| TerrastoreError::MissingRoute("Clusters not set up".to_string()))
    }

    /// The node owning a bucket's slot, across both tiers.
    pub fn route_to_node_for(&self, bucket: &str) -> Result<NodeRef> {
        let cluster = self.ensemble_partitioner.cluster_for(bucket)?;
        self.cluster_partitioner.node_for_bucket(&cluster, bucket)
    }

    /// The node owning a `(bucket, key)` slot, across both tiers.
    pub fn route_to_node_for_key(&self, bucket: &str, key: &str) -> Result<NodeRef> {
        let cluster = self.ensemble_partitioner.cluster_for_key(bucket, key)?;
        self.cluster_partitioner.node_for_key(&cluster, bucket, key)
    }

    /// Partitions a key set by owning node in a single pass.
    ///
    /// The groups are disjoint and their union is the input set; each group's
    /// node is exactly what `route_to_node_for_key` answers for its keys.
    pub fn route_to_nodes_for(&self, bucket: &str, keys: HashSet<String>) -> Result<NodeKeyGroups> {
        let cluster = self.ensemble_partitioner.cluster_for(bucket)?;
        let mut groups: NodeKeyGroups = HashMap::new();
        for key in keys {
            let node = self
                .cluster_partitioner
                .node_for_key(&cluster, bucket, &key)?;
            groups
                .entry(node.name().to_string())
                .or_insert_with(|| (node, HashSet::new()))
                .1
                .insert(key);
        }
        Ok(groups)
    }

    /// All current members of one cluster.
    pub fn cluster_route(&self, cluster: &Cluster) -> Result<Vec<NodeRef>> {
        self.cluster_partitioner.nodes_for(cluster)
    }

    /// Members of every cluster, one entry per cluster.
    ///
    /// A cluster with no reachable members appears with an empty node list;
    /// callers running non-idempotent operations treat that as a routing
    /// failure.
    pub fn broadcast_route(&self) -> Result<HashMap<Cluster, Vec<NodeRef>>> {
        let clusters = self.ensemble_partitioner.clusters();
        if clusters.is_empty() {
            return Err(TerrastoreError::MissingRoute(
                "No clusters configured".to_string(),
            ));
        }
        let mut routes = HashMap::new();
        for cluster in clusters {
            let nodes = self
                .cluster_partitioner
                .nodes_for(&cluster)
                .unwrap_or_default();
            routes.insert(cluster, nodes);
        }
        Ok(routes)
    }

    /// Drops every route and disconnects every known node.
    ///
    /// Safe to call twice; any later routing attempt answers `MissingRoute`.
    pub async fn cleanup(&self) {
        for (_, nodes) in self.broadcast_route().unwrap_or_default() {
            for node in nodes {
                node.disconnect().await;
            }
        }
        self.cluster_partitioner.cleanup();
        *self.local_node.write() = None;
        info!("Routes cleaned up");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use terrastore_common::hash::hash_str;
    use terrastore_common::protocol::{Command, CommandResult};

    struct StubNode {
        name: String,
        disconnected: AtomicBool,
    }

    impl StubNode {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                disconnected: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl Node for StubNode {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, _command: Command) -> Result<CommandResult> {
            Ok(CommandResult::Ack)
        }

        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&self) {
            self.disconnected.store(true, Ordering::SeqCst);
        }
    }

    fn two_clusters() -> Vec<Cluster> {
        vec![Cluster::local("cluster1"), Cluster::remote("cluster2")]
    }

    /// The cluster a bucket hashes to among the given clusters.
    fn owning_cluster(clusters: &[Cluster], bucket: &str) -> Cluster {
        let mut sorted = clusters.to_vec();
        sorted.sort_by(|a, b| a.name().cmp(b.name()));
        sorted[hash_str(bucket) as usize % sorted.len()].clone()
    }

    #[test]
    fn test_unicast_route_to_bucket() {
        let clusters = two_clusters();
        let router = Router::new(1024);
        router.setup_clusters(clusters.clone()).unwrap();

        let target = owning_cluster(&clusters, "bucket");
        let node = StubNode::new("node");
        router.add_route_to(&target, node.clone()).unwrap();

        let routed = router.route_to_node_for("bucket").unwrap();
        assert_eq!(routed.name(), "node");
    }

    #[test]
    fn test_unicast_route_to_bucket_and_key() {
        let clusters = two_clusters();
        let router = Router::new(1024);
        router.setup_clusters(clusters.clone()).unwrap();

        let target = owning_cluster(&clusters, "bucket");
        router.add_route_to(&target, StubNode::new("node")).unwrap();

        let routed = router.route_to_node_for_key("bucket", "key").unwrap();
        assert_eq!(routed.name(), "node");
    }

    #[test]
    fn test_route_to_missing_cluster_nodes() {
        let router = Router::new(1024);
        router.setup_clusters(two_clusters()).unwrap();
        // No nodes added anywhere.
        assert!(matches!(
            router.route_to_node_for("bucket"),
            Err(TerrastoreError::MissingRoute(_))
        ));
    }

    #[test]
    fn test_cluster_route_enumerates_members() {
        let clusters = two_clusters();
        let router = Router::new(1024);
        router.setup_clusters(clusters.clone()).unwrap();
        router
            .add_route_to(&clusters[0], StubNode::new("n1"))
            .unwrap();
        router
            .add_route_to(&clusters[0], StubNode::new("n2"))
            .unwrap();

        let members = router.cluster_route(&clusters[0]).unwrap();
        let names: HashSet<&str> = members.iter().map(|n| n.name()).collect();
        assert_eq!(names, HashSet::from(["n1", "n2"]));
    }

    #[test]
    fn test_broadcast_route_covers_every_cluster_once() {
        let clusters = two_clusters();
        let router = Router::new(1024);
        router.setup_clusters(clusters.clone()).unwrap();
        router.add_route_to_local_node(StubNode::new("n1")).unwrap();
        router
            .add_route_to(&clusters[1], StubNode::new("n2"))
            .unwrap();

        let routes = router.broadcast_route().unwrap();
        assert_eq!(routes.len(), 2);

        let all_names: HashSet<String> = routes
            .values()
            .flatten()
            .map(|n| n.name().to_string())
            .collect();
        assert_eq!(
            all_names,
            HashSet::from(["n1".to_string(), "n2".to_string()])
        );
    }

    #[test]
    fn test_broadcast_route_reports_empty_clusters() {
        let clusters = two_clusters();
        let router = Router::new(1024);
        router.setup_clusters(clusters.clone()).unwrap();
        router.add_route_to_local_node(StubNode::new("n1")).unwrap();

        let routes = router.broadcast_route().unwrap();
        assert_eq!(routes.len(), 2);
        assert!(routes[&clusters[1]].is_empty());
    }

    #[test]
    fn test_key_grouping_partitions_input() {
        let clusters = two_clusters();
        let router = Router::new(1024);
        router.setup_clusters(clusters.clone()).unwrap();

        let target = owning_cluster(&clusters, "bucket");
        for name in ["n1", "n2", "n3"] {
            router.add_route_to(&target, StubNode::new(name)).unwrap();
        }

        let keys: HashSet<String> = (0..100).map(|i| format!("key-{}", i)).collect();
        let groups = router.route_to_nodes_for("bucket", keys.clone()).unwrap();

        // Disjoint groups whose union is the input...
        let mut seen = HashSet::new();
        for (_, (_, group)) in &groups {
            for key in group {
                assert!(seen.insert(key.clone()), "key {} in two groups", key);
            }
        }
        assert_eq!(seen, keys);

        // ...and every group's owner agrees with the unicast route.
        for (name, (node, group)) in &groups {
            assert_eq!(name, node.name());
            for key in group {
                let owner = router.route_to_node_for_key("bucket", key).unwrap();
                assert_eq!(owner.name(), node.name());
            }
        }
    }

    #[test]
    fn test_setup_requires_exactly_one_local() {
        let router = Router::new(1024);
        assert!(router
            .setup_clusters(vec![Cluster::remote("c1"), Cluster::remote("c2")])
            .is_err());
        assert!(router
            .setup_clusters(vec![Cluster::local("c1"), Cluster::local("c2")])
            .is_err());
    }

    #[tokio::test]
    async fn test_cleanup_disconnects_and_breaks_routing() {
        let clusters = two_clusters();
        let router = Router::new(1024);
        router.setup_clusters(clusters.clone()).unwrap();

        let node = StubNode::new("n1");
        router.add_route_to_local_node(node.clone()).unwrap();

        router.cleanup().await;
        assert!(node.disconnected.load(Ordering::SeqCst));
        assert!(matches!(
            router.route_to_node_for("bucket"),
            Err(TerrastoreError::MissingRoute(_))
        ));
        assert!(router.local_node().is_err());

        // Idempotent.
        router.cleanup().await;
    }
}
