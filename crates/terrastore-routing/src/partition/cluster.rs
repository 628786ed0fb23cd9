//! Intra-cluster partitioning over fixed slot rings.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use terrastore_common::hash::{combine, hash_str};
use terrastore_common::{Result, TerrastoreError};

use crate::cluster::Cluster;
use crate::node::{Node, NodeRef};

/// Default number of ring slots per cluster.
pub const DEFAULT_PARTITIONS: usize = 1024;

/// Maps buckets and keys to one node of a given cluster.
///
/// Each cluster owns a ring of `max_partitions` slots. The ring is rebuilt on
/// every membership change by striping the name-sorted member list across the
/// slots (`slot[i] = members[i % n]`): two processes that agree on the member
/// set agree on every slot. Remapping on change is not minimised on purpose;
/// sorted snapshots are invalidated on every change anyway, so ring simplicity
/// wins over slot stability.
///
/// Rebuilds run under the write lock; lookups clone the current slot table
/// out from under the read lock and never block a rebuild.
pub struct ClusterPartitioner {
    max_partitions: usize,
    rings: RwLock<HashMap<String, Ring>>,
}

struct Ring {
    /// Members sorted by node name.
    members: BTreeMap<String, NodeRef>,
    /// Slot table; one entry per partition, empty while the cluster has no
    /// members.
    slots: Arc<Vec<NodeRef>>,
}

impl Ring {
    fn empty() -> Self {
        Self {
            members: BTreeMap::new(),
            slots: Arc::new(Vec::new()),
        }
    }

    fn rebuild(&mut self, max_partitions: usize) {
        if self.members.is_empty() {
            self.slots = Arc::new(Vec::new());
            return;
        }
        let members: Vec<NodeRef> = self.members.values().cloned().collect();
        let slots = (0..max_partitions)
            .map(|slot| members[slot % members.len()].clone())
            .collect();
        self.slots = Arc::new(slots);
    }
}

impl ClusterPartitioner {
    pub fn new(max_partitions: usize) -> Self {
        Self {
            max_partitions,
            rings: RwLock::new(HashMap::new()),
        }
    }

    pub fn max_partitions(&self) -> usize {
        self.max_partitions
    }

    /// Declares the cluster set, creating an empty ring per cluster.
    ///
    /// Idempotent for an equal set; rings of clusters still in the set are
    /// kept as they are.
    pub fn setup_clusters(&self, clusters: &[Cluster]) {
        let mut rings = self.rings.write();
        for cluster in clusters {
            rings
                .entry(cluster.name().to_string())
                .or_insert_with(Ring::empty);
        }
        rings.retain(|name, _| clusters.iter().any(|c| c.name() == name));
    }

    /// Adds a node to its cluster's ring and rebuilds the slot table.
    pub fn add_node(&self, cluster: &Cluster, node: NodeRef) -> Result<()> {
        let mut rings = self.rings.write();
        let ring = rings
            .get_mut(cluster.name())
            .ok_or_else(|| unknown_cluster(cluster.name()))?;
        ring.members.insert(node.name().to_string(), node);
        ring.rebuild(self.max_partitions);
        debug!(
            "Rebuilt ring for cluster {} with {} members",
            cluster.name(),
            ring.members.len()
        );
        Ok(())
    }

    /// Removes a node from its cluster's ring and rebuilds the slot table.
    pub fn remove_node(&self, cluster: &Cluster, node_name: &str) -> Result<()> {
        let mut rings = self.rings.write();
        let ring = rings
            .get_mut(cluster.name())
            .ok_or_else(|| unknown_cluster(cluster.name()))?;
        ring.members.remove(node_name);
        ring.rebuild(self.max_partitions);
        debug!(
            "Rebuilt ring for cluster {} with {} members",
            cluster.name(),
            ring.members.len()
        );
        Ok(())
    }

    /// The node owning a bucket's slot inside the cluster.
    pub fn node_for_bucket(&self, cluster: &Cluster, bucket: &str) -> Result<NodeRef> {
        let slots = self.slots(cluster)?;
        let slot = hash_str(bucket) as usize % self.max_partitions;
        Ok(slots[slot % slots.len()].clone())
    }

    /// The node owning a `(bucket, key)` slot inside the cluster.
    pub fn node_for_key(&self, cluster: &Cluster, bucket: &str, key: &str) -> Result<NodeRef> {
        let slots = self.slots(cluster)?;
        let slot = combine(hash_str(bucket), hash_str(key)) as usize % self.max_partitions;
        Ok(slots[slot % slots.len()].clone())
    }

    /// The current member set of a cluster (not the slot table).
    pub fn nodes_for(&self, cluster: &Cluster) -> Result<Vec<NodeRef>> {
        let rings = self.rings.read();
        let ring = rings
            .get(cluster.name())
            .ok_or_else(|| unknown_cluster(cluster.name()))?;
        Ok(ring.members.values().cloned().collect())
    }

    /// Drops every ring and its members.
    pub fn cleanup(&self) {
        self.rings.write().clear();
    }

    fn slots(&self, cluster: &Cluster) -> Result<Arc<Vec<NodeRef>>> {
        let rings = self.rings.read();
        let ring = rings
            .get(cluster.name())
            .ok_or_else(|| unknown_cluster(cluster.name()))?;
        if ring.slots.is_empty() {
            return Err(TerrastoreError::MissingRoute(format!(
                "No nodes in cluster: {}",
                cluster.name()
            )));
        }
        Ok(ring.slots.clone())
    }
}

fn unknown_cluster(name: &str) -> TerrastoreError {
    TerrastoreError::MissingRoute(format!("Unknown cluster: {}", name))
}
