//! Inter-cluster partitioning.

use parking_lot::RwLock;

use terrastore_common::hash::hash_str;
use terrastore_common::{Result, TerrastoreError};

use crate::cluster::Cluster;

/// Maps buckets to clusters over the sorted cluster-name list.
///
/// Selection hashes the bucket name only: a whole bucket's contents live in
/// one cluster, so per-bucket range scans never merge across clusters on the
/// hot path. Node counts are deliberately ignored; the list is stable for the
/// life of the process.
pub struct EnsemblePartitioner {
    clusters: RwLock<Vec<Cluster>>,
}

impl EnsemblePartitioner {
    pub fn new() -> Self {
        Self {
            clusters: RwLock::new(Vec::new()),
        }
    }

    /// Replaces the cluster list; idempotent for an equal set.
    pub fn setup_clusters(&self, clusters: &[Cluster]) {
        let mut sorted = clusters.to_vec();
        sorted.sort_by(|a, b| a.name().cmp(b.name()));
        sorted.dedup_by(|a, b| a.name() == b.name());
        *self.clusters.write() = sorted;
    }

    /// The cluster responsible for a bucket.
    pub fn cluster_for(&self, bucket: &str) -> Result<Cluster> {
        let clusters = self.clusters.read();
        if clusters.is_empty() {
            return Err(TerrastoreError::MissingRoute(
                "No clusters configured".to_string(),
            ));
        }
        let index = hash_str(bucket) as usize % clusters.len();
        Ok(clusters[index].clone())
    }

    /// The cluster responsible for a `(bucket, key)` pair.
    ///
    /// Key granularity applies inside the cluster only; across clusters the
    /// bucket decides.
    pub fn cluster_for_key(&self, bucket: &str, _key: &str) -> Result<Cluster> {
        self.cluster_for(bucket)
    }

    /// Every declared cluster, in name order.
    pub fn clusters(&self) -> Vec<Cluster> {
        self.clusters.read().clone()
    }
}

impl Default for EnsemblePartitioner {
    fn default() -> Self {
        Self::new()
    }
}
