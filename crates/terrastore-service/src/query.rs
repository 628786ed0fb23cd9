//! Read-side operations.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use terrastore_common::protocol::{Command, Predicate, Range};
use terrastore_common::Result;
use terrastore_routing::dispatcher::{merge_sorted, ordered_union, union, ParallelDispatcher};
use terrastore_routing::{Node as _, Router};
use terrastore_store::comparators::Comparators;

use crate::multicast;

/// Point reads, bucket listings, and range/predicate queries.
pub struct QueryService {
    router: Arc<Router>,
    dispatcher: ParallelDispatcher,
    comparators: Comparators,
}

impl QueryService {
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            dispatcher: ParallelDispatcher::default(),
            comparators: Comparators::new(),
        }
    }

    /// Bucket names across the whole ensemble.
    pub async fn get_buckets(&self) -> Result<HashSet<String>> {
        debug!("Getting bucket names");
        let nodes = self.all_nodes()?;
        let partials = self
            .dispatcher
            .map(nodes, |node| async move {
                node.send(Command::GetBuckets).await?.into_buckets()
            })
            .await?;
        Ok(partials.into_iter().flatten().collect())
    }

    /// A single value from its owning node.
    pub async fn get_value(
        &self,
        bucket: &str,
        key: &str,
        predicate: Option<Predicate>,
    ) -> Result<serde_json::Value> {
        debug!("Getting value with key {} from bucket {}", key, bucket);
        let node = self.router.route_to_node_for_key(bucket, key)?;
        node.send(Command::GetValue {
            bucket: bucket.to_string(),
            key: key.to_string(),
            predicate,
        })
        .await?
        .into_value()
    }

    /// Every value of a bucket, up to `limit` keys (0 = all).
    pub async fn get_all_values(
        &self,
        bucket: &str,
        limit: usize,
    ) -> Result<HashMap<String, serde_json::Value>> {
        debug!("Getting all values from bucket {}", bucket);
        let keys = limited(self.all_keys(bucket).await?, limit);
        self.fetch_grouped(bucket, keys, None).await
    }

    /// Keys in a range with their values, ordered by the range's comparator.
    ///
    /// Key collection is a one-node-per-cluster multicast over the buckets'
    /// sorted snapshots; the per-cluster partials are k-way merged before the
    /// grouped value fetch.
    pub async fn query_by_range(
        &self,
        bucket: &str,
        range: Range,
        predicate: Option<Predicate>,
        time_to_live: u64,
    ) -> Result<Vec<(String, serde_json::Value)>> {
        debug!("Range query on bucket {}", bucket);
        let comparator = self.comparators.resolve(&range.comparator);
        let limit = range.limit;

        let partials = self.keys_in_range(bucket, range, time_to_live).await?;
        let mut keys = merge_sorted(partials, |a, b| comparator(a, b));
        if limit != 0 {
            keys.truncate(limit);
        }

        let values = self
            .fetch_grouped(bucket, keys.into_iter().collect(), predicate)
            .await?;
        Ok(ordered_union(vec![values], |a, b| comparator(a, b)))
    }

    /// Every value of a bucket satisfying the predicate.
    ///
    /// Scans all keys and filters node-side; with no index behind it the cost
    /// is the full bucket, so large buckets pay for every call.
    pub async fn query_by_predicate(
        &self,
        bucket: &str,
        predicate: Predicate,
    ) -> Result<HashMap<String, serde_json::Value>> {
        debug!("Predicate-based query on bucket {}", bucket);
        let keys = self.all_keys(bucket).await?;
        self.fetch_grouped(bucket, keys, Some(predicate)).await
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// All keys of a bucket, from every node of every cluster.
    async fn all_keys(&self, bucket: &str) -> Result<HashSet<String>> {
        let nodes = self.all_nodes()?;
        let partials = self
            .dispatcher
            .map(nodes, |node| {
                let bucket = bucket.to_string();
                async move { node.send(Command::GetKeys { bucket }).await?.into_keys() }
            })
            .await?;
        Ok(partials.into_iter().flatten().collect())
    }

    /// Sorted range partials, one per cluster.
    async fn keys_in_range(
        &self,
        bucket: &str,
        range: Range,
        time_to_live: u64,
    ) -> Result<Vec<Vec<String>>> {
        let command = Command::KeysInRange {
            bucket: bucket.to_string(),
            range,
            time_to_live,
        };
        let partials = multicast::one_node_per_cluster(&self.router, command).await?;
        partials
            .into_iter()
            .map(|partial| partial.into_sorted_keys())
            .collect()
    }

    /// Groups keys by owning node and fetches each group concurrently.
    async fn fetch_grouped(
        &self,
        bucket: &str,
        keys: HashSet<String>,
        predicate: Option<Predicate>,
    ) -> Result<HashMap<String, serde_json::Value>> {
        let groups = self.router.route_to_nodes_for(bucket, keys)?;
        let partials = self
            .dispatcher
            .map(groups.into_values().collect(), |(node, keys)| {
                let bucket = bucket.to_string();
                let predicate = predicate.clone();
                async move {
                    node.send(Command::GetValues {
                        bucket,
                        keys,
                        predicate,
                    })
                    .await?
                    .into_values()
                }
            })
            .await?;
        Ok(union(partials))
    }

    fn all_nodes(&self) -> Result<Vec<terrastore_routing::NodeRef>> {
        Ok(self
            .router
            .broadcast_route()?
            .into_values()
            .flatten()
            .collect())
    }
}

fn limited(keys: HashSet<String>, limit: usize) -> HashSet<String> {
    if limit == 0 || keys.len() <= limit {
        return keys;
    }
    keys.into_iter().take(limit).collect()
}
