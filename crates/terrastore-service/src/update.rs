//! Write-side operations.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use terrastore_common::protocol::{Command, Predicate, Range};
use terrastore_common::Result;
use terrastore_routing::dispatcher::{merge_sorted, ParallelDispatcher};
use terrastore_routing::{Node as _, Router};
use terrastore_store::comparators::Comparators;
use terrastore_store::Value;

use crate::multicast;

/// Writes, removals, server-side updates and bucket drops.
pub struct UpdateService {
    router: Arc<Router>,
    dispatcher: ParallelDispatcher,
    comparators: Comparators,
}

impl UpdateService {
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            dispatcher: ParallelDispatcher::default(),
            comparators: Comparators::new(),
        }
    }

    /// Validates and stores a value on its owning node.
    pub async fn put_value(
        &self,
        bucket: &str,
        key: &str,
        value: serde_json::Value,
        predicate: Option<Predicate>,
    ) -> Result<()> {
        debug!("Putting value with key {} into bucket {}", key, bucket);
        // Reject malformed documents here, before any routing happens.
        let value = Value::from_json(value)?.into_json();
        let node = self.router.route_to_node_for_key(bucket, key)?;
        node.send(Command::PutValue {
            bucket: bucket.to_string(),
            key: key.to_string(),
            value,
            predicate,
        })
        .await?
        .into_ack()
    }

    /// Removes a single key from its owning node.
    pub async fn remove_value(&self, bucket: &str, key: &str) -> Result<()> {
        debug!("Removing value with key {} from bucket {}", key, bucket);
        let node = self.router.route_to_node_for_key(bucket, key)?;
        node.send(Command::RemoveValue {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
        .await?
        .into_ack()
    }

    /// Applies a named update function on the owning node; the timeout is
    /// enforced end to end by that node.
    pub async fn update_value(
        &self,
        bucket: &str,
        key: &str,
        function: &str,
        params: serde_json::Value,
        timeout_ms: u64,
    ) -> Result<serde_json::Value> {
        debug!("Updating value with key {} in bucket {}", key, bucket);
        let node = self.router.route_to_node_for_key(bucket, key)?;
        node.send(Command::Update {
            bucket: bucket.to_string(),
            key: key.to_string(),
            function: function.to_string(),
            params,
            timeout_ms,
        })
        .await?
        .into_value()
    }

    /// Removes every key inside a range, returning the removed keys.
    pub async fn remove_by_range(
        &self,
        bucket: &str,
        range: Range,
        predicate: Option<Predicate>,
        time_to_live: u64,
    ) -> Result<HashSet<String>> {
        debug!("Range removal on bucket {}", bucket);
        let comparator = self.comparators.resolve(&range.comparator);
        let limit = range.limit;

        let command = Command::KeysInRange {
            bucket: bucket.to_string(),
            range,
            time_to_live,
        };
        let partials = multicast::one_node_per_cluster(&self.router, command)
            .await?
            .into_iter()
            .map(|partial| partial.into_sorted_keys())
            .collect::<Result<Vec<_>>>()?;
        let mut keys = merge_sorted(partials, |a, b| comparator(a, b));
        if limit != 0 {
            keys.truncate(limit);
        }

        let groups = self
            .router
            .route_to_nodes_for(bucket, keys.into_iter().collect())?;
        let removed = self
            .dispatcher
            .map(groups.into_values().collect(), |(node, keys)| {
                let bucket = bucket.to_string();
                let predicate = predicate.clone();
                async move {
                    node.send(Command::RemoveValues {
                        bucket,
                        keys,
                        predicate,
                    })
                    .await?
                    .into_values()
                }
            })
            .await?;
        Ok(removed
            .into_iter()
            .flat_map(|partial| partial.into_keys())
            .collect())
    }

    /// Drops a bucket on one node of every cluster.
    ///
    /// Success is declared per cluster as soon as one node acknowledges; keys
    /// hosted by that cluster's other nodes are dropped by their own stores
    /// only when they observe the removal, so the operation is not atomic
    /// cluster-wide. When a cluster has no responsive node the call fails
    /// with the partial-application error and must not be assumed
    /// idempotent.
    pub async fn remove_bucket(&self, bucket: &str) -> Result<()> {
        debug!("Removing bucket {}", bucket);
        let command = Command::RemoveBucket {
            bucket: bucket.to_string(),
        };
        for partial in multicast::one_node_per_cluster(&self.router, command).await? {
            partial.into_ack()?;
        }
        Ok(())
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }
}
