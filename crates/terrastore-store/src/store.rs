//! The local command processor: named buckets plus the dispatch switch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use terrastore_common::protocol::{Command, CommandResult};
use terrastore_common::{ErrorMessage, Result, TerrastoreError};

use crate::bucket::Bucket;
use crate::comparators::Comparators;
use crate::conditions::Conditions;
use crate::events::EventBus;
use crate::functions::UpdateFunctions;
use crate::value::Value;

/// Decides whether a key still belongs on this node.
///
/// The coordinator implements this over the router's current ring; the store
/// only ever sees the yes/no answer.
pub trait FlushCondition: Send + Sync {
    fn should_flush(&self, bucket: &str, key: &str) -> bool;
}

/// Whether flushing actually evicts anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStrategy {
    /// Evict every key the condition selects.
    Eager,
    /// Leave the working set alone (single-node deployments).
    Disabled,
}

/// All buckets hosted by this node, created lazily on first write.
pub struct Store {
    buckets: RwLock<HashMap<String, Arc<Bucket>>>,
    comparators: Comparators,
    conditions: Conditions,
    functions: UpdateFunctions,
    event_bus: Arc<dyn EventBus>,
}

impl Store {
    pub fn new(event_bus: Arc<dyn EventBus>) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            comparators: Comparators::new(),
            conditions: Conditions::new(),
            functions: UpdateFunctions::new(),
            event_bus,
        }
    }

    /// Executes a storage command, dispatching on its kind.
    ///
    /// Read commands against a bucket this node has never written answer with
    /// empty results (batch reads) or not-found (single-key reads): broadcast
    /// callers expect every node to contribute its local view, including an
    /// empty one.
    pub async fn execute(&self, command: &Command) -> Result<CommandResult> {
        match command {
            Command::GetBuckets => Ok(CommandResult::Buckets(self.bucket_names().await)),
            Command::GetKeys { bucket } => {
                let keys = match self.bucket(bucket).await {
                    Some(bucket) => bucket.keys().await,
                    None => HashSet::new(),
                };
                Ok(CommandResult::Keys(keys))
            }
            Command::KeysInRange {
                bucket,
                range,
                time_to_live,
            } => {
                let keys = match self.bucket(bucket).await {
                    Some(bucket) => {
                        bucket
                            .keys_in_range(
                                range,
                                Duration::from_millis(*time_to_live),
                                &self.comparators,
                            )
                            .await
                    }
                    None => Vec::new(),
                };
                Ok(CommandResult::SortedKeys(keys))
            }
            Command::GetValue {
                bucket,
                key,
                predicate,
            } => {
                let bucket = self.existing_bucket(bucket, key).await?;
                let value = match predicate {
                    Some(predicate) => {
                        bucket
                            .conditional_get(key, predicate, &self.conditions)
                            .await?
                    }
                    None => bucket.get(key).await?,
                };
                Ok(CommandResult::Value(value.into_json()))
            }
            Command::GetValues {
                bucket,
                keys,
                predicate,
            } => {
                let values = match self.bucket(bucket).await {
                    Some(bucket) => {
                        bucket
                            .get_values(keys, predicate.as_ref(), &self.conditions)
                            .await?
                    }
                    None => HashMap::new(),
                };
                Ok(CommandResult::Values(into_json_map(values)))
            }
            Command::PutValue {
                bucket,
                key,
                value,
                predicate,
            } => {
                let value = Value::from_json(value.clone())?;
                let bucket = self.bucket_or_create(bucket).await;
                match predicate {
                    Some(predicate) => {
                        bucket
                            .conditional_put(
                                key,
                                value,
                                predicate,
                                &self.conditions,
                                self.event_bus.as_ref(),
                            )
                            .await?
                    }
                    None => bucket.put(key, value, self.event_bus.as_ref()).await,
                }
                Ok(CommandResult::Ack)
            }
            Command::RemoveValue { bucket, key } => {
                let bucket = self.existing_bucket(bucket, key).await?;
                bucket.remove(key, self.event_bus.as_ref()).await?;
                Ok(CommandResult::Ack)
            }
            Command::RemoveValues {
                bucket,
                keys,
                predicate,
            } => {
                let removed = match self.bucket(bucket).await {
                    Some(bucket) => {
                        bucket
                            .remove_values(
                                keys,
                                predicate.as_ref(),
                                &self.conditions,
                                self.event_bus.as_ref(),
                            )
                            .await?
                    }
                    None => HashMap::new(),
                };
                Ok(CommandResult::Values(into_json_map(removed)))
            }
            Command::RemoveBucket { bucket } => {
                if self.buckets.write().await.remove(bucket).is_some() {
                    info!("Removed bucket {}", bucket);
                }
                Ok(CommandResult::Ack)
            }
            Command::Update {
                bucket,
                key,
                function,
                params,
                timeout_ms,
            } => {
                let function = self.functions.resolve(function)?;
                let bucket = self.existing_bucket(bucket, key).await?;
                let updated = bucket
                    .update(
                        key,
                        function,
                        params.clone(),
                        Duration::from_millis(*timeout_ms),
                        self.event_bus.as_ref(),
                    )
                    .await?;
                Ok(CommandResult::Value(updated.into_json()))
            }
            Command::Membership => Err(TerrastoreError::internal(
                "Membership is answered by the cluster layer, not the store",
            )),
        }
    }

    /// Evicts keys the condition no longer considers local, then drops every
    /// sorted snapshot so range queries cannot serve the old assignment.
    pub async fn flush(&self, strategy: FlushStrategy, condition: &dyn FlushCondition) -> usize {
        if strategy == FlushStrategy::Disabled {
            warn!("Flush is disabled!");
            return 0;
        }
        let buckets = self.buckets.read().await;
        let mut flushed = 0;
        for (name, bucket) in buckets.iter() {
            let count = bucket
                .flush(|key| condition.should_flush(name, key))
                .await;
            debug!("Flushed {} keys from bucket {}", count, name);
            flushed += count;
            bucket.invalidate_snapshots().await;
        }
        flushed
    }

    /// Drops every bucket's sorted snapshots.
    pub async fn invalidate_snapshots(&self) {
        let buckets = self.buckets.read().await;
        for bucket in buckets.values() {
            bucket.invalidate_snapshots().await;
        }
    }

    pub async fn bucket_names(&self) -> HashSet<String> {
        self.buckets.read().await.keys().cloned().collect()
    }

    pub async fn bucket(&self, name: &str) -> Option<Arc<Bucket>> {
        self.buckets.read().await.get(name).cloned()
    }

    async fn bucket_or_create(&self, name: &str) -> Arc<Bucket> {
        let mut buckets = self.buckets.write().await;
        buckets
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Creating bucket {}", name);
                Arc::new(Bucket::new(name))
            })
            .clone()
    }

    async fn existing_bucket(&self, name: &str, key: &str) -> Result<Arc<Bucket>> {
        self.bucket(name).await.ok_or_else(|| {
            TerrastoreError::Processing(ErrorMessage::not_found(format!(
                "Key not found: {} (no bucket {})",
                key, name
            )))
        })
    }
}

fn into_json_map(values: HashMap<String, Value>) -> HashMap<String, serde_json::Value> {
    values
        .into_iter()
        .map(|(key, value)| (key, value.into_json()))
        .collect()
}
