//! A named key space.
//!
//! All operations on one bucket serialise through the bucket's write lock, so
//! per-key put/remove/update and their event publications are totally ordered.
//! Sorted snapshots are cached per comparator name and refreshed lazily when a
//! range query finds them older than its time-to-live.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};

use terrastore_common::protocol::{Predicate, Range};
use terrastore_common::{ErrorMessage, Result, TerrastoreError};

use crate::comparators::Comparators;
use crate::conditions::Conditions;
use crate::events::{Event, EventBus};
use crate::functions::UpdateFunction;
use crate::snapshot::SortedSnapshot;
use crate::value::Value;

pub struct Bucket {
    name: String,
    entries: RwLock<HashMap<String, Value>>,
    snapshots: Mutex<HashMap<String, SortedSnapshot>>,
}

impl Bucket {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn get(&self, key: &str) -> Result<Value> {
        self.entries
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| not_found(key))
    }

    /// Gets a value gated by a predicate.
    ///
    /// A missing key and an unsatisfied predicate both answer not-found: the
    /// predicate hides the value, it does not report a conflict. Conflicts
    /// belong to the conditional write path only.
    pub async fn conditional_get(
        &self,
        key: &str,
        predicate: &Predicate,
        conditions: &Conditions,
    ) -> Result<Value> {
        let condition = conditions.resolve(&predicate.condition_type)?;
        let entries = self.entries.read().await;
        let value = entries.get(key).ok_or_else(|| not_found(key))?;
        if condition.is_satisfied(key, value, &predicate.expression) {
            Ok(value.clone())
        } else {
            Err(not_found(key))
        }
    }

    pub async fn put(&self, key: &str, value: Value, bus: &dyn EventBus) {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value.clone());
        publish_changed(bus, &self.name, key, value);
    }

    /// Puts a value only if the key is absent or the current value satisfies
    /// the predicate.
    pub async fn conditional_put(
        &self,
        key: &str,
        value: Value,
        predicate: &Predicate,
        conditions: &Conditions,
        bus: &dyn EventBus,
    ) -> Result<()> {
        let condition = conditions.resolve(&predicate.condition_type)?;
        let mut entries = self.entries.write().await;
        let satisfied = match entries.get(key) {
            Some(old) => condition.is_satisfied(key, old, &predicate.expression),
            None => true,
        };
        if !satisfied {
            return Err(unsatisfied(predicate, key));
        }
        entries.insert(key.to_string(), value.clone());
        publish_changed(bus, &self.name, key, value);
        Ok(())
    }

    pub async fn remove(&self, key: &str, bus: &dyn EventBus) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.remove(key).is_none() {
            return Err(not_found(key));
        }
        publish_removed(bus, &self.name, key);
        Ok(())
    }

    /// Fetches a batch of keys, skipping the missing and the unsatisfied.
    ///
    /// Batch reads come from routed key sets that may lag concurrent removals,
    /// so absence here is not an error.
    pub async fn get_values(
        &self,
        keys: &HashSet<String>,
        predicate: Option<&Predicate>,
        conditions: &Conditions,
    ) -> Result<HashMap<String, Value>> {
        let condition = match predicate {
            Some(p) => Some((conditions.resolve(&p.condition_type)?, p)),
            None => None,
        };
        let entries = self.entries.read().await;
        let mut result = HashMap::new();
        for key in keys {
            let Some(value) = entries.get(key) else {
                continue;
            };
            if let Some((condition, predicate)) = &condition {
                if !condition.is_satisfied(key, value, &predicate.expression) {
                    continue;
                }
            }
            result.insert(key.clone(), value.clone());
        }
        Ok(result)
    }

    /// Removes a batch of keys, returning the removed entries.
    pub async fn remove_values(
        &self,
        keys: &HashSet<String>,
        predicate: Option<&Predicate>,
        conditions: &Conditions,
        bus: &dyn EventBus,
    ) -> Result<HashMap<String, Value>> {
        let condition = match predicate {
            Some(p) => Some((conditions.resolve(&p.condition_type)?, p)),
            None => None,
        };
        let mut entries = self.entries.write().await;
        let mut removed = HashMap::new();
        for key in keys {
            let Some(value) = entries.get(key) else {
                continue;
            };
            if let Some((condition, predicate)) = &condition {
                if !condition.is_satisfied(key, value, &predicate.expression) {
                    continue;
                }
            }
            let value = entries.remove(key).expect("key checked above");
            publish_removed(bus, &self.name, key);
            removed.insert(key.clone(), value);
        }
        Ok(removed)
    }

    /// Applies an update function to the current value under the bucket's
    /// serialization, bounded by the command's timeout.
    ///
    /// The function runs on the blocking pool; on timeout its result is
    /// abandoned and the stored value is left untouched.
    pub async fn update(
        &self,
        key: &str,
        function: Arc<dyn UpdateFunction>,
        params: serde_json::Value,
        timeout: Duration,
        bus: &dyn EventBus,
    ) -> Result<Value> {
        let mut entries = self.entries.write().await;
        let current = entries.get(key).cloned().ok_or_else(|| not_found(key))?;

        let owned_key = key.to_string();
        let task = tokio::task::spawn_blocking(move || function.apply(&owned_key, &current, &params));
        let updated = match tokio::time::timeout(timeout, task).await {
            Ok(joined) => joined
                .map_err(|e| TerrastoreError::internal(format!("Update task failed: {}", e)))??,
            Err(_) => {
                return Err(TerrastoreError::Processing(ErrorMessage::new(
                    ErrorMessage::INTERNAL,
                    "Update cancelled due to long execution time.",
                )))
            }
        };

        entries.insert(key.to_string(), updated.clone());
        publish_changed(bus, &self.name, key, updated.clone());
        Ok(updated)
    }

    pub async fn keys(&self) -> HashSet<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Sorted keys inside the range, served from the per-comparator snapshot.
    ///
    /// The snapshot is rebuilt when absent and refreshed in place when older
    /// than the query's time-to-live.
    pub async fn keys_in_range(
        &self,
        range: &Range,
        time_to_live: Duration,
        comparators: &Comparators,
    ) -> Vec<String> {
        let mut snapshots = self.snapshots.lock().await;
        if !snapshots.contains_key(&range.comparator) {
            let keys: Vec<String> = self.keys().await.into_iter().collect();
            let comparator = comparators.resolve(&range.comparator);
            snapshots.insert(
                range.comparator.clone(),
                SortedSnapshot::new(keys, comparator),
            );
        } else if snapshots[&range.comparator].is_expired(time_to_live) {
            let keys = self.keys().await.into_iter().collect();
            snapshots
                .get_mut(&range.comparator)
                .expect("snapshot present")
                .update(keys);
        }
        let snapshot = snapshots.get(&range.comparator).expect("snapshot present");
        snapshot.keys_in_range(&range.start, range.end.as_deref(), range.limit)
    }

    /// Drops every cached snapshot; the next range query rebuilds.
    pub async fn invalidate_snapshots(&self) {
        self.snapshots.lock().await.clear();
    }

    /// Evicts keys the given predicate no longer considers local.
    ///
    /// Eviction is silent: no removal events, since the keys still exist in
    /// the ensemble, just not here.
    pub async fn flush<F>(&self, should_flush: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !should_flush(key));
        before - entries.len()
    }
}

fn not_found(key: &str) -> TerrastoreError {
    TerrastoreError::Processing(ErrorMessage::not_found(format!("Key not found: {}", key)))
}

fn unsatisfied(predicate: &Predicate, key: &str) -> TerrastoreError {
    TerrastoreError::Processing(ErrorMessage::new(
        ErrorMessage::CONFLICT,
        format!(
            "Unsatisfied condition: {}:{} for key: {}",
            predicate.condition_type, predicate.expression, key
        ),
    ))
}

fn publish_changed(bus: &dyn EventBus, bucket: &str, key: &str, value: Value) {
    let event = Event::ValueChanged {
        bucket: bucket.to_string(),
        key: key.to_string(),
        value,
    };
    if let Err(e) = bus.publish(event) {
        tracing::warn!("Dropped change event for {}/{}: {}", bucket, key, e);
    }
}

fn publish_removed(bus: &dyn EventBus, bucket: &str, key: &str) {
    let event = Event::ValueRemoved {
        bucket: bucket.to_string(),
        key: key.to_string(),
    };
    if let Err(e) = bus.publish(event) {
        tracing::warn!("Dropped removal event for {}/{}: {}", bucket, key, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventBus;
    use crate::functions::UpdateFunctions;
    use serde_json::json;

    fn value(json: serde_json::Value) -> Value {
        Value::from_json(json).unwrap()
    }

    fn bus() -> Arc<MemoryEventBus> {
        MemoryEventBus::new(Vec::new())
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let bucket = Bucket::new("books");
        let bus = bus();

        bucket.put("dune", value(json!({"a": 1})), bus.as_ref()).await;
        assert_eq!(bucket.get("dune").await.unwrap(), value(json!({"a": 1})));

        bucket.remove("dune", bus.as_ref()).await.unwrap();
        assert!(bucket.get("dune").await.is_err());
    }

    #[tokio::test]
    async fn test_remove_missing_key() {
        let bucket = Bucket::new("books");
        let err = bucket.remove("ghost", bus().as_ref()).await.unwrap_err();
        assert!(matches!(err, TerrastoreError::Processing(msg) if msg.code == 404));
    }

    #[tokio::test]
    async fn test_conditional_put_on_absent_key_succeeds() {
        let bucket = Bucket::new("books");
        let predicate = Predicate::parse("field-eq:author=Herbert").unwrap();
        bucket
            .conditional_put(
                "dune",
                value(json!({"author": "Herbert"})),
                &predicate,
                &Conditions::new(),
                bus().as_ref(),
            )
            .await
            .unwrap();
        assert!(bucket.get("dune").await.is_ok());
    }

    #[tokio::test]
    async fn test_conditional_put_conflict() {
        let bucket = Bucket::new("books");
        let bus = bus();
        bucket
            .put("dune", value(json!({"author": "Asimov"})), bus.as_ref())
            .await;

        let predicate = Predicate::parse("field-eq:author=Herbert").unwrap();
        let err = bucket
            .conditional_put(
                "dune",
                value(json!({"author": "Herbert"})),
                &predicate,
                &Conditions::new(),
                bus.as_ref(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TerrastoreError::Processing(msg) if msg.code == 409));
        // Original value untouched.
        assert_eq!(
            bucket.get("dune").await.unwrap(),
            value(json!({"author": "Asimov"}))
        );
    }

    #[tokio::test]
    async fn test_conditional_get() {
        let bucket = Bucket::new("books");
        let bus = bus();
        bucket
            .put("dune", value(json!({"author": "Herbert"})), bus.as_ref())
            .await;

        let satisfied = Predicate::parse("field-eq:author=Herbert").unwrap();
        assert!(bucket
            .conditional_get("dune", &satisfied, &Conditions::new())
            .await
            .is_ok());

        let unsatisfied = Predicate::parse("field-eq:author=Asimov").unwrap();
        let err = bucket
            .conditional_get("dune", &unsatisfied, &Conditions::new())
            .await
            .unwrap_err();
        // An unsatisfied predicate hides the value; only writes conflict.
        assert!(matches!(err, TerrastoreError::Processing(msg) if msg.code == 404));
    }

    #[tokio::test]
    async fn test_batch_get_skips_missing() {
        let bucket = Bucket::new("books");
        let bus = bus();
        bucket.put("a", value(json!({"n": 1})), bus.as_ref()).await;

        let keys: HashSet<String> = ["a".to_string(), "ghost".to_string()].into();
        let found = bucket
            .get_values(&keys, None, &Conditions::new())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("a"));
    }

    #[tokio::test]
    async fn test_batch_remove_with_predicate() {
        let bucket = Bucket::new("books");
        let bus = bus();
        bucket
            .put("a", value(json!({"keep": false})), bus.as_ref())
            .await;
        bucket
            .put("b", value(json!({"keep": true})), bus.as_ref())
            .await;

        let keys: HashSet<String> = ["a".to_string(), "b".to_string()].into();
        let predicate = Predicate::parse("field-eq:keep=false").unwrap();
        let removed = bucket
            .remove_values(&keys, Some(&predicate), &Conditions::new(), bus.as_ref())
            .await
            .unwrap();

        assert_eq!(removed.len(), 1);
        assert!(removed.contains_key("a"));
        assert!(bucket.get("b").await.is_ok());
    }

    #[tokio::test]
    async fn test_update_merge() {
        let bucket = Bucket::new("books");
        let bus = bus();
        bucket
            .put("dune", value(json!({"title": "Dune"})), bus.as_ref())
            .await;

        let functions = UpdateFunctions::new();
        let updated = bucket
            .update(
                "dune",
                functions.resolve("merge").unwrap(),
                json!({"year": 1965}),
                Duration::from_secs(1),
                bus.as_ref(),
            )
            .await
            .unwrap();

        assert_eq!(updated.as_json(), &json!({"title": "Dune", "year": 1965}));
        assert_eq!(bucket.get("dune").await.unwrap(), updated);
    }

    #[tokio::test]
    async fn test_update_missing_key() {
        let bucket = Bucket::new("books");
        let functions = UpdateFunctions::new();
        let err = bucket
            .update(
                "ghost",
                functions.resolve("merge").unwrap(),
                json!({}),
                Duration::from_secs(1),
                bus().as_ref(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TerrastoreError::Processing(msg) if msg.code == 404));
    }

    #[tokio::test]
    async fn test_update_timeout() {
        struct SlowFunction;
        impl UpdateFunction for SlowFunction {
            fn apply(
                &self,
                _key: &str,
                current: &Value,
                _params: &serde_json::Value,
            ) -> Result<Value> {
                std::thread::sleep(Duration::from_millis(500));
                Ok(current.clone())
            }
        }

        let bucket = Bucket::new("books");
        let bus = bus();
        bucket.put("dune", value(json!({"a": 1})), bus.as_ref()).await;

        let err = bucket
            .update(
                "dune",
                Arc::new(SlowFunction),
                json!({}),
                Duration::from_millis(20),
                bus.as_ref(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TerrastoreError::Processing(_)));
        // Value untouched after the abandoned update.
        assert_eq!(bucket.get("dune").await.unwrap(), value(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_keys_in_range_uses_snapshot() {
        let bucket = Bucket::new("books");
        let bus = bus();
        for key in ["a", "b", "c"] {
            bucket.put(key, value(json!({})), bus.as_ref()).await;
        }

        let range = Range {
            start: "a".to_string(),
            end: Some("b".to_string()),
            limit: 0,
            comparator: "lexicographical-asc".to_string(),
        };
        let comparators = Comparators::new();

        // Long time-to-live: the snapshot sticks even as keys change.
        let keys = bucket
            .keys_in_range(&range, Duration::from_secs(60), &comparators)
            .await;
        assert_eq!(keys, ["a", "b"]);

        bucket.put("ab", value(json!({})), bus.as_ref()).await;
        let stale = bucket
            .keys_in_range(&range, Duration::from_secs(60), &comparators)
            .await;
        assert_eq!(stale, ["a", "b"]);

        // Zero time-to-live forces a refresh.
        let fresh = bucket
            .keys_in_range(&range, Duration::from_millis(0), &comparators)
            .await;
        assert_eq!(fresh, ["a", "ab", "b"]);
    }

    #[tokio::test]
    async fn test_snapshot_invalidation() {
        let bucket = Bucket::new("books");
        let bus = bus();
        bucket.put("a", value(json!({})), bus.as_ref()).await;

        let range = Range {
            start: "a".to_string(),
            end: None,
            limit: 0,
            comparator: "lexicographical-asc".to_string(),
        };
        let comparators = Comparators::new();
        bucket
            .keys_in_range(&range, Duration::from_secs(60), &comparators)
            .await;

        bucket.put("b", value(json!({})), bus.as_ref()).await;
        bucket.invalidate_snapshots().await;

        let keys = bucket
            .keys_in_range(&range, Duration::from_secs(60), &comparators)
            .await;
        assert_eq!(keys, ["a", "b"]);
    }

    #[tokio::test]
    async fn test_flush_evicts_silently() {
        let bucket = Bucket::new("books");
        let bus = bus();
        bucket.put("local", value(json!({})), bus.as_ref()).await;
        bucket.put("foreign", value(json!({})), bus.as_ref()).await;

        let flushed = bucket.flush(|key| key == "foreign").await;
        assert_eq!(flushed, 1);
        assert!(bucket.get("local").await.is_ok());
        assert!(bucket.get("foreign").await.is_err());
    }
}
