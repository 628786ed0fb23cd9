//! Bounded retry over transient routing and transport failures.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use terrastore_common::protocol::{Predicate, Range};
use terrastore_common::Result;

use crate::query::QueryService;
use crate::update::UpdateService;

/// Retry policy: up to `retries` extra attempts, sleeping `interval` between
/// them.
///
/// Only `MissingRoute` and `Communication` failures are retried; everything
/// else is an answer, not a delivery problem. The policy keeps no state
/// between calls, so every call starts with a full retry budget.
#[derive(Debug, Clone, Copy)]
pub struct FailoverPolicy {
    retries: u32,
    interval: Duration,
}

impl FailoverPolicy {
    pub fn new(retries: u32, interval: Duration) -> Self {
        Self { retries, interval }
    }

    /// Runs the operation, retrying transient failures.
    ///
    /// The operation is invoked at least once and at most `retries + 1`
    /// times; a non-retryable error is returned after the first attempt.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut remaining = self.retries;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && remaining > 0 => {
                    warn!(
                        "Retrying after transient failure ({} attempts left): {}",
                        remaining, e
                    );
                    remaining -= 1;
                    tokio::time::sleep(self.interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// [`QueryService`] with retry on transient failures.
pub struct FailoverQueryService {
    inner: Arc<QueryService>,
    policy: FailoverPolicy,
}

impl FailoverQueryService {
    pub fn new(inner: Arc<QueryService>, policy: FailoverPolicy) -> Self {
        Self { inner, policy }
    }

    pub async fn get_buckets(&self) -> Result<HashSet<String>> {
        self.policy.execute(|| self.inner.get_buckets()).await
    }

    pub async fn get_value(
        &self,
        bucket: &str,
        key: &str,
        predicate: Option<Predicate>,
    ) -> Result<serde_json::Value> {
        self.policy
            .execute(|| self.inner.get_value(bucket, key, predicate.clone()))
            .await
    }

    pub async fn get_all_values(
        &self,
        bucket: &str,
        limit: usize,
    ) -> Result<std::collections::HashMap<String, serde_json::Value>> {
        self.policy
            .execute(|| self.inner.get_all_values(bucket, limit))
            .await
    }

    pub async fn query_by_range(
        &self,
        bucket: &str,
        range: Range,
        predicate: Option<Predicate>,
        time_to_live: u64,
    ) -> Result<Vec<(String, serde_json::Value)>> {
        self.policy
            .execute(|| {
                self.inner
                    .query_by_range(bucket, range.clone(), predicate.clone(), time_to_live)
            })
            .await
    }

    pub async fn query_by_predicate(
        &self,
        bucket: &str,
        predicate: Predicate,
    ) -> Result<std::collections::HashMap<String, serde_json::Value>> {
        self.policy
            .execute(|| self.inner.query_by_predicate(bucket, predicate.clone()))
            .await
    }
}

/// [`UpdateService`] with retry on transient failures.
pub struct FailoverUpdateService {
    inner: Arc<UpdateService>,
    policy: FailoverPolicy,
}

impl FailoverUpdateService {
    pub fn new(inner: Arc<UpdateService>, policy: FailoverPolicy) -> Self {
        Self { inner, policy }
    }

    pub async fn put_value(
        &self,
        bucket: &str,
        key: &str,
        value: serde_json::Value,
        predicate: Option<Predicate>,
    ) -> Result<()> {
        self.policy
            .execute(|| {
                self.inner
                    .put_value(bucket, key, value.clone(), predicate.clone())
            })
            .await
    }

    pub async fn remove_value(&self, bucket: &str, key: &str) -> Result<()> {
        self.policy
            .execute(|| self.inner.remove_value(bucket, key))
            .await
    }

    pub async fn update_value(
        &self,
        bucket: &str,
        key: &str,
        function: &str,
        params: serde_json::Value,
        timeout_ms: u64,
    ) -> Result<serde_json::Value> {
        self.policy
            .execute(|| {
                self.inner
                    .update_value(bucket, key, function, params.clone(), timeout_ms)
            })
            .await
    }

    pub async fn remove_by_range(
        &self,
        bucket: &str,
        range: Range,
        predicate: Option<Predicate>,
        time_to_live: u64,
    ) -> Result<HashSet<String>> {
        self.policy
            .execute(|| {
                self.inner
                    .remove_by_range(bucket, range.clone(), predicate.clone(), time_to_live)
            })
            .await
    }

    pub async fn remove_bucket(&self, bucket: &str) -> Result<()> {
        self.policy
            .execute(|| self.inner.remove_bucket(bucket))
            .await
    }
}
