//! Bounded fan-out with result collectors.
//!
//! Broadcasts and multi-node fetches run their per-node commands through one
//! shared dispatcher: tasks execute concurrently up to the pool bound, the
//! first failure cooperatively cancels whatever is still in flight, and the
//! collectors below fold the partial results. Per-command timeouts live in
//! the node layer, not here.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

use futures::stream::StreamExt;

use terrastore_common::Result;

/// Default fan-out bound.
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Runs a mapping task over many items on a bounded pool.
#[derive(Debug, Clone, Copy)]
pub struct ParallelDispatcher {
    concurrency: usize,
}

impl ParallelDispatcher {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Maps every item concurrently and collects the partial results.
    ///
    /// Completion order is arbitrary. On the first task failure the remaining
    /// in-flight futures are dropped and the error propagates; collectors
    /// never see a partial run.
    pub async fn map<T, R, F, Fut>(&self, items: Vec<T>, task: F) -> Result<Vec<R>>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let mut stream =
            futures::stream::iter(items.into_iter().map(task)).buffer_unordered(self.concurrency);

        let mut partials = Vec::new();
        while let Some(partial) = stream.next().await {
            partials.push(partial?);
        }
        Ok(partials)
    }
}

impl Default for ParallelDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

/// Concatenates partial maps; on key collision the later write wins.
///
/// Used where routing already guarantees disjoint key sets, so a collision
/// only happens on benign races.
pub fn union<K, V>(partials: Vec<HashMap<K, V>>) -> HashMap<K, V>
where
    K: Eq + Hash,
{
    let mut result = HashMap::new();
    for partial in partials {
        result.extend(partial);
    }
    result
}

/// K-way merges already-sorted key lists under the supplied comparator,
/// dropping duplicates.
pub fn merge_sorted<F>(partials: Vec<Vec<String>>, comparator: F) -> Vec<String>
where
    F: Fn(&str, &str) -> Ordering,
{
    let total: usize = partials.iter().map(Vec::len).sum();
    let mut heads: Vec<usize> = vec![0; partials.len()];
    let mut merged: Vec<String> = Vec::with_capacity(total);

    loop {
        let mut smallest: Option<usize> = None;
        for (i, partial) in partials.iter().enumerate() {
            let Some(candidate) = partial.get(heads[i]) else {
                continue;
            };
            smallest = match smallest {
                Some(current)
                    if comparator(&partials[current][heads[current]], candidate)
                        != Ordering::Greater =>
                {
                    Some(current)
                }
                _ => Some(i),
            };
        }
        let Some(winner) = smallest else {
            break;
        };
        let key = partials[winner][heads[winner]].clone();
        heads[winner] += 1;
        if merged.last().map(String::as_str) != Some(key.as_str()) {
            merged.push(key);
        }
    }
    merged
}

/// Folds partial value maps into a single list ordered by the comparator.
pub fn ordered_union<V, F>(partials: Vec<HashMap<String, V>>, comparator: F) -> Vec<(String, V)>
where
    F: Fn(&str, &str) -> Ordering,
{
    let mut entries: Vec<(String, V)> = union(partials).into_iter().collect();
    entries.sort_by(|(a, _), (b, _)| comparator(a, b));
    entries
}
