//! Sorted snapshots of a bucket's keys.
//!
//! Range queries never scan the live key map: they run against a snapshot
//! ordered by the query's comparator. Snapshots age out after the query's
//! time-to-live and are invalidated wholesale on topology changes, so a ring
//! rebuild can never serve keys through a stale ordering.

use std::time::{Duration, Instant};

use crate::comparators::KeyComparator;

/// An ordered snapshot of keys under one comparator.
pub struct SortedSnapshot {
    keys: Vec<String>,
    comparator: KeyComparator,
    timestamp: Instant,
}

impl SortedSnapshot {
    pub fn new(mut keys: Vec<String>, comparator: KeyComparator) -> Self {
        keys.sort_by(|a, b| comparator(a, b));
        Self {
            keys,
            comparator,
            timestamp: Instant::now(),
        }
    }

    /// Keys in `[start, end]` in snapshot order, up to `limit` (0 = all).
    ///
    /// An unset end bound runs to the end of the order.
    pub fn keys_in_range(&self, start: &str, end: Option<&str>, limit: usize) -> Vec<String> {
        let from = self.keys.partition_point(|k| {
            (self.comparator)(k.as_str(), start) == std::cmp::Ordering::Less
        });

        let mut result = Vec::new();
        for key in &self.keys[from..] {
            if let Some(end) = end {
                if (self.comparator)(key.as_str(), end) == std::cmp::Ordering::Greater {
                    break;
                }
            }
            result.push(key.clone());
            if limit != 0 && result.len() == limit {
                break;
            }
        }
        result
    }

    /// Whether the snapshot is older than the caller's time-to-live.
    pub fn is_expired(&self, time_to_live: Duration) -> bool {
        self.timestamp.elapsed() >= time_to_live
    }

    /// Replaces the snapshot contents with a fresh key set.
    pub fn update(&mut self, keys: Vec<String>) {
        let mut keys = keys;
        keys.sort_by(|a, b| (self.comparator)(a, b));
        self.keys = keys;
        self.timestamp = Instant::now();
    }
}
