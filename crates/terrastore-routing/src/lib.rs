//! Terrastore Routing Core
//!
//! Given a `(bucket, key)` or a bucket-wide operation, this crate decides
//! which cluster is responsible, which node inside that cluster owns the
//! slot, and how to fan an operation out across the whole ensemble.
//!
//! # Two partitioning tiers
//!
//! 1. The [`EnsemblePartitioner`] maps a bucket to one cluster by hashing the
//!    bucket name over the sorted cluster-name list, so a whole bucket lives
//!    inside one cluster and range scans never cross cluster boundaries.
//! 2. The [`ClusterPartitioner`] maps the bucket (or bucket+key) to one node
//!    of that cluster through a fixed-size slot ring rebuilt deterministically
//!    from the sorted member set.
//!
//! The [`Router`] composes both tiers behind the operation surface the
//! service layer consumes; the [`dispatcher`] module provides the bounded
//! fan-out used for broadcasts and multi-node fetches.

pub mod cluster;
pub mod dispatcher;
pub mod node;
pub mod partition;
pub mod router;

pub use cluster::Cluster;
pub use dispatcher::ParallelDispatcher;
pub use node::{Node, NodeRef};
pub use partition::{ClusterPartitioner, EnsemblePartitioner, DEFAULT_PARTITIONS};
pub use router::Router;
