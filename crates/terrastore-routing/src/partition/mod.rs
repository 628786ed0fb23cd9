//! The two partitioning tiers.
//!
//! - [`EnsemblePartitioner`]: bucket → cluster, over the sorted cluster names
//! - [`ClusterPartitioner`]: bucket (or bucket+key) → node, over a fixed slot
//!   ring per cluster
//!
//! Both tiers hash with the shared ensemble hash function, so any two
//! processes observing the same membership compute identical routes.

pub mod cluster;
pub mod ensemble;

pub use cluster::{ClusterPartitioner, DEFAULT_PARTITIONS};
pub use ensemble::EnsemblePartitioner;
