//! The uniform command endpoint the router hands out.

use std::sync::Arc;

use async_trait::async_trait;
use terrastore_common::protocol::{Command, CommandResult};
use terrastore_common::Result;

/// A node is anything that can execute a command and report the outcome:
/// the in-process worker pool of the local node, or a persistent socket to a
/// remote one. Routing neither knows nor cares which.
#[async_trait]
pub trait Node: Send + Sync {
    /// Logical node name; unique inside the node's cluster and the sort key
    /// for ring builds.
    fn name(&self) -> &str;

    /// Executes a command on this node and waits for the outcome.
    ///
    /// Safe to call concurrently; ordering between concurrent sends is not
    /// guaranteed.
    async fn send(&self, command: Command) -> Result<CommandResult>;

    /// Brings up the node's transport. Idempotent.
    async fn connect(&self) -> Result<()>;

    /// Tears the transport down, failing any in-flight sends. Idempotent.
    async fn disconnect(&self);
}

pub type NodeRef = Arc<dyn Node>;
