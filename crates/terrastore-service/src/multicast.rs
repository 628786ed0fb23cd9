//! One-node-per-cluster command delivery.

use tracing::warn;

use terrastore_common::protocol::{Command, CommandResult};
use terrastore_common::{Result, TerrastoreError};
use terrastore_routing::{Node as _, NodeRef, Router};

/// Sends a command to one node of every cluster, trying each cluster's
/// members in order and stopping at the first success.
///
/// A transport failure moves on to the next member; a processing failure is
/// the cluster's actual answer and aborts the whole multicast. A cluster with
/// no responsive member (or no member at all) fails the multicast with the
/// partial-application error, since earlier clusters may already have
/// executed the command.
pub async fn one_node_per_cluster(
    router: &Router,
    command: Command,
) -> Result<Vec<CommandResult>> {
    let routes = router.broadcast_route()?;
    let mut partials = Vec::with_capacity(routes.len());
    for (cluster, nodes) in routes {
        partials.push(first_success(cluster.name(), &nodes, &command).await?);
    }
    Ok(partials)
}

async fn first_success(
    cluster_name: &str,
    nodes: &[NodeRef],
    command: &Command,
) -> Result<CommandResult> {
    for node in nodes {
        match node.send(command.clone()).await {
            Ok(result) => return Ok(result),
            Err(e @ (TerrastoreError::Communication(_) | TerrastoreError::MissingRoute(_))) => {
                warn!(
                    "Node {} of cluster {} unreachable, trying next: {}",
                    node.name(),
                    cluster_name,
                    e
                );
            }
            Err(e) => return Err(e),
        }
    }
    Err(TerrastoreError::MissingRoute(
        "The operation has been only partially applied. Some clusters of your ensemble may be down or unreachable."
            .to_string(),
    ))
}
