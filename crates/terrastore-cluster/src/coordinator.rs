//! Local-cluster topology coordination.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use terrastore_common::protocol::NodeAddress;
use terrastore_common::{Result, TerrastoreError};
use terrastore_routing::{Node, NodeRef, Router};
use terrastore_store::{FlushCondition, FlushStrategy, Store};

use crate::config::Config;
use crate::membership::{AddressTable, GroupMembership, MembershipEvent};
use crate::node::{LocalNode, RemoteNode};
use crate::processor::{CommandProcessor, MembershipView};
use crate::server::CommandServer;

/// How long a joining peer gets to publish its address.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Watchdog ceiling on a pause/flush/resume cycle.
const PAUSE_CEILING: Duration = Duration::from_secs(30);

/// Reacts to local-cluster membership events.
///
/// One coordinator per process owns the lifecycle of this node: it starts the
/// command processor and server, publishes the node's address, connects peers
/// as they join, and on every topology change pauses processing, tells the
/// store to flush keys the new ring no longer assigns here, and resumes.
///
/// The pause is bounded: if flushing outruns the watchdog ceiling, the
/// transition aborts with an error and processing resumes anyway.
pub struct Coordinator {
    node_id: String,
    bind_host: String,
    bind_port: u16,
    concurrency: usize,
    node_timeout: Duration,
    join_timeout: Duration,
    pause_ceiling: Duration,
    flush_strategy: FlushStrategy,
    store: Arc<Store>,
    router: Arc<Router>,
    membership: Arc<dyn GroupMembership>,
    address_table: Arc<AddressTable>,
    processor: SyncMutex<Option<Arc<CommandProcessor>>>,
    remotes: Mutex<HashMap<String, Arc<RemoteNode>>>,
    tasks: SyncMutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl Coordinator {
    pub fn new(
        config: &Config,
        store: Arc<Store>,
        router: Arc<Router>,
        membership: Arc<dyn GroupMembership>,
        address_table: Arc<AddressTable>,
    ) -> Arc<Self> {
        Self::with_transition_bounds(
            config,
            store,
            router,
            membership,
            address_table,
            JOIN_TIMEOUT,
            PAUSE_CEILING,
        )
    }

    /// Like [`new`](Self::new) with explicit transition timeouts.
    #[allow(clippy::too_many_arguments)]
    pub fn with_transition_bounds(
        config: &Config,
        store: Arc<Store>,
        router: Arc<Router>,
        membership: Arc<dyn GroupMembership>,
        address_table: Arc<AddressTable>,
        join_timeout: Duration,
        pause_ceiling: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            node_id: config.node.id.clone(),
            bind_host: config.node.host.clone(),
            bind_port: config.node.port,
            concurrency: config.node.concurrency,
            node_timeout: Duration::from_millis(config.node.timeout_ms),
            join_timeout,
            pause_ceiling,
            flush_strategy: FlushStrategy::Eager,
            store,
            router,
            membership,
            address_table,
            processor: SyncMutex::new(None),
            remotes: Mutex::new(HashMap::new()),
            tasks: SyncMutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Joins this node: starts the processor and command server, publishes
    /// the address, connects peers already in the cluster, and begins
    /// reacting to membership events.
    ///
    /// Returns the command server's actual bound port.
    pub async fn start(self: &Arc<Self>) -> Result<u16> {
        info!("Joining this node {}", self.node_id);

        let view = Arc::new(ClusterView {
            membership: self.membership.clone(),
            address_table: self.address_table.clone(),
        });
        let processor = CommandProcessor::new(self.store.clone(), view, self.concurrency);
        *self.processor.lock() = Some(processor.clone());

        let bind = format!("{}:{}", self.bind_host, self.bind_port);
        let server = CommandServer::bind(&bind, processor.clone()).await?;
        let port = server.local_addr()?.port();
        self.tasks.lock().push(server.spawn());

        let local_node = LocalNode::new(self.node_id.clone(), processor);
        local_node.connect().await?;
        self.router.add_route_to_local_node(local_node)?;
        info!("Set up this node {}", self.node_id);

        self.address_table
            .publish(NodeAddress::new(
                self.node_id.as_str(),
                self.bind_host.as_str(),
                port,
            ));

        // Connect whoever joined before us. No flush here: this node owns
        // nothing yet.
        for member in self.membership.current_members() {
            if member != self.node_id {
                self.connect_remote_node(&member).await;
            }
        }

        let coordinator = self.clone();
        self.tasks.lock().push(tokio::spawn(async move {
            coordinator.event_loop().await;
        }));

        Ok(port)
    }

    async fn event_loop(self: Arc<Self>) {
        let mut events = self.membership.subscribe();
        loop {
            match events.recv().await {
                Ok(MembershipEvent::Joined(name)) if name != self.node_id => {
                    info!("Joining remote node {}", name);
                    self.connect_remote_node(&name).await;
                    if let Err(e) = self.pause_flush_resume().await {
                        error!("Topology transition failed: {}", e);
                    }
                }
                Ok(MembershipEvent::Left(name)) if name != self.node_id => {
                    self.disconnect_remote_node(&name).await;
                    if let Err(e) = self.pause_flush_resume().await {
                        error!("Topology transition failed: {}", e);
                    }
                }
                Ok(_) => {} // our own join/leave echo
                Err(RecvError::Lagged(missed)) => {
                    warn!("Membership events lagged, missed {}", missed);
                }
                Err(RecvError::Closed) => return,
            }
        }
    }

    /// Waits for the peer's published address, connects, and routes to it.
    ///
    /// Failures are logged rather than propagated: a node we cannot reach now
    /// will be retried when membership changes again.
    async fn connect_remote_node(&self, node_name: &str) {
        let address = match self.address_table.wait_for(node_name, self.join_timeout).await {
            Ok(address) => address,
            Err(e) => {
                warn!("Cannot set up remote node {}: {}", node_name, e);
                return;
            }
        };

        let node = RemoteNode::new(address, self.node_timeout);
        if let Err(e) = node.connect().await {
            warn!("Cannot set up remote node {}: {}", node_name, e);
            return;
        }

        let local_cluster = match self.router.local_cluster() {
            Ok(cluster) => cluster,
            Err(e) => {
                warn!("Cannot route to remote node {}: {}", node_name, e);
                return;
            }
        };
        if let Err(e) = self.router.add_route_to(&local_cluster, node.clone()) {
            warn!("Cannot route to remote node {}: {}", node_name, e);
            return;
        }

        self.remotes
            .lock()
            .await
            .insert(node_name.to_string(), node);
        info!("Set up remote node {}", node_name);
    }

    async fn disconnect_remote_node(&self, node_name: &str) {
        let Some(node) = self.remotes.lock().await.remove(node_name) else {
            return;
        };
        node.disconnect().await;
        if let Ok(local_cluster) = self.router.local_cluster() {
            if let Err(e) = self.router.remove_route_to(&local_cluster, node_name) {
                warn!("Dropping route to {} failed: {}", node_name, e);
            }
        }
        info!("Discarded node {}", node_name);
    }

    /// Pauses processing, flushes keys the new ring assigns elsewhere, and
    /// resumes. Bounded by the watchdog ceiling.
    async fn pause_flush_resume(&self) -> Result<()> {
        let processor = self.processor()?;
        processor.pause();

        info!("About to flush keys on node {}", self.node_id);
        let condition = RingFlushCondition {
            router: self.router.clone(),
            local_node: self.node_id.clone(),
        };
        let flushed = tokio::time::timeout(
            self.pause_ceiling,
            self.store.flush(self.flush_strategy, &condition),
        )
        .await;

        processor.resume();

        match flushed {
            Ok(count) => {
                info!("Flushed {} keys on node {}", count, self.node_id);
                Ok(())
            }
            Err(_) => Err(TerrastoreError::internal(format!(
                "Topology transition aborted: flush exceeded the {}ms pause ceiling",
                self.pause_ceiling.as_millis()
            ))),
        }
    }

    /// Leaves the cluster: stops processing, disconnects every node, and
    /// drops all routes. Idempotent.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Disabling cluster node {}", self.node_id);

        if let Some(processor) = self.processor.lock().clone() {
            processor.stop();
        }
        self.router.cleanup().await;
        self.remotes.lock().await.clear();
        self.address_table.remove(&self.node_id);

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!("Exited cluster node {}", self.node_id);
    }

    /// The local node registered with the router, for embedding services.
    pub fn local_node(&self) -> Result<NodeRef> {
        self.router.local_node()
    }

    fn processor(&self) -> Result<Arc<CommandProcessor>> {
        self.processor
            .lock()
            .clone()
            .ok_or_else(|| TerrastoreError::internal("Coordinator not started"))
    }
}

/// Membership answer for this cluster: every current member that has
/// published an address.
struct ClusterView {
    membership: Arc<dyn GroupMembership>,
    address_table: Arc<AddressTable>,
}

impl MembershipView for ClusterView {
    fn members(&self) -> Vec<NodeAddress> {
        self.membership
            .current_members()
            .into_iter()
            .filter_map(|name| self.address_table.get(&name))
            .collect()
    }
}

/// Flushes every key whose slot the current ring assigns to another node.
struct RingFlushCondition {
    router: Arc<Router>,
    local_node: String,
}

impl FlushCondition for RingFlushCondition {
    fn should_flush(&self, bucket: &str, key: &str) -> bool {
        match self.router.route_to_node_for_key(bucket, key) {
            Ok(owner) => owner.name() != self.local_node,
            // No route: better to keep the key than to drop it nowhere.
            Err(_) => false,
        }
    }
}
