//! The group-membership collaborator seam.
//!
//! Intra-cluster join/leave detection belongs to an external membership
//! fabric (any gossip or cluster-membership library fits); the coordinator
//! only needs the current member list, a stream of join/leave events, and a
//! shared address table where joining nodes publish their command-server
//! endpoints.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use terrastore_common::protocol::NodeAddress;
use terrastore_common::{Result, TerrastoreError};

/// A local-cluster topology change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    Joined(String),
    Left(String),
}

/// What the coordinator needs from the membership fabric.
pub trait GroupMembership: Send + Sync {
    /// Names of the nodes currently in the local cluster.
    fn current_members(&self) -> Vec<String>;

    /// Subscribes to join/leave events.
    fn subscribe(&self) -> broadcast::Receiver<MembershipEvent>;
}

/// In-process membership fabric.
///
/// Drives coordinators in tests and single-process multi-node setups; a
/// production deployment plugs a gossip implementation into the same trait.
pub struct LocalGroupMembership {
    members: Mutex<HashSet<String>>,
    events: broadcast::Sender<MembershipEvent>,
}

impl LocalGroupMembership {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            members: Mutex::new(HashSet::new()),
            events,
        }
    }

    /// Marks a node joined and announces it.
    pub fn join(&self, node_name: impl Into<String>) {
        let node_name = node_name.into();
        if self.members.lock().insert(node_name.clone()) {
            let _ = self.events.send(MembershipEvent::Joined(node_name));
        }
    }

    /// Marks a node departed and announces it.
    pub fn leave(&self, node_name: &str) {
        if self.members.lock().remove(node_name) {
            let _ = self.events.send(MembershipEvent::Left(node_name.to_string()));
        }
    }
}

impl Default for LocalGroupMembership {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupMembership for LocalGroupMembership {
    fn current_members(&self) -> Vec<String> {
        self.members.lock().iter().cloned().collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }
}

/// Shared table of published node addresses.
///
/// A joining node publishes its command-server endpoint here before any peer
/// tries to connect; peers wait for the entry with a bounded poll, mirroring
/// the address handshake of the membership fabric.
pub struct AddressTable {
    entries: Mutex<HashMap<String, NodeAddress>>,
}

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl AddressTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn publish(&self, address: NodeAddress) {
        debug!("Published address for node {}", address.name);
        self.entries.lock().insert(address.name.clone(), address);
    }

    pub fn remove(&self, node_name: &str) {
        self.entries.lock().remove(node_name);
    }

    pub fn get(&self, node_name: &str) -> Option<NodeAddress> {
        self.entries.lock().get(node_name).cloned()
    }

    /// Waits for a node to publish its address, up to `timeout`.
    pub async fn wait_for(&self, node_name: &str, timeout: Duration) -> Result<NodeAddress> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(address) = self.get(node_name) {
                return Ok(address);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(TerrastoreError::Communication(format!(
                    "No published address for node {} within {}ms",
                    node_name,
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}

impl Default for AddressTable {
    fn default() -> Self {
        Self::new()
    }
}
