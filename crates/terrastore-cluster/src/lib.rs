//! Terrastore Cluster Runtime
//!
//! Everything a process needs to be a node of a Terrastore cluster: the
//! command processors executing against the local store, the two node
//! variants the router hands out, the TCP command server remote peers talk
//! to, the group-membership seam, and the two background roles that keep
//! topology fresh:
//!
//! - the [`Coordinator`] reacts to local-cluster join/leave events, rebuilds
//!   local routes, and drives the pause → flush → resume cycle
//! - the [`EnsembleManager`] polls remote clusters for their membership and
//!   feeds changes back into the router
//!
//! # Components
//!
//! - [`CommandProcessor`]: bounded worker pool with a pause gate
//! - [`LocalNode`] / [`RemoteNode`]: the uniform command endpoints
//! - [`CommandServer`]: length-prefixed TCP server executing commands
//! - [`GroupMembership`] / [`AddressTable`]: the membership collaborator seam
//! - [`config`]: the process configuration surface

pub mod config;
pub mod coordinator;
pub mod ensemble;
pub mod membership;
pub mod node;
pub mod processor;
pub mod server;

pub use config::Config;
pub use coordinator::Coordinator;
pub use ensemble::EnsembleManager;
pub use membership::{AddressTable, GroupMembership, LocalGroupMembership, MembershipEvent};
pub use node::{LocalNode, RemoteNode};
pub use processor::{CommandProcessor, MembershipView};
pub use server::CommandServer;
