//! The two node variants behind the routing seam.
//!
//! A [`LocalNode`] hands commands straight to the in-process worker pool; a
//! [`RemoteNode`] ships them over a persistent TCP connection and correlates
//! the replies. The router and services only ever see the [`Node`] trait.
//!
//! [`Node`]: terrastore_routing::Node

pub mod local;
pub mod remote;

pub use local::LocalNode;
pub use remote::RemoteNode;
