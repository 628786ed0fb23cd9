//! Terrastore Storage Collaborator
//!
//! In-memory storage engine sitting behind the node abstraction. The routing
//! core treats the engine as a local command processor: every storage command
//! a node receives ends up in [`Store::execute`], which dispatches on the
//! command kind and runs against named buckets.
//!
//! The production engine (on-disk buckets, durable snapshots) is an external
//! collaborator; this crate implements the same operation surface in memory so
//! the core has something real to execute against, and so tests exercise the
//! full command path.
//!
//! # Components
//!
//! - [`Value`]: JSON-validated document payload
//! - [`Bucket`] / [`Store`]: key spaces with conditional operations, named
//!   update functions, range queries over sorted snapshots, and flushing
//! - [`comparators`] / [`conditions`] / [`functions`]: named registries
//!   resolved on the executing node, never on the caller
//! - [`events`]: the memory event bus publishing value change/removal events

pub mod bucket;
pub mod comparators;
pub mod conditions;
pub mod events;
pub mod functions;
pub mod snapshot;
pub mod store;
pub mod value;

pub use bucket::Bucket;
pub use events::{Event, EventBus, EventListener, MemoryEventBus};
pub use store::{FlushCondition, FlushStrategy, Store};
pub use value::Value;
