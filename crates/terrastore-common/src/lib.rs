//! Terrastore Common Types and Transport
//!
//! This crate provides the shared building blocks used by every Terrastore
//! component: the error taxonomy, the ensemble-wide hash function, the typed
//! command protocol, and the TCP transport layer.
//!
//! # Overview
//!
//! Terrastore is a distributed document store organised as an ensemble of
//! clusters. Nodes exchange typed commands over persistent TCP connections;
//! this crate contains everything both ends of such a connection must agree on:
//!
//! - **Errors**: the [`TerrastoreError`] taxonomy shared by routing, transport
//!   and storage, with a retryable/non-retryable classification
//! - **Hashing**: the [`hash`] module, part of the wire-visible contract used
//!   by both partitioning tiers
//! - **Protocol**: [`Command`] and [`CommandResult`] tagged variants plus the
//!   versioned response envelope
//! - **Transport**: length-prefixed binary framing over TCP
//!
//! # Example
//!
//! ```
//! use terrastore_common::protocol::Command;
//!
//! let command = Command::GetValue {
//!     bucket: "books".to_string(),
//!     key: "dune".to_string(),
//!     predicate: None,
//! };
//! assert_eq!(command.kind(), 4);
//! ```

pub mod error;
pub mod hash;
pub mod protocol;
pub mod transport;

pub use error::{ErrorMessage, Result, TerrastoreError};
pub use protocol::{Command, CommandResult, ResponseEnvelope, ResponseStatus};
