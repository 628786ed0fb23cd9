//! Command variants and their payloads.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Protocol version stamped into every serialized request.
pub const PROTOCOL_VERSION: u16 = 1;

/// Address of a cluster member, as published in membership responses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }

    /// `host:port` form used to open a connection.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A value predicate in `type:expression` form, e.g. `field-eq:author=Herbert`.
///
/// The condition type is resolved against the executing node's condition
/// registry; an unknown type is a processing failure on that node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    pub condition_type: String,
    pub expression: String,
}

impl Predicate {
    /// Parses the `type:expression` text form.
    pub fn parse(text: &str) -> Option<Self> {
        let (condition_type, expression) = text.split_once(':')?;
        if condition_type.is_empty() {
            return None;
        }
        Some(Self {
            condition_type: condition_type.to_string(),
            expression: expression.to_string(),
        })
    }
}

/// A key range with an optional upper bound and a result limit.
///
/// `limit == 0` means unbounded. Keys are ordered by the named comparator,
/// resolved on the executing node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: String,
    pub end: Option<String>,
    pub limit: usize,
    pub comparator: String,
}

/// A typed request executed by a node against the storage engine.
///
/// Unicast commands (`GetValue`, `PutValue`, ...) must be routed to the node
/// owning the `(bucket, key)` slot; the remaining commands may be served by
/// any member of the target cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload")]
pub enum Command {
    /// Names of the buckets holding keys on the receiving node.
    GetBuckets,
    /// Keys of a bucket local to the receiving node.
    GetKeys { bucket: String },
    /// Sorted keys of a bucket falling inside a range, served from the
    /// bucket's sorted snapshot if one younger than `time_to_live` exists.
    KeysInRange {
        bucket: String,
        range: Range,
        time_to_live: u64,
    },
    /// A single value, optionally gated by a predicate.
    GetValue {
        bucket: String,
        key: String,
        predicate: Option<Predicate>,
    },
    /// A batch of values local to the receiving node.
    GetValues {
        bucket: String,
        keys: HashSet<String>,
        predicate: Option<Predicate>,
    },
    /// Stores a value, optionally gated by a predicate on the current value.
    PutValue {
        bucket: String,
        key: String,
        value: serde_json::Value,
        predicate: Option<Predicate>,
    },
    /// Removes a single key.
    RemoveValue { bucket: String, key: String },
    /// Removes a batch of keys, returning the removed entries.
    RemoveValues {
        bucket: String,
        keys: HashSet<String>,
        predicate: Option<Predicate>,
    },
    /// Drops a whole bucket; sent to one node per cluster.
    RemoveBucket { bucket: String },
    /// Applies a named server-side function to a value.
    Update {
        bucket: String,
        key: String,
        function: String,
        params: serde_json::Value,
        timeout_ms: u64,
    },
    /// Current members of the receiving node's cluster, with addresses.
    Membership,
}

impl Command {
    /// Stable numeric kind for the wire header.
    pub fn kind(&self) -> u16 {
        match self {
            Command::GetBuckets => 1,
            Command::GetKeys { .. } => 2,
            Command::KeysInRange { .. } => 3,
            Command::GetValue { .. } => 4,
            Command::GetValues { .. } => 5,
            Command::PutValue { .. } => 6,
            Command::RemoveValue { .. } => 7,
            Command::RemoveValues { .. } => 8,
            Command::RemoveBucket { .. } => 9,
            Command::Update { .. } => 10,
            Command::Membership => 11,
        }
    }

    /// Whether the numeric kind is known to this protocol version.
    pub fn is_known_kind(kind: u16) -> bool {
        (1..=11).contains(&kind)
    }
}
