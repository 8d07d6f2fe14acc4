//! Core type definitions shared by every node in the cache tree

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Key type - small fixed-size integer
pub type Key = u32;

/// Value type - small fixed-size integer
pub type Value = i64;

/// Per-key version assigned by the store
pub type Version = u64;

/// A versioned key/value pair
///
/// Entries are only ever replaced as a whole. A cache never edits the value
/// or version of an entry it holds; it swaps in a fresher one or drops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    pub key: Key,
    pub value: Value,
    pub version: Version,
}

impl Entry {
    pub fn new(key: Key, value: Value, version: Version) -> Self {
        Self { key, value, version }
    }

    /// Whether this entry should replace `current` (absent counts as older)
    pub fn is_newer_than(&self, current: Option<&Entry>) -> bool {
        match current {
            Some(current) => self.version > current.version,
            None => true,
        }
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={} (v{})", self.key, self.value, self.version)
    }
}

/// Stable node identity assigned at topology build time (e.g. `l1cache3`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn store() -> Self {
        Self::new(NodeKind::Store.prefix())
    }

    pub fn far_cache(index: usize) -> Self {
        Self(format!("{}{}", NodeKind::FarCache.prefix(), index))
    }

    pub fn near_cache(index: usize) -> Self {
        Self(format!("{}{}", NodeKind::NearCache.prefix(), index))
    }

    pub fn client(index: usize) -> Self {
        Self(format!("{}{}", NodeKind::Client.prefix(), index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Role of a node in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Authoritative key-value store (root)
    Store,
    /// L1 cache, child of the store
    FarCache,
    /// L2 cache, serves clients
    NearCache,
    /// Request issuer attached to a near cache
    Client,
}

impl NodeKind {
    /// Identity prefix used when naming nodes of this kind
    pub fn prefix(&self) -> &'static str {
        match self {
            NodeKind::Store => "store",
            NodeKind::FarCache => "l1cache",
            NodeKind::NearCache => "l2cache",
            NodeKind::Client => "client",
        }
    }

    /// Whether nodes of this kind take part in the crash/recover state machine
    pub fn is_cache(&self) -> bool {
        matches!(self, NodeKind::FarCache | NodeKind::NearCache)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Store => write!(f, "store"),
            NodeKind::FarCache => write!(f, "far cache"),
            NodeKind::NearCache => write!(f, "near cache"),
            NodeKind::Client => write!(f, "client"),
        }
    }
}

/// Correlates a request with its confirmation or failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First group is plenty to tell requests apart in logs
        let id = self.0.to_string();
        f.write_str(id.split('-').next().unwrap_or(&id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Read,
    Write,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Read => write!(f, "read"),
            RequestKind::Write => write!(f, "write"),
        }
    }
}

/// A data-plane operation travelling up the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read { key: Key },
    Write { key: Key, value: Value },
}

impl Operation {
    pub fn kind(&self) -> RequestKind {
        match self {
            Operation::Read { .. } => RequestKind::Read,
            Operation::Write { .. } => RequestKind::Write,
        }
    }

    pub fn key(&self) -> Key {
        match self {
            Operation::Read { key } | Operation::Write { key, .. } => *key,
        }
    }
}

/// Liveness of a cache node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    #[default]
    Normal,
    Crashed,
}

impl Liveness {
    pub fn is_crashed(&self) -> bool {
        matches!(self, Liveness::Crashed)
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Liveness::Normal => write!(f, "normal"),
            Liveness::Crashed => write!(f, "crashed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_newer_than() {
        let old = Entry::new(5, 10, 1);
        let new = Entry::new(5, 77, 2);

        assert!(new.is_newer_than(Some(&old)));
        assert!(!old.is_newer_than(Some(&new)));
        assert!(!new.is_newer_than(Some(&new)));
        assert!(old.is_newer_than(None));
    }

    #[test]
    fn test_node_id_naming() {
        assert_eq!(NodeId::store().as_str(), "store");
        assert_eq!(NodeId::far_cache(3).as_str(), "l1cache3");
        assert_eq!(NodeId::near_cache(0).as_str(), "l2cache0");
        assert_eq!(NodeId::client(12).to_string(), "client12");
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
        assert_eq!(RequestId::new().to_string().len(), 8);
    }

    #[test]
    fn test_operation_accessors() {
        let read = Operation::Read { key: 4 };
        let write = Operation::Write { key: 9, value: -3 };

        assert_eq!(read.kind(), RequestKind::Read);
        assert_eq!(write.kind(), RequestKind::Write);
        assert_eq!(read.key(), 4);
        assert_eq!(write.key(), 9);
    }

    #[test]
    fn test_liveness_serde() {
        let json = serde_json::to_string(&Liveness::Crashed).unwrap();
        assert_eq!(json, "\"crashed\"");
        assert_eq!(Liveness::default(), Liveness::Normal);
    }
}
