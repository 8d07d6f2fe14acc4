//! Error types for the cache tree
//!
//! Data-plane errors (`KeyNotFound`, `RequestTimedOut`) travel downward as
//! `RequestFailed` messages, so the error type is cheap to clone.

use crate::types::{Key, NodeId, RequestKind};
use thiserror::Error;

/// Main error type for cache tree operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The store has no entry for the key
    #[error("Key not found: {key}")]
    KeyNotFound { key: Key },

    /// No reply within the configured deadline
    #[error("{kind} request for key {key} timed out after {timeout_ms}ms")]
    RequestTimedOut {
        kind: RequestKind,
        key: Key,
        timeout_ms: u64,
    },

    /// Control surface addressed a node name that is not in the topology
    #[error("Unknown node identity: {0}")]
    UnknownNodeIdentity(String),

    /// Control action not supported by the addressed node (e.g. crashing the store)
    #[error("Node {node} does not support {action}")]
    UnsupportedControl { node: NodeId, action: String },

    /// Malformed or missing startup configuration
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A reply contradicted the request it answers
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Node task is gone (system shut down)
    #[error("Node unavailable: {0}")]
    NodeUnavailable(NodeId),
}

impl CacheError {
    /// Errors that travel through the tree rather than out of the control surface
    pub fn is_data_plane(&self) -> bool {
        matches!(
            self,
            CacheError::KeyNotFound { .. } | CacheError::RequestTimedOut { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CacheError::RequestTimedOut { .. })
    }
}

/// Result type alias for cache tree operations
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CacheError::KeyNotFound { key: 42 };
        assert_eq!(error.to_string(), "Key not found: 42");

        let timeout = CacheError::RequestTimedOut {
            kind: RequestKind::Read,
            key: 5,
            timeout_ms: 250,
        };
        assert!(timeout.to_string().contains("timed out after 250ms"));

        let unknown = CacheError::UnknownNodeIdentity("l1cache9".to_string());
        assert!(unknown.to_string().contains("l1cache9"));
    }

    #[test]
    fn test_error_classification() {
        assert!(CacheError::KeyNotFound { key: 1 }.is_data_plane());
        assert!(CacheError::RequestTimedOut {
            kind: RequestKind::Write,
            key: 1,
            timeout_ms: 10
        }
        .is_timeout());
        assert!(!CacheError::ConfigurationError("x".into()).is_data_plane());
        assert!(!CacheError::KeyNotFound { key: 1 }.is_timeout());
    }
}
