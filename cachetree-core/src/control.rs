//! Fault injection and node enumeration, addressed by node identity

use crate::error::{CacheError, Result};
use crate::message::{Control, Message, Peer};
use crate::system::NodeDirectory;
use crate::types::{Liveness, NodeId, NodeKind};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Identity and liveness of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub id: NodeId,
    pub liveness: Liveness,
}

/// Nodes of one kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeListing {
    pub kind: NodeKind,
    pub nodes: Vec<NodeStatus>,
    pub count: usize,
}

/// Resolve a node group name as used by the control surface
///
/// Accepts the plural group names (`clients`, `l2caches`, `l1caches`) as
/// well as the serialized kind names.
pub fn parse_kind(name: &str) -> Option<NodeKind> {
    match name {
        "store" => Some(NodeKind::Store),
        "l1caches" | "l1cache" | "far_cache" | "far_caches" => Some(NodeKind::FarCache),
        "l2caches" | "l2cache" | "near_cache" | "near_caches" => Some(NodeKind::NearCache),
        "clients" | "client" => Some(NodeKind::Client),
        _ => None,
    }
}

/// Delivers crash/recover signals to cache nodes
#[derive(Clone)]
pub struct FaultInjector {
    directory: Arc<NodeDirectory>,
}

impl FaultInjector {
    pub(crate) fn new(directory: Arc<NodeDirectory>) -> Self {
        Self { directory }
    }

    /// Every node of `kind` with its current liveness
    pub async fn list(&self, kind: NodeKind) -> Result<NodeListing> {
        let mut nodes = Vec::new();
        for id in self.directory.topology.nodes_of_kind(kind) {
            let peer = self.directory.peer(id)?;
            let liveness = peer
                .ask(|respond| Message::Control(Control::Liveness(respond)))
                .await?;
            nodes.push(NodeStatus {
                id: id.clone(),
                liveness,
            });
        }

        Ok(NodeListing {
            kind,
            count: nodes.len(),
            nodes,
        })
    }

    /// Crash the named cache node
    pub fn crash(&self, id: &str) -> Result<()> {
        let peer = self.cache_peer(id, "crash")?;
        info!("Injecting crash into {}", peer.id());
        self.deliver(peer, Control::Crash)
    }

    /// Recover the named cache node
    pub fn recover(&self, id: &str) -> Result<()> {
        let peer = self.cache_peer(id, "recover")?;
        info!("Recovering {}", peer.id());
        self.deliver(peer, Control::Recover)
    }

    fn cache_peer(&self, id: &str, action: &str) -> Result<&Peer> {
        let (kind, peer) = self.directory.resolve(id)?;
        if !kind.is_cache() {
            return Err(CacheError::UnsupportedControl {
                node: peer.id().clone(),
                action: action.to_string(),
            });
        }
        Ok(peer)
    }

    fn deliver(&self, peer: &Peer, control: Control) -> Result<()> {
        if peer.send(Message::Control(control)) {
            Ok(())
        } else {
            Err(CacheError::NodeUnavailable(peer.id().clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!(parse_kind("clients"), Some(NodeKind::Client));
        assert_eq!(parse_kind("l2caches"), Some(NodeKind::NearCache));
        assert_eq!(parse_kind("far_cache"), Some(NodeKind::FarCache));
        assert_eq!(parse_kind("caches"), None);
    }
}
