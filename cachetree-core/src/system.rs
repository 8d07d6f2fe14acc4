//! Wiring: builds the tree, spawns one task per node and hands out handles

use crate::cache::{CacheLinks, CacheNode, CacheStats};
use crate::client::{ClientHandle, ClientNode};
use crate::config::SystemConfig;
use crate::control::FaultInjector;
use crate::error::{CacheError, Result};
use crate::message::{Control, Inbox, Message, NodeSnapshot, Peer};
use crate::store::{StoreHandle, StoreNode, StoreTable};
use crate::topology::Topology;
use crate::types::{NodeId, NodeKind};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, info_span, Instrument};

/// Identity → mailbox lookup over an immutable topology
pub(crate) struct NodeDirectory {
    pub(crate) topology: Topology,
    peers: HashMap<NodeId, Peer>,
}

impl NodeDirectory {
    pub(crate) fn peer(&self, id: &NodeId) -> Result<&Peer> {
        self.peers
            .get(id)
            .ok_or_else(|| CacheError::UnknownNodeIdentity(id.to_string()))
    }

    pub(crate) fn resolve(&self, id: &str) -> Result<(NodeKind, &Peer)> {
        let id = NodeId::new(id);
        let kind = self
            .topology
            .kind_of(&id)
            .ok_or_else(|| CacheError::UnknownNodeIdentity(id.to_string()))?;
        Ok((kind, self.peer(&id)?))
    }

    fn peers_of(&self, ids: Vec<&NodeId>) -> Result<Vec<Peer>> {
        ids.into_iter().map(|id| self.peer(id).cloned()).collect()
    }

    fn parent_of(&self, id: &NodeId) -> Result<Peer> {
        let parent = self.topology.parent(id).ok_or_else(|| {
            CacheError::ConfigurationError(format!("{} has no parent", id))
        })?;
        self.peer(parent).cloned()
    }
}

/// A running cache tree
pub struct CacheSystem {
    config: SystemConfig,
    directory: Arc<NodeDirectory>,
    store: StoreHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl CacheSystem {
    /// Validate `config`, build the tree and spawn every node
    ///
    /// Any configuration error is returned before a single node exists.
    pub async fn start(config: SystemConfig) -> Result<Self> {
        config.validate()?;
        let timeouts = config.timeout_table()?;
        let topology = Topology::build(&config.topology)?;

        let mut inboxes: HashMap<NodeId, Inbox> = HashMap::new();
        let mut peers = HashMap::new();
        for node in topology.nodes() {
            let (peer, inbox) = Peer::channel(node.id.clone());
            peers.insert(node.id.clone(), peer);
            inboxes.insert(node.id.clone(), inbox);
        }
        let directory = Arc::new(NodeDirectory { topology, peers });

        let store_id = directory.topology.store_id().clone();
        let store_peer = directory.peer(&store_id)?.clone();
        let mut tasks = Vec::with_capacity(directory.topology.len());

        for node in directory.topology.nodes() {
            let me = directory.peer(&node.id)?.clone();
            let inbox = inboxes
                .remove(&node.id)
                .ok_or_else(|| CacheError::UnknownNodeIdentity(node.id.to_string()))?;
            let children = directory.peers_of(directory.topology.children(&node.id))?;
            let span = info_span!("node", id = %node.id);

            let task = match node.kind {
                NodeKind::Store => {
                    let table = StoreTable::seeded(&config.store);
                    tokio::spawn(StoreNode::new(me, inbox, table, children).run().instrument(span))
                }
                NodeKind::FarCache | NodeKind::NearCache => {
                    let links = CacheLinks {
                        upstream: directory.parent_of(&node.id)?,
                        store: store_peer.clone(),
                        children,
                    };
                    let cache = CacheNode::new(
                        me,
                        inbox,
                        node.kind,
                        links,
                        timeouts.clone(),
                        config.fallback,
                    );
                    tokio::spawn(cache.run().instrument(span))
                }
                NodeKind::Client => {
                    let near_cache = directory.parent_of(&node.id)?;
                    let client = ClientNode::new(me, inbox, near_cache, timeouts.clone());
                    tokio::spawn(client.run().instrument(span))
                }
            };
            tasks.push(task);
        }

        info!(
            "Cache system started: {} far caches, {} near caches, {} clients ({:?} fallback)",
            config.topology.n_l1_caches,
            config.topology.n_l2_caches,
            config.topology.n_clients,
            config.fallback
        );

        Ok(Self {
            config,
            store: StoreHandle::new(store_peer),
            directory,
            tasks,
        })
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.directory.topology
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Handle of the named client
    pub fn client(&self, id: &str) -> Result<ClientHandle> {
        match self.directory.resolve(id)? {
            (NodeKind::Client, peer) => Ok(ClientHandle::new(peer.clone())),
            _ => Err(CacheError::UnknownNodeIdentity(format!("{} is not a client", id))),
        }
    }

    /// Handles of every client in index order
    pub fn clients(&self) -> Vec<ClientHandle> {
        self.directory
            .topology
            .nodes_of_kind(NodeKind::Client)
            .into_iter()
            .filter_map(|id| self.directory.peer(id).ok())
            .map(|peer| ClientHandle::new(peer.clone()))
            .collect()
    }

    pub fn fault_injector(&self) -> FaultInjector {
        FaultInjector::new(Arc::clone(&self.directory))
    }

    /// Snapshot of any node's table; answered even while crashed
    pub async fn dump(&self, id: &str) -> Result<NodeSnapshot> {
        let (_, peer) = self.directory.resolve(id)?;
        peer.ask(|respond| Message::Control(Control::Dump(respond)))
            .await
    }

    pub async fn stats(&self, id: &str) -> Result<CacheStats> {
        let (_, peer) = self.directory.resolve(id)?;
        peer.ask(|respond| Message::Control(Control::Stats(respond)))
            .await
    }

    /// Empty a node's table without changing its liveness
    pub fn clear(&self, id: &str) -> Result<()> {
        let (_, peer) = self.directory.resolve(id)?;
        if peer.send(Message::Control(Control::Clear)) {
            Ok(())
        } else {
            Err(CacheError::NodeUnavailable(peer.id().clone()))
        }
    }

    /// Stop every node and wait for the tasks to finish
    pub async fn shutdown(self) {
        for node in self.directory.topology.nodes() {
            if let Ok(peer) = self.directory.peer(&node.id) {
                peer.send(Message::Control(Control::Shutdown));
            }
        }

        for task in self.tasks {
            let _ = task.await;
        }
        info!("Cache system stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Liveness;

    #[tokio::test]
    async fn test_start_rejects_bad_topology() {
        let config = SystemConfig::builder().n_l1_caches(2).n_l2_caches(3).build();

        assert!(matches!(
            CacheSystem::start(config).await,
            Err(CacheError::ConfigurationError(_))
        ));
    }

    #[tokio::test]
    async fn test_lookups_by_identity() {
        let system = CacheSystem::start(SystemConfig::default()).await.unwrap();

        assert_eq!(system.clients().len(), 8);
        assert!(system.client("client7").is_ok());
        assert!(matches!(
            system.client("l2cache0"),
            Err(CacheError::UnknownNodeIdentity(_))
        ));
        assert!(matches!(
            system.dump("l9cache9").await,
            Err(CacheError::UnknownNodeIdentity(_))
        ));

        let snapshot = system.dump("l1cache1").await.unwrap();
        assert_eq!(snapshot.kind, NodeKind::FarCache);
        assert_eq!(snapshot.liveness, Liveness::Normal);

        system.shutdown().await;
    }
}
