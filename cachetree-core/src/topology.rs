//! Cache tree topology
//!
//! The tree is built once from configuration by a pure function and is
//! read-only afterwards. Edges point from parent to child:
//! store → far caches → near caches → clients.

use crate::config::TopologyConfig;
use crate::error::{CacheError, Result};
use crate::types::{NodeId, NodeKind};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::Serialize;
use std::collections::HashMap;

/// A node of the tree as known at build time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSpec {
    pub id: NodeId,
    pub kind: NodeKind,
}

/// Immutable parent/child graph keyed by node identity
#[derive(Debug, Clone)]
pub struct Topology {
    graph: DiGraph<NodeSpec, ()>,
    indices: HashMap<NodeId, NodeIndex>,
    root: NodeIndex,
}

impl Topology {
    /// Build the tree described by `config`
    pub fn build(config: &TopologyConfig) -> Result<Self> {
        let (l1_fanout, l2_fanout) = fanout_plan(config)?;

        let mut topology = Self {
            graph: DiGraph::new(),
            indices: HashMap::new(),
            root: NodeIndex::new(0),
        };
        topology.root = topology.add_node(NodeId::store(), NodeKind::Store);

        let far: Vec<NodeIndex> = (0..config.n_l1_caches)
            .map(|i| topology.add_node(NodeId::far_cache(i), NodeKind::FarCache))
            .collect();
        for &idx in &far {
            topology.graph.add_edge(topology.root, idx, ());
        }

        let near: Vec<NodeIndex> = (0..config.n_l2_caches)
            .map(|i| topology.add_node(NodeId::near_cache(i), NodeKind::NearCache))
            .collect();
        attach(&mut topology.graph, &far, &near, &l1_fanout);

        let clients: Vec<NodeIndex> = (0..config.n_clients)
            .map(|i| topology.add_node(NodeId::client(i), NodeKind::Client))
            .collect();
        attach(&mut topology.graph, &near, &clients, &l2_fanout);

        Ok(topology)
    }

    fn add_node(&mut self, id: NodeId, kind: NodeKind) -> NodeIndex {
        let idx = self.graph.add_node(NodeSpec {
            id: id.clone(),
            kind,
        });
        self.indices.insert(id, idx);
        idx
    }

    pub fn store_id(&self) -> &NodeId {
        &self.graph[self.root].id
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.indices.contains_key(id)
    }

    pub fn kind_of(&self, id: &NodeId) -> Option<NodeKind> {
        self.indices.get(id).map(|&idx| self.graph[idx].kind)
    }

    /// Parent of a node (`None` for the store or unknown ids)
    pub fn parent(&self, id: &NodeId) -> Option<&NodeId> {
        let &idx = self.indices.get(id)?;
        self.graph
            .neighbors_directed(idx, Direction::Incoming)
            .next()
            .map(|parent| &self.graph[parent].id)
    }

    /// Children of a node in build order
    pub fn children(&self, id: &NodeId) -> Vec<&NodeId> {
        let Some(&idx) = self.indices.get(id) else {
            return vec![];
        };

        let mut children: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .collect();
        children.sort();
        children.into_iter().map(|c| &self.graph[c].id).collect()
    }

    /// All nodes of one kind in index order
    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<&NodeId> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph[idx].kind == kind)
            .map(|idx| &self.graph[idx].id)
            .collect()
    }

    /// Every node in build order
    pub fn nodes(&self) -> impl Iterator<Item = &NodeSpec> {
        self.graph.node_indices().map(move |idx| &self.graph[idx])
    }

    /// Nodes a request from `id` traverses on its way to the store, store last
    pub fn path_to_store(&self, id: &NodeId) -> Vec<&NodeId> {
        let mut path = Vec::new();
        let mut current = self.parent(id);
        while let Some(node) = current {
            path.push(node);
            current = self.parent(node);
        }
        path
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Indented text rendering of the tree
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_node(self.store_id(), 0, &mut out);
        out
    }

    fn render_node(&self, id: &NodeId, depth: usize, out: &mut String) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(id.as_str());
        out.push('\n');
        for child in self.children(id) {
            self.render_node(child, depth + 1, out);
        }
    }
}

/// Attach `children` to `parents` contiguously, `fanout[i]` children to parent `i`
fn attach(
    graph: &mut DiGraph<NodeSpec, ()>,
    parents: &[NodeIndex],
    children: &[NodeIndex],
    fanout: &[usize],
) {
    let mut next = children.iter();
    for (parent, &count) in parents.iter().zip(fanout) {
        for &child in next.by_ref().take(count) {
            graph.add_edge(*parent, child, ());
        }
    }
}

/// Per-parent child counts for the L1→L2 and L2→client levels
fn fanout_plan(config: &TopologyConfig) -> Result<(Vec<usize>, Vec<usize>)> {
    if config.n_l1_caches == 0 || config.n_l2_caches == 0 || config.n_clients == 0 {
        return Err(CacheError::ConfigurationError(
            "N_CLIENTS, N_L1_CACHES and N_L2_CACHES must all be greater than 0".to_string(),
        ));
    }

    if config.balanced {
        if config.n_l2_caches % config.n_l1_caches != 0 {
            return Err(CacheError::ConfigurationError(format!(
                "balanced topology needs N_L2_CACHES ({}) divisible by N_L1_CACHES ({})",
                config.n_l2_caches, config.n_l1_caches
            )));
        }
        if config.n_clients % config.n_l2_caches != 0 {
            return Err(CacheError::ConfigurationError(format!(
                "balanced topology needs N_CLIENTS ({}) divisible by N_L2_CACHES ({})",
                config.n_clients, config.n_l2_caches
            )));
        }

        let l1 = vec![config.n_l2_caches / config.n_l1_caches; config.n_l1_caches];
        let l2 = vec![config.n_clients / config.n_l2_caches; config.n_l2_caches];
        return Ok((l1, l2));
    }

    check_fanout("l1_fanout", &config.l1_fanout, config.n_l1_caches, config.n_l2_caches)?;
    check_fanout("l2_fanout", &config.l2_fanout, config.n_l2_caches, config.n_clients)?;
    Ok((config.l1_fanout.clone(), config.l2_fanout.clone()))
}

fn check_fanout(name: &str, fanout: &[usize], parents: usize, children: usize) -> Result<()> {
    if fanout.len() != parents {
        return Err(CacheError::ConfigurationError(format!(
            "{} has {} entries, expected {}",
            name,
            fanout.len(),
            parents
        )));
    }
    let total: usize = fanout.iter().sum();
    if total != children {
        return Err(CacheError::ConfigurationError(format!(
            "{} assigns {} children, expected {}",
            name, total, children
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balanced(n_l1: usize, n_l2: usize, n_clients: usize) -> TopologyConfig {
        TopologyConfig {
            n_clients,
            n_l1_caches: n_l1,
            n_l2_caches: n_l2,
            balanced: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_balanced_tree() {
        let topology = Topology::build(&balanced(2, 4, 8)).unwrap();

        assert_eq!(topology.len(), 1 + 2 + 4 + 8);
        assert_eq!(
            topology.children(&NodeId::store()),
            vec![&NodeId::far_cache(0), &NodeId::far_cache(1)]
        );
        assert_eq!(
            topology.children(&NodeId::far_cache(1)),
            vec![&NodeId::near_cache(2), &NodeId::near_cache(3)]
        );
        assert_eq!(topology.parent(&NodeId::client(5)), Some(&NodeId::near_cache(2)));
        assert_eq!(topology.parent(&NodeId::store()), None);
    }

    #[test]
    fn test_unbalanced_tree() {
        let config = TopologyConfig {
            n_clients: 4,
            n_l1_caches: 2,
            n_l2_caches: 3,
            balanced: false,
            l1_fanout: vec![2, 1],
            l2_fanout: vec![1, 0, 3],
        };
        let topology = Topology::build(&config).unwrap();

        assert_eq!(topology.children(&NodeId::far_cache(0)).len(), 2);
        assert_eq!(topology.parent(&NodeId::near_cache(2)), Some(&NodeId::far_cache(1)));
        assert!(topology.children(&NodeId::near_cache(1)).is_empty());
        assert_eq!(topology.children(&NodeId::near_cache(2)).len(), 3);
    }

    #[test]
    fn test_invalid_shapes() {
        assert!(Topology::build(&balanced(2, 3, 6)).is_err());
        assert!(Topology::build(&balanced(1, 2, 3)).is_err());
        assert!(Topology::build(&balanced(0, 2, 2)).is_err());

        let config = TopologyConfig {
            n_clients: 2,
            n_l1_caches: 1,
            n_l2_caches: 2,
            balanced: false,
            l1_fanout: vec![2],
            l2_fanout: vec![1],
        };
        assert!(matches!(
            Topology::build(&config),
            Err(CacheError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_lookup_helpers() {
        let topology = Topology::build(&balanced(1, 2, 2)).unwrap();

        assert_eq!(topology.kind_of(&NodeId::far_cache(0)), Some(NodeKind::FarCache));
        assert_eq!(topology.kind_of(&NodeId::new("l1cache7")), None);
        assert!(topology.contains(&NodeId::client(1)));
        assert_eq!(
            topology.nodes_of_kind(NodeKind::NearCache),
            vec![&NodeId::near_cache(0), &NodeId::near_cache(1)]
        );
        assert_eq!(
            topology.path_to_store(&NodeId::client(1)),
            vec![&NodeId::near_cache(1), &NodeId::far_cache(0), &NodeId::store()]
        );
    }

    #[test]
    fn test_render() {
        let topology = Topology::build(&balanced(1, 1, 2)).unwrap();
        let rendered = topology.render();

        assert_eq!(
            rendered,
            "store\n  l1cache0\n    l2cache0\n      client0\n      client1\n"
        );
    }
}
