//! Consistent hash ring with virtual nodes.
//!
//! Each physical node is placed at `virtual_nodes` positions, the hash of
//! `"{node}:{i}"`. A key is owned by the first position at or after its own
//! hash, wrapping around; its preference list continues clockwise, skipping
//! positions of nodes already picked.

use crate::transport::NodeId;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Ring position of arbitrary bytes: the first 8 bytes of their SHA-256.
pub fn ring_hash(data: &[u8]) -> u64 {
    let digest = Sha256::digest(data);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

#[derive(Clone, Debug)]
pub struct ConsistentHashRing {
    virtual_nodes: usize,
    positions: BTreeMap<u64, NodeId>,
    nodes: BTreeSet<NodeId>,
}

impl ConsistentHashRing {
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
            positions: BTreeMap::new(),
            nodes: BTreeSet::new(),
        }
    }

    pub fn with_nodes(virtual_nodes: usize, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        let mut ring = Self::new(virtual_nodes);
        for node in nodes {
            ring.add_node(node);
        }
        ring
    }

    fn virtual_positions(&self, node: &NodeId) -> impl Iterator<Item = u64> + '_ {
        let name = node.to_string();
        (0..self.virtual_nodes).map(move |i| ring_hash(format!("{name}:{i}").as_bytes()))
    }

    /// Place a node on the ring. Returns false if it was already there.
    pub fn add_node(&mut self, node: NodeId) -> bool {
        if !self.nodes.insert(node.clone()) {
            return false;
        }
        let positions: Vec<u64> = self.virtual_positions(&node).collect();
        for position in positions {
            // a colliding position stays with its first owner
            self.positions.entry(position).or_insert_with(|| node.clone());
        }
        true
    }

    /// Take a node off the ring. Returns false if it was not there.
    pub fn remove_node(&mut self, node: &NodeId) -> bool {
        if !self.nodes.remove(node) {
            return false;
        }
        self.positions.retain(|_, owner| owner != node);
        true
    }

    /// Up to `n` distinct nodes responsible for `key`, in ring order.
    pub fn preference_list(&self, key: &str, n: usize) -> Vec<NodeId> {
        let want = n.min(self.nodes.len());
        let mut list: Vec<NodeId> = Vec::with_capacity(want);
        if want == 0 {
            return list;
        }

        let hash = ring_hash(key.as_bytes());
        let clockwise = self
            .positions
            .range(hash..)
            .chain(self.positions.range(..hash));
        for (_, node) in clockwise {
            if !list.contains(node) {
                list.push(node.clone());
                if list.len() == want {
                    break;
                }
            }
        }
        list
    }

    /// Primary owner of `key`.
    pub fn node_for(&self, key: &str) -> Option<NodeId> {
        self.preference_list(key, 1).into_iter().next()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> + '_ {
        self.nodes.iter()
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.nodes.contains(node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn ring(count: usize) -> ConsistentHashRing {
        ConsistentHashRing::with_nodes(16, (0..count).map(|i| NodeId::new(format!("node-{i}"))))
    }

    #[test]
    fn test_empty_ring() {
        let ring = ConsistentHashRing::new(10);
        assert!(ring.preference_list("key", 3).is_empty());
        assert_eq!(ring.node_for("key"), None);
    }

    #[test]
    fn test_preference_list_is_capped_by_membership() {
        let ring = ring(2);
        assert_eq!(ring.preference_list("key", 5).len(), 2);
        assert_eq!(ring.preference_list("key", 0).len(), 0);
    }

    #[test]
    fn test_primary_is_head_of_preference_list() {
        let ring = ring(5);
        for i in 0..50 {
            let key = format!("list-{i}");
            assert_eq!(ring.node_for(&key), ring.preference_list(&key, 3).first().cloned());
        }
    }

    #[test]
    fn test_add_and_remove() {
        let mut ring = ring(3);
        let extra = NodeId::new("node-9");
        assert!(ring.add_node(extra.clone()));
        assert!(!ring.add_node(extra.clone()));
        assert!(ring.contains(&extra));
        assert_eq!(ring.len(), 4);

        assert!(ring.remove_node(&extra));
        assert!(!ring.remove_node(&extra));
        for i in 0..50 {
            assert!(!ring.preference_list(&format!("k{i}"), 4).contains(&extra));
        }
    }

    #[test]
    fn test_removal_only_moves_keys_of_removed_node() {
        let before = ring(5);
        let mut after = before.clone();
        let gone = NodeId::new("node-2");
        after.remove_node(&gone);

        for i in 0..200 {
            let key = format!("key-{i}");
            let owner = before.node_for(&key).unwrap();
            if owner != gone {
                assert_eq!(after.node_for(&key), Some(owner));
            }
        }
    }

    #[test]
    fn test_virtual_nodes_spread_load() {
        let ring = ring(4);
        let mut load: HashMap<NodeId, usize> = HashMap::new();
        for i in 0..2000 {
            *load.entry(ring.node_for(&format!("key-{i}")).unwrap()).or_default() += 1;
        }
        assert_eq!(load.len(), 4);
        assert!(load.values().all(|&count| count >= 50));
    }

    proptest! {
        #[test]
        fn preference_list_is_deterministic_and_distinct(
            key in "[a-z0-9]{1,16}",
            n in 1usize..6,
            members in 1usize..8
        ) {
            let ring = ring(members);
            let first = ring.preference_list(&key, n);
            let second = ring.preference_list(&key, n);
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.len(), n.min(members));

            let distinct: BTreeSet<_> = first.iter().collect();
            prop_assert_eq!(distinct.len(), first.len());
        }
    }
}
