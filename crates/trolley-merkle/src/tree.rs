//! Binary Merkle tree over a sorted key/value set.
//!
//! Leaves are `H(key ++ value)` ordered by key. Each level above pairs up the
//! hashes below it; an odd trailing hash is paired with [`Hash::empty`]. Two
//! trees are compared top-down and only subtrees whose hashes differ are
//! visited, so the work done is proportional to the divergence.

use crate::hash::Hash;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleTree {
    /// Sorted by key, one per record
    leaves: Vec<(String, Hash)>,
    /// `levels[0]` are the leaf hashes, the last level holds the root
    levels: Vec<Vec<Hash>>,
}

impl MerkleTree {
    pub fn new() -> Self {
        Self {
            leaves: Vec::new(),
            levels: Vec::new(),
        }
    }

    /// Build a tree from `(key, serialized value)` pairs. Duplicate keys keep
    /// the last value.
    pub fn from_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: AsRef<[u8]>,
    {
        let sorted: BTreeMap<String, Hash> = entries
            .into_iter()
            .map(|(key, value)| {
                let key = key.into();
                let hash = Hash::leaf(&key, value.as_ref());
                (key, hash)
            })
            .collect();

        let mut tree = Self {
            leaves: sorted.into_iter().collect(),
            levels: Vec::new(),
        };
        tree.rebuild();
        tree
    }

    fn rebuild(&mut self) {
        self.levels.clear();
        if self.leaves.is_empty() {
            return;
        }

        let mut level: Vec<Hash> = self.leaves.iter().map(|(_, hash)| *hash).collect();
        while level.len() > 1 {
            let parents = level
                .chunks(2)
                .map(|pair| {
                    let right = pair.get(1).copied().unwrap_or_else(Hash::empty);
                    Hash::combine(&pair[0], &right)
                })
                .collect();
            self.levels.push(std::mem::replace(&mut level, parents));
        }
        self.levels.push(level);
    }

    /// Insert or replace one record.
    pub fn update(&mut self, key: &str, value: &[u8]) {
        let hash = Hash::leaf(key, value);
        match self.leaves.binary_search_by(|(k, _)| k.as_str().cmp(key)) {
            Ok(pos) => {
                if self.leaves[pos].1 == hash {
                    return;
                }
                self.leaves[pos].1 = hash;
            }
            Err(pos) => self.leaves.insert(pos, (key.to_string(), hash)),
        }
        self.rebuild();
    }

    pub fn remove(&mut self, key: &str) -> bool {
        match self.leaves.binary_search_by(|(k, _)| k.as_str().cmp(key)) {
            Ok(pos) => {
                self.leaves.remove(pos);
                self.rebuild();
                true
            }
            Err(_) => false,
        }
    }

    /// Root hash; the empty tree's root is [`Hash::empty`].
    pub fn root(&self) -> Hash {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_else(Hash::empty)
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Number of levels, leaves included.
    pub fn height(&self) -> usize {
        self.levels.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.leaves.iter().map(|(key, _)| key.as_str())
    }

    pub fn leaf(&self, key: &str) -> Option<Hash> {
        self.leaves
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
            .ok()
            .map(|pos| self.leaves[pos].1)
    }

    fn node(&self, level: usize, index: usize) -> Option<Hash> {
        self.levels.get(level)?.get(index).copied()
    }

    /// Nodes at `level` if the tree were extended that high.
    fn width(&self, level: usize) -> usize {
        match self.leaves.len() {
            0 => 0,
            n => ((n - 1) >> level.min(usize::BITS as usize - 1)) + 1,
        }
    }

    /// Keys that may differ between the two trees.
    ///
    /// Both trees are walked from the top of the taller one. Wherever the
    /// hashes at the same position disagree (or one side has no node there)
    /// the walk descends; at a mismatching leaf position the keys of both
    /// trees at that position are reported.
    pub fn diff(&self, other: &MerkleTree) -> BTreeSet<String> {
        let mut diverging = BTreeSet::new();
        if self.root() == other.root() {
            return diverging;
        }
        let top = self.height().max(other.height());
        if top > 0 {
            self.diff_node(other, top - 1, 0, &mut diverging);
        }
        diverging
    }

    fn diff_node(
        &self,
        other: &MerkleTree,
        level: usize,
        index: usize,
        diverging: &mut BTreeSet<String>,
    ) {
        if index >= self.width(level).max(other.width(level)) {
            return;
        }
        let mine = self.node(level, index);
        if mine.is_some() && mine == other.node(level, index) {
            return;
        }

        if level == 0 {
            for tree in [self, other] {
                if let Some((key, _)) = tree.leaves.get(index) {
                    diverging.insert(key.clone());
                }
            }
            return;
        }

        self.diff_node(other, level - 1, 2 * index, diverging);
        self.diff_node(other, level - 1, 2 * index + 1, diverging);
    }
}

impl Default for MerkleTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Hasher;

    fn tree(entries: &[(&str, &str)]) -> MerkleTree {
        MerkleTree::from_entries(entries.iter().map(|(k, v)| (*k, v.as_bytes())))
    }

    #[test]
    fn test_empty_tree() {
        let empty = MerkleTree::new();
        assert_eq!(empty.root(), Hash::empty());
        assert_eq!(empty.height(), 0);
        assert!(empty.diff(&MerkleTree::new()).is_empty());
    }

    #[test]
    fn test_single_leaf_root() {
        let t = tree(&[("a", "1")]);
        assert_eq!(t.root(), Hash::leaf("a", b"1"));
        assert_eq!(t.height(), 1);
    }

    #[test]
    fn test_odd_level_is_padded() {
        let t = tree(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let ab = Hash::combine(&Hash::leaf("a", b"1"), &Hash::leaf("b", b"2"));
        let c = Hash::combine(&Hash::leaf("c", b"3"), &Hasher::hash(b""));
        assert_eq!(t.root(), Hash::combine(&ab, &c));
        assert_eq!(t.height(), 3);
    }

    #[test]
    fn test_order_independent() {
        let a = tree(&[("x", "1"), ("y", "2")]);
        let b = tree(&[("y", "2"), ("x", "1")]);
        assert_eq!(a.root(), b.root());
    }

    #[test]
    fn test_update_and_remove() {
        let mut t = tree(&[("a", "1"), ("c", "3")]);
        t.update("b", b"2");
        assert_eq!(t.root(), tree(&[("a", "1"), ("b", "2"), ("c", "3")]).root());
        assert_eq!(t.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);

        t.update("b", b"two");
        assert_eq!(t.leaf("b"), Some(Hash::leaf("b", b"two")));

        assert!(t.remove("b"));
        assert!(!t.remove("b"));
        assert_eq!(t.root(), tree(&[("a", "1"), ("c", "3")]).root());
    }

    #[test]
    fn test_disjoint_keys_both_reported() {
        let a = tree(&[("A", "list a")]);
        let b = tree(&[("B", "list b")]);
        let expected: BTreeSet<String> = ["A", "B"].iter().map(|s| s.to_string()).collect();
        assert_eq!(a.diff(&b), expected);
        assert_eq!(b.diff(&a), expected);
    }

    #[test]
    fn test_single_changed_value() {
        let entries: Vec<(String, String)> =
            (0..16).map(|i| (format!("k{i:02}"), format!("v{i}"))).collect();
        let a = MerkleTree::from_entries(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
        let mut b = a.clone();
        b.update("k07", b"changed");

        let diff = a.diff(&b);
        assert_eq!(diff.into_iter().collect::<Vec<_>>(), vec!["k07"]);
    }

    #[test]
    fn test_extra_key_on_one_side() {
        let a = tree(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let b = tree(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5")]);
        let diff = a.diff(&b);
        assert!(diff.contains("d"));
        assert!(diff.contains("e"));
        assert!(!diff.contains("a"));
    }

    #[test]
    fn test_against_empty_tree() {
        let a = tree(&[("a", "1"), ("b", "2")]);
        let diff = a.diff(&MerkleTree::new());
        assert_eq!(diff.len(), 2);
    }
}
