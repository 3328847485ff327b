//! Vector clocks for per-key causal ordering.
//!
//! Every stored record carries a clock mapping node ids to counters. A node
//! accepting a write bumps its own entry, so comparing two clocks tells
//! whether one version descends from the other or whether they were written
//! concurrently.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use trolley_core::lattice::Lattice;

/// Causal relation between two clocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockOrdering {
    /// Happened before the other
    Less,
    /// Happened after the other
    Greater,
    Equal,
    /// Neither descends from the other
    Concurrent,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    entries: BTreeMap<String, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, u64)>) -> Self {
        Self {
            entries: entries.into_iter().filter(|(_, n)| *n > 0).collect(),
        }
    }

    pub fn get(&self, node: &str) -> u64 {
        self.entries.get(node).copied().unwrap_or(0)
    }

    /// Bump `node`'s entry, returning the new value.
    pub fn increment(&mut self, node: &str) -> u64 {
        let entry = self.entries.entry(node.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// True if every entry of `other` is covered by `self`.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        other
            .entries
            .iter()
            .all(|(node, &counter)| self.get(node) >= counter)
    }

    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        match (self.dominates(other), other.dominates(self)) {
            (true, true) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Greater,
            (false, true) => ClockOrdering::Less,
            (false, false) => ClockOrdering::Concurrent,
        }
    }

    /// Pointwise maximum.
    pub fn merge(&mut self, other: &VectorClock) {
        for (node, &counter) in &other.entries {
            let entry = self.entries.entry(node.clone()).or_insert(0);
            *entry = (*entry).max(counter);
        }
    }

    pub fn merged_with(&self, other: &VectorClock) -> VectorClock {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (node, counter)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{node}:{counter}")?;
        }
        write!(f, "}}")
    }
}

impl Lattice for VectorClock {
    fn bottom() -> Self {
        Self::new()
    }

    fn join(&self, other: &Self) -> Self {
        self.merged_with(other)
    }

    fn join_assign(&mut self, other: &Self) {
        self.merge(other);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(entries: &[(&str, u64)]) -> VectorClock {
        VectorClock::from_entries(entries.iter().map(|(n, c)| (n.to_string(), *c)))
    }

    #[test]
    fn test_compare() {
        let a = clock(&[("a", 1)]);
        let ab = clock(&[("a", 1), ("b", 1)]);
        let b = clock(&[("b", 2)]);

        assert_eq!(a.compare(&ab), ClockOrdering::Less);
        assert_eq!(ab.compare(&a), ClockOrdering::Greater);
        assert_eq!(a.compare(&a.clone()), ClockOrdering::Equal);
        assert_eq!(ab.compare(&b), ClockOrdering::Concurrent);
        assert_eq!(VectorClock::new().compare(&a), ClockOrdering::Less);
    }

    #[test]
    fn test_zero_entries_are_ignored() {
        assert_eq!(clock(&[("a", 0)]), VectorClock::new());
        assert_eq!(clock(&[("a", 0)]).compare(&VectorClock::new()), ClockOrdering::Equal);
    }

    #[test]
    fn test_increment_and_merge() {
        let mut a = VectorClock::new();
        assert_eq!(a.increment("a"), 1);
        assert_eq!(a.increment("a"), 2);

        let mut b = VectorClock::new();
        b.increment("b");

        let merged = a.merged_with(&b);
        assert_eq!(merged.get("a"), 2);
        assert_eq!(merged.get("b"), 1);
        assert_eq!(merged.compare(&a), ClockOrdering::Greater);
        assert_eq!(merged.compare(&b), ClockOrdering::Greater);
        assert_eq!(merged.to_string(), "{a:2, b:1}");
    }

    #[test]
    fn test_wire_format_is_a_plain_map() {
        let c = clock(&[("node-1", 3)]);
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, r#"{"node-1":3}"#);
        assert_eq!(serde_json::from_str::<VectorClock>(&json).unwrap(), c);
    }
}
