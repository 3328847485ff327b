//! Grow-only counter (GCounter)
//!
//! One non-decreasing entry per replica; the value is the sum of all entries
//! and join takes the per-replica maximum.

use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GCounter {
    /// Owning replica. `None` for deltas and decoded snapshots, which are
    /// never incremented locally.
    #[serde(skip)]
    id: Option<String>,
    counters: BTreeMap<String, u64>,
}

impl GCounter {
    /// A counter owned by `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            counters: BTreeMap::new(),
        }
    }

    /// An immutable snapshot from raw per-replica entries.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, u64)>) -> Self {
        Self {
            id: None,
            counters: entries.into_iter().collect(),
        }
    }

    /// Give a snapshot an owner so it can be incremented again.
    pub fn with_owner(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Increment the owner's entry by `amount`.
    ///
    /// Returns a delta holding only the owner's new entry. Snapshots without
    /// an owner are left untouched and yield an empty delta.
    pub fn inc(&mut self, amount: u64) -> GCounter {
        let Some(id) = self.id.clone() else {
            return GCounter::default();
        };
        let entry = self.counters.entry(id.clone()).or_insert(0);
        *entry = entry.saturating_add(amount);
        GCounter::from_entries([(id, *entry)])
    }

    /// Sum over all replicas.
    pub fn read(&self) -> u64 {
        self.counters.values().sum()
    }

    /// The owner's own contribution.
    pub fn local(&self) -> u64 {
        self.id
            .as_ref()
            .and_then(|id| self.counters.get(id))
            .copied()
            .unwrap_or(0)
    }

    /// Contribution of a specific replica.
    pub fn get(&self, replica_id: &str) -> u64 {
        self.counters.get(replica_id).copied().unwrap_or(0)
    }

    pub fn entries(&self) -> &BTreeMap<String, u64> {
        &self.counters
    }
}

impl Lattice for GCounter {
    fn bottom() -> Self {
        Self::default()
    }

    fn join(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.join_assign(other);
        result
    }

    fn join_assign(&mut self, other: &Self) {
        for (replica, &value) in &other.counters {
            self.counters
                .entry(replica.clone())
                .and_modify(|e| *e = (*e).max(value))
                .or_insert(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inc_and_read() {
        let mut counter = GCounter::new("a");
        counter.inc(2);
        let delta = counter.inc(3);

        assert_eq!(counter.read(), 5);
        assert_eq!(counter.local(), 5);
        assert_eq!(delta.entries().get("a"), Some(&5));
        assert_eq!(delta.id(), None);
    }

    #[test]
    fn test_join_takes_max() {
        let mut a = GCounter::new("a");
        let mut b = GCounter::new("b");
        a.inc(4);
        b.inc(1);
        let stale = a.clone();
        a.inc(1);

        a.join_assign(&b);
        a.join_assign(&stale);

        assert_eq!(a.get("a"), 5);
        assert_eq!(a.read(), 6);
        assert_eq!(a.local(), 5);
    }

    #[test]
    fn test_snapshot_is_immutable() {
        let mut snapshot = GCounter::from_entries([("a".to_string(), 3)]);
        let delta = snapshot.inc(10);
        assert_eq!(snapshot.read(), 3);
        assert_eq!(snapshot.local(), 0);
        assert!(delta.entries().is_empty());

        let mut owned = snapshot.with_owner("a");
        owned.inc(1);
        assert_eq!(owned.read(), 4);
    }

    #[test]
    fn test_delta_join_is_idempotent() {
        let mut a = GCounter::new("a");
        let mut b = GCounter::new("b");
        let delta = a.inc(2);
        b.join_assign(&delta);
        b.join_assign(&delta);
        assert_eq!(b.read(), 2);
    }
}
