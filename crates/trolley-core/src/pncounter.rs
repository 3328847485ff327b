//! PN-Counter (Positive-Negative Counter) CRDT
//!
//! A PN-Counter supports both increment and decrement operations by maintaining
//! two grow-only counters: one for increments (P) and one for decrements (N).
//! The value is P - N, and join merges P and N independently.

use crate::gcounter::GCounter;
use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PNCounter {
    /// Increments
    p: GCounter,
    /// Decrements
    n: GCounter,
}

impl PNCounter {
    /// Create a counter owned by `id`
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            p: GCounter::new(id.clone()),
            n: GCounter::new(id),
        }
    }

    /// Assemble a counter from its two halves.
    pub fn from_parts(p: GCounter, n: GCounter) -> Self {
        Self { p, n }
    }

    /// Increment by `amount`, returning the delta.
    pub fn inc(&mut self, amount: u64) -> PNCounter {
        PNCounter {
            p: self.p.inc(amount),
            n: GCounter::default(),
        }
    }

    /// Decrement by `amount`, returning the delta.
    pub fn dec(&mut self, amount: u64) -> PNCounter {
        PNCounter {
            p: GCounter::default(),
            n: self.n.inc(amount),
        }
    }

    /// Current value (sum of increments - sum of decrements)
    pub fn read(&self) -> i64 {
        (self.p.read() as i64).saturating_sub(self.n.read() as i64)
    }

    /// This replica's own net contribution
    pub fn local(&self) -> i64 {
        (self.p.local() as i64).saturating_sub(self.n.local() as i64)
    }

    pub fn increments(&self) -> &GCounter {
        &self.p
    }

    pub fn decrements(&self) -> &GCounter {
        &self.n
    }
}

impl Lattice for PNCounter {
    fn bottom() -> Self {
        Self::default()
    }

    fn join(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.join_assign(other);
        result
    }

    fn join_assign(&mut self, other: &Self) {
        self.p.join_assign(&other.p);
        self.n.join_assign(&other.n);
    }
}
