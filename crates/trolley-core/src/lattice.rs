//! Mergeable state.
//!
//! Every replicated value in trolley (contexts, kernels, sets, counters,
//! whole lists and the vector clocks next to them) is a join-semilattice.
//! `join` must be commutative, associative and idempotent, which is what
//! lets replicas exchange whole states or deltas in any order, any number
//! of times, and still agree.

/// State that merges by least upper bound.
pub trait Lattice: Clone + PartialEq {
    /// The empty state. Joining it changes nothing.
    fn bottom() -> Self;

    fn join(&self, other: &Self) -> Self;

    /// In-place join. Types that can merge without copying override this.
    fn join_assign(&mut self, other: &Self) {
        *self = self.join(other);
    }

    /// True if `other` already contains everything in `self`.
    fn absorbed_by(&self, other: &Self) -> bool {
        &self.join(other) == other
    }
}
