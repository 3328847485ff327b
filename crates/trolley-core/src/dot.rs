//! Dots and the compact causal context.
//!
//! A [`Dot`] names one causal event: the `n`-th update issued by a replica.
//! A [`DotContext`] records every dot a replica has observed. Most of that
//! knowledge is a contiguous prefix `1..=max` per replica and is stored as a
//! single number (`compact`); dots received out of order wait in the `cloud`
//! until the gap below them closes.

use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Replica identifier
pub type ReplicaId = String;

/// A globally unique causal event identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dot {
    /// The replica that issued the event
    pub replica_id: ReplicaId,
    /// Per-replica sequence number, starting at 1
    pub counter: u64,
}

impl Dot {
    pub fn new(replica_id: impl Into<ReplicaId>, counter: u64) -> Self {
        Self {
            replica_id: replica_id.into(),
            counter,
        }
    }
}

impl fmt::Display for Dot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.replica_id, self.counter)
    }
}

/// Compact causal context: a version vector plus a cloud of detached dots.
///
/// Invariant: after [`DotContext::compact`] no cloud dot is dominated by, or
/// contiguous with, the compact entry of its replica.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DotContext {
    /// replica -> highest counter of the contiguous prefix 1..=max
    compact: BTreeMap<ReplicaId, u64>,
    /// dots observed beyond a gap
    cloud: BTreeSet<Dot>,
}

impl DotContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a context from its two components and compact it.
    pub fn from_parts(
        compact: impl IntoIterator<Item = (ReplicaId, u64)>,
        cloud: impl IntoIterator<Item = Dot>,
    ) -> Self {
        let mut ctx = Self {
            compact: compact.into_iter().filter(|(_, n)| *n > 0).collect(),
            cloud: cloud.into_iter().collect(),
        };
        ctx.compact();
        ctx
    }

    /// True if `dot` has been observed.
    pub fn dotin(&self, dot: &Dot) -> bool {
        self.compact
            .get(&dot.replica_id)
            .is_some_and(|max| dot.counter <= *max)
            || self.cloud.contains(dot)
    }

    /// Allocate the next dot for `replica_id`.
    ///
    /// Locally issued dots are always contiguous, so they go straight into the
    /// compact vector.
    pub fn makedot(&mut self, replica_id: &str) -> Dot {
        let counter = self.compact.entry(replica_id.to_string()).or_insert(0);
        *counter += 1;
        Dot::new(replica_id, *counter)
    }

    /// Record an observed dot, optionally compacting right away.
    ///
    /// Callers inserting many dots pass `compact_now = false` and call
    /// [`DotContext::compact`] once at the end.
    pub fn insert_dot(&mut self, dot: Dot, compact_now: bool) {
        self.cloud.insert(dot);
        if compact_now {
            self.compact();
        }
    }

    /// Fold cloud dots into the compact vector until a fixed point is reached.
    pub fn compact(&mut self) {
        loop {
            let mut folded = false;

            // the cloud is ordered by (replica, counter), so successors of the
            // same replica are visited in increasing order within one pass
            let cloud = std::mem::take(&mut self.cloud);
            for dot in cloud {
                let max = self.compact.get(&dot.replica_id).copied().unwrap_or(0);
                if dot.counter == max + 1 {
                    self.compact.insert(dot.replica_id.clone(), dot.counter);
                    folded = true;
                } else if dot.counter > max {
                    self.cloud.insert(dot);
                }
                // anything else is already covered by the compact prefix
            }

            if !folded {
                break;
            }
        }
    }

    /// Pointwise-max merge of the compact vectors and union of the clouds.
    pub fn join_context(&mut self, other: &DotContext) {
        for (replica, &max) in &other.compact {
            let entry = self.compact.entry(replica.clone()).or_insert(0);
            *entry = (*entry).max(max);
        }
        for dot in &other.cloud {
            self.insert_dot(dot.clone(), false);
        }
        self.compact();
    }

    /// The contiguous prefix known for each replica.
    pub fn compact_entries(&self) -> &BTreeMap<ReplicaId, u64> {
        &self.compact
    }

    /// Dots observed beyond a gap.
    pub fn cloud(&self) -> &BTreeSet<Dot> {
        &self.cloud
    }

    /// Highest contiguous counter observed for `replica_id`.
    pub fn max_contiguous(&self, replica_id: &str) -> u64 {
        self.compact.get(replica_id).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.compact.is_empty() && self.cloud.is_empty()
    }
}

impl fmt::Display for DotContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Context: CC (")?;
        for (i, (replica, max)) in self.compact.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}:{}", replica, max)?;
        }
        write!(f, ") DC (")?;
        for (i, dot) in self.cloud.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", dot)?;
        }
        write!(f, ")")
    }
}

impl Lattice for DotContext {
    fn bottom() -> Self {
        Self::new()
    }

    fn join(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.join_assign(other);
        result
    }

    fn join_assign(&mut self, other: &Self) {
        self.join_context(other);
    }
}
