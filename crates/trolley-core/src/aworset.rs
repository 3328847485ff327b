//! Add-Wins Observed-Remove Set (AWORSet)
//!
//! Built on a [`DotKernel`]: an element is present while at least one dot
//! holds it. `add` first removes the dots it can see and then writes a fresh
//! one, so a concurrent remove elsewhere (which cannot have seen the fresh
//! dot) never cancels it. Concurrent add and remove of the same element: add
//! wins.

use crate::dot_kernel::DotKernel;
use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AWORSet<T: Ord + Clone> {
    /// Replica issuing dots for local adds
    id: String,
    kernel: DotKernel<T>,
}

impl<T: Ord + Clone> AWORSet<T> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kernel: DotKernel::new(),
        }
    }

    /// Wrap an existing kernel (used when decoding a stored set).
    pub fn from_kernel(id: impl Into<String>, kernel: DotKernel<T>) -> Self {
        Self {
            id: id.into(),
            kernel,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kernel(&self) -> &DotKernel<T> {
        &self.kernel
    }

    /// Distinct elements currently in the set.
    pub fn read(&self) -> BTreeSet<T> {
        self.kernel.values().cloned().collect()
    }

    /// Add an element, superseding every dot for it this replica has seen.
    pub fn add(&mut self, value: T) -> AWORSet<T> {
        let mut delta = self.kernel.rmv(&value);
        delta.join_kernel(&self.kernel.add(&self.id, value));
        Self::from_kernel(self.id.clone(), delta)
    }

    /// Remove all observed instances of an element.
    pub fn rmv(&mut self, value: &T) -> AWORSet<T> {
        Self::from_kernel(self.id.clone(), self.kernel.rmv(value))
    }

    pub fn contains(&self, value: &T) -> bool {
        self.kernel.contains_value(value)
    }

    /// Remove every element.
    pub fn reset(&mut self) -> AWORSet<T> {
        Self::from_kernel(self.id.clone(), self.kernel.rmv_all())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernel.store().is_empty()
    }
}

impl<T: Ord + Clone> Default for AWORSet<T> {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl<T: Ord + Clone> Lattice for AWORSet<T> {
    fn bottom() -> Self {
        Self::default()
    }

    fn join(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.join_assign(other);
        result
    }

    /// The local replica id is kept; only the kernels are merged.
    fn join_assign(&mut self, other: &Self) {
        self.kernel.join_kernel(&other.kernel);
    }
}
