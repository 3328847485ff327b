//! Dot kernel: a causally consistent, dot-indexed value store.
//!
//! Every value is tagged with the dot of the event that wrote it. Removing a
//! value deletes its dots from the store but keeps them in the context, so a
//! later join can tell "removed here" apart from "never seen here" without
//! keeping tombstones around.

use crate::dot::{Dot, DotContext};
use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DotKernel<T: Ord + Clone> {
    /// Every dot this kernel has observed, live or removed
    context: DotContext,
    /// Live dots and their values
    store: BTreeMap<Dot, T>,
}

impl<T: Ord + Clone> DotKernel<T> {
    pub fn new() -> Self {
        Self {
            context: DotContext::new(),
            store: BTreeMap::new(),
        }
    }

    /// Rebuild a kernel from a context and a dot store.
    ///
    /// Dots in `store` that the context does not cover are recorded in it, so
    /// the kernel invariant holds for any input.
    pub fn from_parts(mut context: DotContext, store: BTreeMap<Dot, T>) -> Self {
        let mut missing = false;
        for dot in store.keys() {
            if !context.dotin(dot) {
                context.insert_dot(dot.clone(), false);
                missing = true;
            }
        }
        if missing {
            context.compact();
        }
        Self { context, store }
    }

    /// Store `value` under a fresh dot issued by `replica_id`.
    ///
    /// Returns a delta holding only the new dot.
    pub fn add(&mut self, replica_id: &str, value: T) -> DotKernel<T> {
        let dot = self.context.makedot(replica_id);
        self.store.insert(dot.clone(), value.clone());

        let mut delta = DotKernel::new();
        delta.store.insert(dot.clone(), value);
        delta.context.insert_dot(dot, true);
        delta
    }

    /// Remove every dot holding `value`.
    ///
    /// Returns a delta with an empty store whose context lists the removed
    /// dots, so that joining it elsewhere deletes them there as well.
    pub fn rmv(&mut self, value: &T) -> DotKernel<T> {
        let removed: Vec<Dot> = self
            .store
            .iter()
            .filter(|(_, v)| *v == value)
            .map(|(dot, _)| dot.clone())
            .collect();

        let mut delta = DotKernel::new();
        for dot in removed {
            self.store.remove(&dot);
            delta.context.insert_dot(dot, false);
        }
        delta.context.compact();
        delta
    }

    /// Remove every value.
    pub fn rmv_all(&mut self) -> DotKernel<T> {
        let mut delta = DotKernel::new();
        for dot in std::mem::take(&mut self.store).into_keys() {
            delta.context.insert_dot(dot, false);
        }
        delta.context.compact();
        delta
    }

    /// Merge another kernel (full state or delta) into this one.
    pub fn join_kernel(&mut self, other: &DotKernel<T>) {
        // removed by the other side: it has seen the dot but no longer stores it
        self.store
            .retain(|dot, _| other.store.contains_key(dot) || !other.context.dotin(dot));

        for (dot, value) in &other.store {
            if !self.context.dotin(dot) {
                self.store.insert(dot.clone(), value.clone());
            }
        }

        self.context.join_context(&other.context);
    }

    pub fn context(&self) -> &DotContext {
        &self.context
    }

    pub fn store(&self) -> &BTreeMap<Dot, T> {
        &self.store
    }

    /// Live values, one entry per dot.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.store.values()
    }

    pub fn contains_value(&self, value: &T) -> bool {
        self.store.values().any(|v| v == value)
    }
}

impl<T: Ord + Clone> Default for DotKernel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord + Clone> Lattice for DotKernel<T> {
    fn bottom() -> Self {
        Self::new()
    }

    fn join(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.join_kernel(other);
        result
    }

    fn join_assign(&mut self, other: &Self) {
        self.join_kernel(other);
    }
}
