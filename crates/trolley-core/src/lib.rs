//! # trolley-core
//!
//! Causal delta-state CRDTs used by the Trolley replicated list store.
//!
//! - [`dot`] - dots and the compact causal context that records them
//! - [`dot_kernel`] - a dot-indexed value store kept consistent by a causal context
//! - [`aworset`] - add-wins observed-remove set built on the kernel
//! - [`gcounter`] / [`pncounter`] - grow-only and signed counters
//!
//! Every mutator returns a *delta*: a small state of the same type that can be
//! shipped to another replica and applied with the ordinary `join`.
//!
//! ```rust
//! use trolley_core::aworset::AWORSet;
//! use trolley_core::lattice::Lattice;
//!
//! let mut a = AWORSet::new("a");
//! let mut b = AWORSet::new("b");
//!
//! a.add("milk".to_string());
//! b.join_assign(&a);
//!
//! // concurrent remove on `a`, re-add on `b`
//! a.rmv(&"milk".to_string());
//! b.add("milk".to_string());
//!
//! a.join_assign(&b);
//! assert!(a.contains(&"milk".to_string()));
//! ```

pub mod aworset;
pub mod dot;
pub mod dot_kernel;
pub mod gcounter;
pub mod lattice;
pub mod pncounter;

pub use aworset::AWORSet;
pub use dot::{Dot, DotContext, ReplicaId};
pub use dot_kernel::DotKernel;
pub use gcounter::GCounter;
pub use lattice::Lattice;
pub use pncounter::PNCounter;
