//! # trolley-merkle
//!
//! Merkle trees used by Trolley nodes to find diverging records cheaply.
//!
//! ```rust
//! use trolley_merkle::MerkleTree;
//!
//! let a = MerkleTree::from_entries([("A", b"one".as_slice())]);
//! let b = MerkleTree::from_entries([("B", b"two".as_slice())]);
//!
//! let diverging = a.diff(&b);
//! assert!(diverging.contains("A") && diverging.contains("B"));
//! ```

pub mod hash;
pub mod tree;

pub use hash::{Hash, Hasher};
pub use tree::MerkleTree;
