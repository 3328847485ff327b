//! # trolley-dynamo
//!
//! Dynamo-style replication for Trolley shopping lists.
//!
//! - [`ring`] - consistent hashing with virtual nodes
//! - [`vector_clock`] - per-key causal history
//! - [`node`] - a storage node; concurrent versions are CRDT-joined, stale ones rejected
//! - [`coordinator`] - sloppy quorum reads and writes, read repair, hinted handoff
//! - [`membership`] - gossip with suspicion and re-verification
//! - [`anti_entropy`] - Merkle-tree repair between replica pairs
//! - [`transport`] - the node boundary, plus an in-process transport with fault injection
//!
//! ## Example
//!
//! ```rust
//! use parking_lot::RwLock;
//! use std::sync::Arc;
//! use trolley_dynamo::{ClusterConfig, ConsistentHashRing, DynamoNode, LocalTransport, NodeId, QuorumCoordinator};
//! use trolley_list::{ListId, ShoppingList};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = ClusterConfig::default();
//! let transport = Arc::new(LocalTransport::<ShoppingList>::new());
//! let ids: Vec<NodeId> = ["n1", "n2", "n3"].map(NodeId::from).to_vec();
//! for id in &ids {
//!     transport.register(Arc::new(DynamoNode::new(id.clone())));
//! }
//! let ring = Arc::new(RwLock::new(ConsistentHashRing::with_nodes(config.virtual_nodes, ids)));
//! let coordinator = QuorumCoordinator::new(ring, transport, &config);
//!
//! let mut list = ShoppingList::new("phone", ListId::Local(1), "Groceries");
//! list.add_item("milk", 2);
//! let written = coordinator.put("1", list, None).await.unwrap();
//! assert!(written.success);
//!
//! let read = coordinator.get("1").await.unwrap().unwrap();
//! assert!(read.value.contains("milk"));
//! # }
//! ```

pub mod anti_entropy;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod membership;
pub mod message;
pub mod node;
pub mod ring;
pub mod transport;
pub mod vector_clock;

pub use anti_entropy::{AntiEntropy, SyncReport};
pub use config::{ClusterConfig, ClusterConfigBuilder, ReplicationConfig};
pub use coordinator::{reconcile, GetResult, HandoffReport, PutResult, QuorumCoordinator};
pub use error::{DynamoError, Result};
pub use membership::MembershipManager;
pub use message::{HealthReport, HealthStatus, Hint, PutAck, Record, Request, Response};
pub use node::{DynamoNode, StoreValue};
pub use ring::{ring_hash, ConsistentHashRing};
pub use transport::{LocalTransport, NodeId, NodeTransport};
pub use vector_clock::{ClockOrdering, VectorClock};
