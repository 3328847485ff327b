//! A storage node.
//!
//! A [`DynamoNode`] keeps one [`Record`] per key plus the hints it holds for
//! other nodes. All state sits behind a single mutex, so operations on one
//! node are linearized; nothing is awaited while the lock is held.

use crate::message::{
    HealthReport, HealthStatus, Hint, PutAck, Record, Request, Response,
};
use crate::transport::NodeId;
use crate::vector_clock::{ClockOrdering, VectorClock};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use trolley_core::lattice::Lattice;
use trolley_list::ShoppingList;
use trolley_merkle::MerkleTree;

/// Values a node can store: mergeable, serializable state.
pub trait StoreValue:
    Lattice + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Bytes hashed into the Merkle tree. Equal states must give equal bytes.
    fn state_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

impl StoreValue for ShoppingList {
    fn state_bytes(&self) -> Vec<u8> {
        ShoppingList::state_bytes(self)
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

struct NodeState<V> {
    data: BTreeMap<String, Record<V>>,
    hints: Vec<Hint<V>>,
    next_hint_id: u64,
    merkle: MerkleTree,
}

pub struct DynamoNode<V> {
    id: NodeId,
    state: Mutex<NodeState<V>>,
}

impl<V: StoreValue> DynamoNode<V> {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            state: Mutex::new(NodeState {
                data: BTreeMap::new(),
                hints: Vec::new(),
                next_hint_id: 1,
                merkle: MerkleTree::new(),
            }),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Store a write coming from a coordinator.
    ///
    /// The incoming clock is advanced by this node. If the result is older
    /// than the stored clock the write is dropped and `success` is false.
    /// The value replaces the record only when the caller's clock already
    /// covers the stored one; otherwise the values are joined and the clocks
    /// merged.
    pub fn put(&self, key: &str, value: V, context: VectorClock) -> PutAck {
        let mut incoming = context.clone();
        incoming.increment(self.id.as_str());

        let mut state = self.state.lock();
        let record = match state.data.get(key) {
            None => Record {
                value,
                context: incoming,
                timestamp: now_millis(),
            },
            Some(existing) => {
                if incoming.compare(&existing.context) == ClockOrdering::Less {
                    warn!(node = %self.id, key, "rejecting stale write");
                    return PutAck {
                        success: false,
                        context: existing.context.clone(),
                    };
                }
                if context.dominates(&existing.context) {
                    Record {
                        value,
                        context: incoming,
                        timestamp: now_millis(),
                    }
                } else {
                    Record {
                        value: existing.value.join(&value),
                        context: existing.context.merged_with(&incoming),
                        timestamp: now_millis(),
                    }
                }
            }
        };

        debug!(node = %self.id, key, context = %record.context, "stored");
        let ack = PutAck {
            success: true,
            context: record.context.clone(),
        };
        state.merkle.update(key, &record.value.state_bytes());
        state.data.insert(key.to_string(), record);
        ack
    }

    /// Join a record into the stored one without advancing the clock.
    /// Used by repair paths; never rejects.
    pub fn merge_record(&self, key: &str, record: Record<V>) {
        let mut state = self.state.lock();
        let merged = match state.data.get(key) {
            None => record,
            Some(existing) => Record {
                value: existing.value.join(&record.value),
                context: existing.context.merged_with(&record.context),
                timestamp: existing.timestamp.max(record.timestamp),
            },
        };
        state.merkle.update(key, &merged.value.state_bytes());
        state.data.insert(key.to_string(), merged);
    }

    pub fn get(&self, key: &str) -> Option<Record<V>> {
        self.state.lock().data.get(key).cloned()
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: HealthStatus::Healthy,
            node: self.id.clone(),
            data_size: self.len(),
        }
    }

    /// Hold a write for `target`, returning the hint id.
    pub fn store_hint(&self, target: NodeId, key: &str, value: V, context: VectorClock) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_hint_id;
        state.next_hint_id += 1;
        debug!(node = %self.id, target = %target, key, id, "holding hint");
        state.hints.push(Hint {
            id,
            original_node: target,
            key: key.to_string(),
            value,
            context,
        });
        id
    }

    pub fn hints_for(&self, target: &NodeId) -> Vec<Hint<V>> {
        self.state
            .lock()
            .hints
            .iter()
            .filter(|hint| &hint.original_node == target)
            .cloned()
            .collect()
    }

    /// Drop delivered hints. Returns how many were removed.
    pub fn ack_hints(&self, target: &NodeId, ids: &[u64]) -> usize {
        let mut state = self.state.lock();
        let before = state.hints.len();
        state
            .hints
            .retain(|hint| &hint.original_node != target || !ids.contains(&hint.id));
        before - state.hints.len()
    }

    pub fn hint_count(&self) -> usize {
        self.state.lock().hints.len()
    }

    pub fn merkle_tree(&self) -> MerkleTree {
        self.state.lock().merkle.clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().data.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serve one request. Gossip is answered by the membership manager, not
    /// the store.
    pub fn handle(&self, request: Request<V>) -> Response<V> {
        match request {
            Request::Put {
                key,
                value,
                context,
            } => Response::Put(self.put(&key, value, context)),
            Request::Get { key } => Response::Record(self.get(&key)),
            Request::Merge { key, record } => {
                self.merge_record(&key, record);
                Response::Merged
            }
            Request::Health => Response::Health(self.health()),
            Request::StoreHint {
                target,
                key,
                value,
                context,
            } => Response::HintStored {
                id: self.store_hint(target, &key, value, context),
            },
            Request::ListHints { target } => Response::Hints(self.hints_for(&target)),
            Request::AckHints { target, ids } => Response::HintsAcked {
                removed: self.ack_hints(&target, &ids),
            },
            Request::MerkleTree => Response::MerkleTree(self.merkle_tree()),
            Request::Gossip { .. } => Response::Error(format!("{} does not serve gossip", self.id)),
        }
    }
}
