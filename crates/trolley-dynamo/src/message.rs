//! Messages exchanged between nodes.
//!
//! Every request and response crosses the node boundary as JSON bytes;
//! [`decode_request`] and [`decode_response`] reject anything that does not
//! parse into a well-formed message with [`DynamoError::MalformedMessage`].

use crate::error::{DynamoError, Result};
use crate::transport::NodeId;
use crate::vector_clock::VectorClock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use trolley_merkle::MerkleTree;

/// A stored version of one key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record<V> {
    pub value: V,
    pub context: VectorClock,
    /// Milliseconds since the Unix epoch of the last local write
    pub timestamp: i64,
}

/// A write held on behalf of a node that could not take it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hint<V> {
    /// Assigned by the holder, unique per holder
    pub id: u64,
    pub original_node: NodeId,
    pub key: String,
    pub value: V,
    pub context: VectorClock,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub node: NodeId,
    pub data_size: usize,
}

/// Outcome of a single node's `put`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutAck {
    /// False when the write was dropped as stale
    pub success: bool,
    /// The clock now stored for the key
    pub context: VectorClock,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Request<V> {
    Put {
        key: String,
        value: V,
        context: VectorClock,
    },
    Get {
        key: String,
    },
    /// Join a record into the stored one; used by read repair and anti-entropy.
    Merge {
        key: String,
        record: Record<V>,
    },
    Health,
    StoreHint {
        target: NodeId,
        key: String,
        value: V,
        context: VectorClock,
    },
    ListHints {
        target: NodeId,
    },
    AckHints {
        target: NodeId,
        ids: Vec<u64>,
    },
    MerkleTree,
    Gossip {
        from: NodeId,
        members: BTreeSet<NodeId>,
        suspected: BTreeSet<NodeId>,
    },
}

impl<V> Request<V> {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Put { .. } => "put",
            Request::Get { .. } => "get",
            Request::Merge { .. } => "merge",
            Request::Health => "health",
            Request::StoreHint { .. } => "store_hint",
            Request::ListHints { .. } => "list_hints",
            Request::AckHints { .. } => "ack_hints",
            Request::MerkleTree => "merkle_tree",
            Request::Gossip { .. } => "gossip",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response<V> {
    Put(PutAck),
    Record(Option<Record<V>>),
    Merged,
    Health(HealthReport),
    HintStored { id: u64 },
    Hints(Vec<Hint<V>>),
    HintsAcked { removed: usize },
    MerkleTree(MerkleTree),
    Gossip {
        members: BTreeSet<NodeId>,
        suspected: BTreeSet<NodeId>,
    },
    /// The node could not serve the request.
    Error(String),
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

pub fn decode_request<V: DeserializeOwned>(bytes: &[u8]) -> Result<Request<V>> {
    serde_json::from_slice(bytes).map_err(|e| DynamoError::MalformedMessage(e.to_string()))
}

pub fn decode_response<V: DeserializeOwned>(bytes: &[u8]) -> Result<Response<V>> {
    serde_json::from_slice(bytes).map_err(|e| DynamoError::MalformedMessage(e.to_string()))
}

/// Build the error for a response of the wrong kind.
pub(crate) fn unexpected<V>(node: &NodeId, response: &Response<V>) -> DynamoError {
    let detail = match response {
        Response::Error(message) => message.clone(),
        Response::Put(_) => "put acknowledgement".into(),
        Response::Record(_) => "record".into(),
        Response::Merged => "merged".into(),
        Response::Health(_) => "health report".into(),
        Response::HintStored { .. } => "hint stored".into(),
        Response::Hints(_) => "hints".into(),
        Response::HintsAcked { .. } => "hints acknowledged".into(),
        Response::MerkleTree(_) => "merkle tree".into(),
        Response::Gossip { .. } => "gossip".into(),
    };
    DynamoError::UnexpectedResponse {
        node: node.to_string(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_round_trip() {
        let mut context = VectorClock::new();
        context.increment("a");
        let request: Request<u32> = Request::Put {
            key: "k".into(),
            value: 7,
            context: context.clone(),
        };

        let bytes = encode(&request).unwrap();
        match decode_request::<u32>(&bytes).unwrap() {
            Request::Put { key, value, context: c } => {
                assert_eq!((key.as_str(), value), ("k", 7));
                assert_eq!(c, context);
            }
            other => panic!("unexpected {}", other.kind()),
        }
    }

    #[test]
    fn test_health_wire_shape() {
        let response: Response<u32> = Response::Health(HealthReport {
            status: HealthStatus::Healthy,
            node: NodeId::new("n1"),
            data_size: 3,
        });
        let value: serde_json::Value = serde_json::from_slice(&encode(&response).unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "health": { "status": "healthy", "node": "n1", "dataSize": 3 } })
        );
    }

    #[test]
    fn test_malformed_payloads_rejected() {
        assert!(matches!(
            decode_request::<u32>(b"{\"put\":{\"key\":1}}"),
            Err(DynamoError::MalformedMessage(_))
        ));
        assert!(matches!(
            decode_request::<u32>(b"\"launch_missiles\""),
            Err(DynamoError::MalformedMessage(_))
        ));
        assert!(matches!(
            decode_response::<u32>(b"not json"),
            Err(DynamoError::MalformedMessage(_))
        ));
    }
}
