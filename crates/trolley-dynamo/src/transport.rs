//! Transport abstraction between nodes.

use crate::error::{DynamoError, Result};
use crate::membership::MembershipManager;
use crate::message::{self, Request, Response};
use crate::node::{DynamoNode, StoreValue};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Unique identifier for a node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Delivers requests to nodes.
///
/// Implementations do not apply timeouts; callers wrap each call.
#[async_trait]
pub trait NodeTransport<V: StoreValue>: Send + Sync + 'static {
    async fn call(&self, target: &NodeId, request: Request<V>) -> Result<Response<V>>;
}

struct Endpoint<V> {
    node: Arc<DynamoNode<V>>,
    membership: Option<Arc<MembershipManager>>,
}

impl<V> Clone for Endpoint<V> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            membership: self.membership.clone(),
        }
    }
}

/// In-process transport for tests and simulation.
///
/// Requests and responses are still encoded to JSON and decoded on the other
/// side. Nodes can be marked down, which makes every call to them fail with
/// [`DynamoError::NodeUnreachable`], or given an artificial delay.
pub struct LocalTransport<V> {
    endpoints: RwLock<HashMap<NodeId, Endpoint<V>>>,
    down: RwLock<HashSet<NodeId>>,
    delays: RwLock<HashMap<NodeId, Duration>>,
}

impl<V: StoreValue> LocalTransport<V> {
    pub fn new() -> Self {
        Self {
            endpoints: RwLock::new(HashMap::new()),
            down: RwLock::new(HashSet::new()),
            delays: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, node: Arc<DynamoNode<V>>) {
        let id = node.id().clone();
        let mut endpoints = self.endpoints.write();
        let membership = endpoints.get(&id).and_then(|e| e.membership.clone());
        endpoints.insert(id, Endpoint { node, membership });
    }

    /// Route gossip addressed to `membership`'s node to it. The node itself
    /// must be registered first.
    pub fn register_membership(&self, membership: Arc<MembershipManager>) -> Result<()> {
        let mut endpoints = self.endpoints.write();
        let endpoint = endpoints
            .get_mut(membership.local_id())
            .ok_or_else(|| DynamoError::NodeUnreachable(membership.local_id().to_string()))?;
        endpoint.membership = Some(membership);
        Ok(())
    }

    pub fn unregister(&self, node: &NodeId) {
        self.endpoints.write().remove(node);
    }

    pub fn node(&self, id: &NodeId) -> Option<Arc<DynamoNode<V>>> {
        self.endpoints.read().get(id).map(|e| e.node.clone())
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.endpoints.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Simulate a crash (`true`) or recovery (`false`).
    pub fn set_down(&self, node: &NodeId, down: bool) {
        if down {
            self.down.write().insert(node.clone());
        } else {
            self.down.write().remove(node);
        }
    }

    pub fn is_down(&self, node: &NodeId) -> bool {
        self.down.read().contains(node)
    }

    /// Delay every call to `node` by `delay` (zero clears it).
    pub fn set_delay(&self, node: &NodeId, delay: Duration) {
        if delay.is_zero() {
            self.delays.write().remove(node);
        } else {
            self.delays.write().insert(node.clone(), delay);
        }
    }

    /// Deliver an already-encoded request.
    pub async fn call_raw(&self, target: &NodeId, bytes: &[u8]) -> Result<Response<V>> {
        let endpoint = self
            .endpoints
            .read()
            .get(target)
            .cloned()
            .ok_or_else(|| DynamoError::NodeUnreachable(target.to_string()))?;
        if self.is_down(target) {
            return Err(DynamoError::NodeUnreachable(target.to_string()));
        }
        let delay = self.delays.read().get(target).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let request: Request<V> = message::decode_request(bytes)?;
        trace!(target = %target, kind = request.kind(), "delivering request");

        let response = match request {
            Request::Gossip {
                from,
                members,
                suspected,
            } => match &endpoint.membership {
                Some(membership) => {
                    let (members, suspected) = membership.handle_gossip(&from, members, suspected);
                    Response::Gossip { members, suspected }
                }
                None => Response::Error(format!("{target} does not take part in gossip")),
            },
            other => endpoint.node.handle(other),
        };

        // a node that went down while serving never answers
        if self.is_down(target) {
            return Err(DynamoError::NodeUnreachable(target.to_string()));
        }
        message::decode_response(&message::encode(&response)?)
    }
}

impl<V: StoreValue> Default for LocalTransport<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V: StoreValue> NodeTransport<V> for LocalTransport<V> {
    async fn call(&self, target: &NodeId, request: Request<V>) -> Result<Response<V>> {
        let bytes = message::encode(&request)?;
        self.call_raw(target, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trolley_list::{ListId, ShoppingList};

    fn transport_with(ids: &[&str]) -> LocalTransport<ShoppingList> {
        let transport = LocalTransport::new();
        for id in ids {
            transport.register(Arc::new(DynamoNode::new(NodeId::new(*id))));
        }
        transport
    }

    #[tokio::test]
    async fn test_call_reaches_node() {
        let transport = transport_with(&["a"]);
        let response = transport.call(&"a".into(), Request::Health).await.unwrap();
        match response {
            Response::Health(report) => assert_eq!(report.node, NodeId::new("a")),
            _ => panic!("expected health report"),
        }
    }

    #[tokio::test]
    async fn test_down_and_unknown_nodes_are_unreachable() {
        let transport = transport_with(&["a"]);
        transport.set_down(&"a".into(), true);
        assert!(matches!(
            transport.call(&"a".into(), Request::Health).await,
            Err(DynamoError::NodeUnreachable(_))
        ));
        transport.set_down(&"a".into(), false);
        assert!(transport.call(&"a".into(), Request::Health).await.is_ok());

        assert!(matches!(
            transport.call(&"zz".into(), Request::Health).await,
            Err(DynamoError::NodeUnreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_request_never_reaches_node() {
        let transport = transport_with(&["a"]);
        let bad = br#"{"put":{"key":"1","value":{"replicaId":"x"},"context":{}}}"#;
        assert!(matches!(
            transport.call_raw(&"a".into(), bad).await,
            Err(DynamoError::MalformedMessage(_))
        ));
        assert_eq!(transport.node(&"a".into()).unwrap().len(), 0);

        let mut list = ShoppingList::new("x", ListId::Local(1), "ok");
        list.add_item("milk", 1);
        let good = message::encode(&Request::Put {
            key: "1".into(),
            value: list,
            context: Default::default(),
        })
        .unwrap();
        transport.call_raw(&"a".into(), &good).await.unwrap();
        assert_eq!(transport.node(&"a".into()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_gossip_without_membership() {
        let transport = transport_with(&["a"]);
        let response = transport
            .call(
                &"a".into(),
                Request::Gossip {
                    from: "b".into(),
                    members: Default::default(),
                    suspected: Default::default(),
                },
            )
            .await
            .unwrap();
        assert!(matches!(response, Response::Error(_)));
    }
}
