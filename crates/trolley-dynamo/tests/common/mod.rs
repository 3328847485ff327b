//! In-process cluster used by the integration tests.

#![allow(dead_code)]

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use trolley_dynamo::{
    ClusterConfig, ConsistentHashRing, DynamoNode, LocalTransport, MembershipManager, NodeId, NodeTransport,
    QuorumCoordinator,
};
use trolley_list::{ListId, ShoppingList};

pub type Transport = LocalTransport<ShoppingList>;

pub fn config() -> ClusterConfig {
    ClusterConfig::builder()
        .replication(3, 2, 2)
        .virtual_nodes(10)
        .request_timeout(100)
        .gossip_interval(20)
        .anti_entropy_interval(20)
        .build()
        .unwrap()
}

pub fn ids(count: usize) -> Vec<NodeId> {
    (1..=count).map(|i| NodeId::new(format!("node{i}"))).collect()
}

pub fn transport(ids: &[NodeId]) -> Arc<Transport> {
    let transport = Arc::new(LocalTransport::new());
    for id in ids {
        transport.register(Arc::new(DynamoNode::new(id.clone())));
    }
    transport
}

pub fn ring(ids: &[NodeId], config: &ClusterConfig) -> Arc<RwLock<ConsistentHashRing>> {
    Arc::new(RwLock::new(ConsistentHashRing::with_nodes(
        config.virtual_nodes,
        ids.iter().cloned(),
    )))
}

pub fn coordinator<T: NodeTransport<ShoppingList>>(
    ids: &[NodeId],
    transport: Arc<T>,
    config: &ClusterConfig,
) -> QuorumCoordinator<ShoppingList, T> {
    QuorumCoordinator::new(ring(ids, config), transport, config)
}

pub fn membership(local: &NodeId, members: &[NodeId]) -> Arc<MembershipManager> {
    Arc::new(
        MembershipManager::new(local.clone(), Duration::from_millis(20), Duration::from_millis(100))
            .with_members(members.iter().cloned()),
    )
}

pub fn list(replica: &str, items: &[&str]) -> ShoppingList {
    let mut list = ShoppingList::new(replica, ListId::Local(1), "Groceries");
    for item in items {
        list.add_item(item, 1);
    }
    list
}

/// Every hint held anywhere in the cluster for `target`.
pub fn hints_for(transport: &Transport, target: &NodeId) -> usize {
    transport
        .node_ids()
        .iter()
        .filter_map(|id| transport.node(id))
        .map(|node| node.hints_for(target).len())
        .sum()
}
