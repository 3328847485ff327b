//! Gossip-based membership and failure suspicion.
//!
//! Each round a node picks one random peer and swaps its member and suspect
//! sets with it. A peer that cannot be reached is suspected. Suspicion is
//! never final: suspects learned from gossip are queued for a health check,
//! and any sign of life (a successful check or gossip received from the
//! node) clears it. The local node never suspects itself.

use crate::error::{DynamoError, Result};
use crate::message::{Request, Response};
use crate::node::StoreValue;
use crate::ring::ConsistentHashRing;
use crate::transport::{NodeId, NodeTransport};
use parking_lot::RwLock;
use rand::seq::IteratorRandom;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct MembershipState {
    members: BTreeSet<NodeId>,
    suspected: BTreeSet<NodeId>,
    /// Suspects waiting for a health check
    to_verify: BTreeSet<NodeId>,
}

pub struct MembershipManager {
    local: NodeId,
    gossip_interval: Duration,
    request_timeout: Duration,
    state: RwLock<MembershipState>,
}

impl MembershipManager {
    pub fn new(local: NodeId, gossip_interval: Duration, request_timeout: Duration) -> Self {
        let mut state = MembershipState::default();
        state.members.insert(local.clone());
        Self {
            local,
            gossip_interval,
            request_timeout,
            state: RwLock::new(state),
        }
    }

    /// Start with a known set of peers.
    pub fn with_members(self, members: impl IntoIterator<Item = NodeId>) -> Self {
        self.state.write().members.extend(members);
        self
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local
    }

    pub fn members(&self) -> BTreeSet<NodeId> {
        self.state.read().members.clone()
    }

    pub fn suspected(&self) -> BTreeSet<NodeId> {
        self.state.read().suspected.clone()
    }

    /// Members not currently suspected.
    pub fn healthy_nodes(&self) -> BTreeSet<NodeId> {
        let state = self.state.read();
        state
            .members
            .difference(&state.suspected)
            .cloned()
            .collect()
    }

    pub fn is_healthy(&self, node: &NodeId) -> bool {
        let state = self.state.read();
        state.members.contains(node) && !state.suspected.contains(node)
    }

    pub fn add_node(&self, node: NodeId) -> bool {
        let added = self.state.write().members.insert(node.clone());
        if added {
            info!(local = %self.local, node = %node, "member joined");
        }
        added
    }

    pub fn remove_node(&self, node: &NodeId) -> bool {
        if node == &self.local {
            return false;
        }
        let mut state = self.state.write();
        state.suspected.remove(node);
        state.to_verify.remove(node);
        let removed = state.members.remove(node);
        drop(state);
        if removed {
            info!(local = %self.local, node = %node, "member left");
        }
        removed
    }

    pub fn suspect(&self, node: &NodeId) {
        if node == &self.local {
            return;
        }
        if self.state.write().suspected.insert(node.clone()) {
            warn!(local = %self.local, node = %node, "suspecting node");
        }
    }

    pub fn clear_suspicion(&self, node: &NodeId) {
        let mut state = self.state.write();
        state.to_verify.remove(node);
        if state.suspected.remove(node) {
            drop(state);
            info!(local = %self.local, node = %node, "node is alive again");
        }
    }

    fn absorb(&self, members: BTreeSet<NodeId>, suspected: BTreeSet<NodeId>) {
        let mut state = self.state.write();
        state.members.extend(members);
        for node in suspected {
            if node != self.local {
                state.suspected.insert(node);
            }
        }
        let local_suspects: Vec<NodeId> = state.suspected.iter().cloned().collect();
        state.to_verify.extend(local_suspects);
    }

    /// Answer a gossip message from `from`, returning this node's view.
    pub fn handle_gossip(
        &self,
        from: &NodeId,
        members: BTreeSet<NodeId>,
        suspected: BTreeSet<NodeId>,
    ) -> (BTreeSet<NodeId>, BTreeSet<NodeId>) {
        debug!(local = %self.local, from = %from, "gossip received");
        self.absorb(members, suspected);
        self.state.write().members.insert(from.clone());
        self.clear_suspicion(from);
        let state = self.state.read();
        (state.members.clone(), state.suspected.clone())
    }

    fn pick_peer(&self) -> Option<NodeId> {
        let state = self.state.read();
        state
            .members
            .iter()
            .filter(|node| **node != self.local)
            .choose(&mut rand::thread_rng())
            .cloned()
    }

    /// Run one gossip round. Returns the peer contacted, if any.
    pub async fn gossip_once<V, T>(&self, transport: &T) -> Option<NodeId>
    where
        V: StoreValue,
        T: NodeTransport<V> + ?Sized,
    {
        let peer = self.pick_peer()?;
        let (members, suspected) = {
            let state = self.state.read();
            (state.members.clone(), state.suspected.clone())
        };
        let request = Request::Gossip {
            from: self.local.clone(),
            members,
            suspected,
        };

        match self.call(transport, &peer, request).await {
            Ok(Response::Gossip { members, suspected }) => {
                self.absorb(members, suspected);
                self.clear_suspicion(&peer);
            }
            Ok(_) => {
                debug!(local = %self.local, peer = %peer, "peer does not gossip");
            }
            Err(e) => {
                debug!(local = %self.local, peer = %peer, error = %e, "gossip failed");
                self.suspect(&peer);
            }
        }

        self.verify_suspects::<V, T>(transport).await;
        Some(peer)
    }

    /// Health-check queued suspects; those that answer are cleared.
    pub async fn verify_suspects<V, T>(&self, transport: &T) -> usize
    where
        V: StoreValue,
        T: NodeTransport<V> + ?Sized,
    {
        let queued: Vec<NodeId> = std::mem::take(&mut self.state.write().to_verify)
            .into_iter()
            .collect();

        let mut cleared = 0;
        for node in queued {
            if let Ok(Response::Health(_)) = self.call::<V, T>(transport, &node, Request::Health).await {
                self.clear_suspicion(&node);
                cleared += 1;
            }
        }
        cleared
    }

    async fn call<V, T>(&self, transport: &T, peer: &NodeId, request: Request<V>) -> Result<Response<V>>
    where
        V: StoreValue,
        T: NodeTransport<V> + ?Sized,
    {
        match tokio::time::timeout(self.request_timeout, transport.call(peer, request)).await {
            Ok(result) => result,
            Err(_) => Err(DynamoError::Timeout {
                node: peer.to_string(),
                timeout_ms: self.request_timeout.as_millis() as u64,
            }),
        }
    }

    /// Gossip every `gossip_interval` until the handle is aborted.
    pub fn start<V, T>(self: Arc<Self>, transport: Arc<T>) -> JoinHandle<()>
    where
        V: StoreValue,
        T: NodeTransport<V>,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.gossip_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.gossip_once::<V, T>(transport.as_ref()).await;
            }
        })
    }

    /// Bring the ring in line with the member set. Suspects stay on the
    /// ring; they are filtered out at request time.
    pub fn sync_ring(&self, ring: &mut ConsistentHashRing) -> (Vec<NodeId>, Vec<NodeId>) {
        let members = self.members();
        let stale: Vec<NodeId> = ring
            .nodes()
            .filter(|node| !members.contains(*node))
            .cloned()
            .collect();

        let mut added = Vec::new();
        for node in members {
            if ring.add_node(node.clone()) {
                added.push(node);
            }
        }
        for node in &stale {
            ring.remove_node(node);
        }
        if !added.is_empty() || !stale.is_empty() {
            info!(local = %self.local, added = added.len(), removed = stale.len(), "ring updated");
        }
        (added, stale)
    }
}
