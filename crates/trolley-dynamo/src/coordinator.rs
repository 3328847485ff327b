//! Quorum coordinator with sloppy quorums and hinted handoff.
//!
//! Writes go to the first `W` healthy nodes of a key's preference list and
//! reads to the first `R`. Replicas that are down or fail to answer get their
//! write parked as a hint on another node, to be replayed by
//! [`QuorumCoordinator::deliver_hints`] once they come back. Reads reconcile
//! divergent replies: a causally dominant version wins, concurrent versions
//! are joined, and replicas found behind are repaired.

use crate::config::ClusterConfig;
use crate::error::{DynamoError, Result};
use crate::membership::MembershipManager;
use crate::message::{unexpected, Record, Request, Response};
use crate::node::StoreValue;
use crate::ring::ConsistentHashRing;
use crate::transport::{NodeId, NodeTransport};
use crate::vector_clock::{ClockOrdering, VectorClock};
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of a quorum write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutResult {
    /// At least `W` replicas acknowledged
    pub success: bool,
    /// Merge of the clocks returned by acknowledging replicas
    pub context: VectorClock,
}

/// Result of a quorum read.
#[derive(Clone, Debug, PartialEq)]
pub struct GetResult<V> {
    pub value: V,
    pub context: VectorClock,
    pub timestamp: i64,
}

/// Counters for one hint delivery pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HandoffReport {
    pub delivered: usize,
    pub pending: usize,
}

pub struct QuorumCoordinator<V, T> {
    ring: Arc<RwLock<ConsistentHashRing>>,
    transport: Arc<T>,
    membership: Option<Arc<MembershipManager>>,
    n: usize,
    r: usize,
    w: usize,
    timeout: Duration,
    _value: PhantomData<fn() -> V>,
}

impl<V, T> QuorumCoordinator<V, T>
where
    V: StoreValue,
    T: NodeTransport<V>,
{
    pub fn new(ring: Arc<RwLock<ConsistentHashRing>>, transport: Arc<T>, config: &ClusterConfig) -> Self {
        Self {
            ring,
            transport,
            membership: None,
            n: config.replication.n,
            r: config.replication.r,
            w: config.replication.w,
            timeout: config.request_timeout(),
            _value: PhantomData,
        }
    }

    /// Skip nodes the membership view suspects without contacting them.
    pub fn with_membership(mut self, membership: Arc<MembershipManager>) -> Self {
        self.membership = Some(membership);
        self
    }

    pub fn ring(&self) -> &Arc<RwLock<ConsistentHashRing>> {
        &self.ring
    }

    pub fn preference_list(&self, key: &str) -> Vec<NodeId> {
        self.ring.read().preference_list(key, self.n)
    }

    async fn call(&self, node: &NodeId, request: Request<V>) -> Result<Response<V>> {
        match tokio::time::timeout(self.timeout, self.transport.call(node, request)).await {
            Ok(result) => result,
            Err(_) => Err(DynamoError::Timeout {
                node: node.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    async fn is_healthy(&self, node: &NodeId) -> bool {
        if let Some(membership) = &self.membership {
            if !membership.is_healthy(node) {
                return false;
            }
        }
        match self.call(node, Request::Health).await {
            Ok(Response::Health(_)) => true,
            Ok(other) => {
                debug!(node = %node, error = %unexpected(node, &other), "health check");
                false
            }
            Err(e) => {
                debug!(node = %node, error = %e, "health check failed");
                false
            }
        }
    }

    /// Health-check `nodes` in parallel, keeping their order.
    async fn split_healthy(&self, nodes: &[NodeId]) -> (Vec<NodeId>, Vec<NodeId>) {
        let checks = join_all(nodes.iter().map(|node| self.is_healthy(node))).await;
        let mut healthy = Vec::new();
        let mut failed = Vec::new();
        for (node, ok) in nodes.iter().zip(checks) {
            if ok {
                healthy.push(node.clone());
            } else {
                failed.push(node.clone());
            }
        }
        (healthy, failed)
    }

    /// Write `value` under `key`.
    ///
    /// `context` is the clock from an earlier read; a write without one is
    /// treated as causally new to every replica.
    pub async fn put(&self, key: &str, value: V, context: Option<VectorClock>) -> Result<PutResult> {
        let preference = self.preference_list(key);
        let (healthy, mut failed) = self.split_healthy(&preference).await;
        if healthy.len() < self.w {
            warn!(key, healthy = healthy.len(), w = self.w, "not enough replicas for write");
            return Err(DynamoError::InsufficientReplicas {
                required: self.w,
                available: healthy.len(),
            });
        }

        let context = context.unwrap_or_default();
        let targets = &healthy[..self.w];
        let writes = targets.iter().map(|node| {
            self.call(
                node,
                Request::Put {
                    key: key.to_string(),
                    value: value.clone(),
                    context: context.clone(),
                },
            )
        });
        let replies = join_all(writes).await;

        let mut acks = 0;
        let mut merged = VectorClock::new();
        for (node, reply) in targets.iter().zip(replies) {
            match reply {
                Ok(Response::Put(ack)) if ack.success => {
                    acks += 1;
                    merged.merge(&ack.context);
                }
                Ok(Response::Put(_)) => {
                    debug!(node = %node, key, "replica rejected stale write");
                    failed.push(node.clone());
                }
                Ok(other) => {
                    warn!(node = %node, key, error = %unexpected(node, &other), "write failed");
                    failed.push(node.clone());
                }
                Err(e) => {
                    warn!(node = %node, key, error = %e, "write failed");
                    failed.push(node.clone());
                }
            }
        }

        let written: BTreeSet<NodeId> = targets
            .iter()
            .filter(|node| !failed.contains(*node))
            .cloned()
            .collect();
        for node in &failed {
            self.hand_off(key, node, &value, &context, &failed, &written).await;
        }

        let success = acks >= self.w;
        debug!(key, acks, w = self.w, success, "quorum write finished");
        Ok(PutResult {
            success,
            context: merged,
        })
    }

    /// Park the write for `original` on the next reachable node after it in
    /// ring order.
    async fn hand_off(
        &self,
        key: &str,
        original: &NodeId,
        value: &V,
        context: &VectorClock,
        failed: &[NodeId],
        written: &BTreeSet<NodeId>,
    ) -> Option<NodeId> {
        let walk = {
            let ring = self.ring.read();
            ring.preference_list(key, ring.len())
        };
        let start = walk.iter().position(|node| node == original).unwrap_or(0);

        // prefer nodes that did not already take the write
        let mut candidates: Vec<&NodeId> = walk[start..]
            .iter()
            .chain(&walk[..start])
            .filter(|node| *node != original && !failed.contains(*node))
            .collect();
        candidates.sort_by_key(|node| written.contains(*node));

        for holder in candidates {
            let request = Request::StoreHint {
                target: original.clone(),
                key: key.to_string(),
                value: value.clone(),
                context: context.clone(),
            };
            match self.call(holder, request).await {
                Ok(Response::HintStored { id }) => {
                    info!(key, original = %original, holder = %holder, id, "hinted handoff");
                    return Some(holder.clone());
                }
                Ok(other) => debug!(holder = %holder, error = %unexpected(holder, &other), "hint refused"),
                Err(e) => debug!(holder = %holder, error = %e, "hint holder unreachable"),
            }
        }
        warn!(key, original = %original, "no node could hold the hint");
        None
    }

    /// Read `key`, reconciling the replies of `R` replicas.
    ///
    /// Returns `None` when no replica that answered knows the key.
    pub async fn get(&self, key: &str) -> Result<Option<GetResult<V>>> {
        let preference = self.preference_list(key);
        let (healthy, _) = self.split_healthy(&preference).await;
        if healthy.len() < self.r {
            warn!(key, healthy = healthy.len(), r = self.r, "not enough replicas for read");
            return Err(DynamoError::InsufficientReplicas {
                required: self.r,
                available: healthy.len(),
            });
        }

        let targets = &healthy[..self.r];
        let reads = targets.iter().map(|node| {
            self.call(
                node,
                Request::Get {
                    key: key.to_string(),
                },
            )
        });
        let replies = join_all(reads).await;

        let mut answered: Vec<(NodeId, Option<Record<V>>)> = Vec::new();
        for (node, reply) in targets.iter().zip(replies) {
            match reply {
                Ok(Response::Record(record)) => answered.push((node.clone(), record)),
                Ok(other) => warn!(node = %node, key, error = %unexpected(node, &other), "read failed"),
                Err(e) => warn!(node = %node, key, error = %e, "read failed"),
            }
        }

        let records: Vec<&Record<V>> = answered.iter().filter_map(|(_, r)| r.as_ref()).collect();
        let Some(reconciled) = reconcile(&records) else {
            return Ok(None);
        };

        self.read_repair(key, &reconciled, &answered).await;

        Ok(Some(GetResult {
            value: reconciled.value,
            context: reconciled.context,
            timestamp: reconciled.timestamp,
        }))
    }

    async fn read_repair(&self, key: &str, reconciled: &Record<V>, answered: &[(NodeId, Option<Record<V>>)]) {
        let behind: Vec<&NodeId> = answered
            .iter()
            .filter(|(_, record)| match record {
                None => true,
                Some(record) => record.context != reconciled.context || record.value != reconciled.value,
            })
            .map(|(node, _)| node)
            .collect();
        if behind.is_empty() {
            return;
        }

        let repairs = behind.iter().map(|node| {
            self.call(
                node,
                Request::Merge {
                    key: key.to_string(),
                    record: reconciled.clone(),
                },
            )
        });
        for (node, result) in behind.iter().zip(join_all(repairs).await) {
            match result {
                Ok(Response::Merged) => debug!(node = %node, key, "read repair"),
                Ok(other) => warn!(node = %node, key, error = %unexpected(node, &other), "read repair failed"),
                Err(e) => warn!(node = %node, key, error = %e, "read repair failed"),
            }
        }
    }

    /// Replay every hint held for `recovered` and drop the delivered ones.
    ///
    /// Hints whose replay fails stay with their holder for a later pass.
    pub async fn deliver_hints(&self, recovered: &NodeId) -> HandoffReport {
        let holders: Vec<NodeId> = self
            .ring
            .read()
            .nodes()
            .filter(|node| *node != recovered)
            .cloned()
            .collect();

        let mut report = HandoffReport::default();
        for holder in holders {
            let hints = match self
                .call(
                    &holder,
                    Request::ListHints {
                        target: recovered.clone(),
                    },
                )
                .await
            {
                Ok(Response::Hints(hints)) => hints,
                Ok(other) => {
                    debug!(holder = %holder, error = %unexpected(&holder, &other), "cannot list hints");
                    continue;
                }
                Err(e) => {
                    debug!(holder = %holder, error = %e, "cannot list hints");
                    continue;
                }
            };
            if hints.is_empty() {
                continue;
            }

            let mut delivered = Vec::new();
            for hint in &hints {
                let replay = Request::Put {
                    key: hint.key.clone(),
                    value: hint.value.clone(),
                    context: hint.context.clone(),
                };
                // a stale rejection still means the replica has caught up
                match self.call(recovered, replay).await {
                    Ok(Response::Put(_)) => delivered.push(hint.id),
                    Ok(other) => debug!(error = %unexpected(recovered, &other), "hint replay failed"),
                    Err(e) => debug!(recovered = %recovered, error = %e, "hint replay failed"),
                }
            }
            report.pending += hints.len() - delivered.len();
            if delivered.is_empty() {
                continue;
            }

            let count = delivered.len();
            match self
                .call(
                    &holder,
                    Request::AckHints {
                        target: recovered.clone(),
                        ids: delivered,
                    },
                )
                .await
            {
                Ok(Response::HintsAcked { .. }) => report.delivered += count,
                Ok(other) => {
                    warn!(holder = %holder, error = %unexpected(&holder, &other), "hint acknowledgement failed");
                    report.pending += count;
                }
                Err(e) => {
                    // replays are idempotent joins, so the hints may be sent again
                    warn!(holder = %holder, error = %e, "hint acknowledgement failed");
                    report.pending += count;
                }
            }
        }

        if report.delivered > 0 || report.pending > 0 {
            info!(
                recovered = %recovered,
                delivered = report.delivered,
                pending = report.pending,
                "hinted handoff delivery"
            );
        }
        report
    }
}

/// Combine replica replies into one record.
///
/// If any two replies are concurrent, every value is joined and every clock
/// merged. Otherwise the replies form a chain and the newest one is returned.
pub fn reconcile<V: StoreValue>(records: &[&Record<V>]) -> Option<Record<V>> {
    let (first, rest) = records.split_first()?;

    let concurrent = records.iter().enumerate().any(|(i, a)| {
        records[i + 1..]
            .iter()
            .any(|b| a.context.compare(&b.context) == ClockOrdering::Concurrent)
    });

    if concurrent {
        let mut merged = (*first).clone();
        for record in rest {
            merged.value.join_assign(&record.value);
            merged.context.merge(&record.context);
            merged.timestamp = merged.timestamp.max(record.timestamp);
        }
        return Some(merged);
    }

    let mut newest = *first;
    for record in rest {
        match record.context.compare(&newest.context) {
            ClockOrdering::Greater => newest = record,
            ClockOrdering::Equal if record.timestamp > newest.timestamp => newest = record,
            _ => {}
        }
    }
    Some(newest.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use trolley_list::{ListId, ShoppingList};

    fn record(items: &[&str], clock: &[(&str, u64)], timestamp: i64) -> Record<ShoppingList> {
        let mut value = ShoppingList::new("c", ListId::Local(1), "L");
        for item in items {
            value.add_item(item, 1);
        }
        Record {
            value,
            context: VectorClock::from_entries(clock.iter().map(|(n, c)| (n.to_string(), *c))),
            timestamp,
        }
    }

    #[test]
    fn test_reconcile_empty() {
        assert!(reconcile::<ShoppingList>(&[]).is_none());
    }

    #[test]
    fn test_reconcile_picks_dominant() {
        let old = record(&["milk"], &[("a", 1)], 10);
        let new = record(&["bread"], &[("a", 2)], 5);
        let result = reconcile(&[&old, &new]).unwrap();
        assert_eq!(result, new);
        assert_eq!(reconcile(&[&new, &old]).unwrap(), new);
    }

    #[test]
    fn test_reconcile_joins_concurrent() {
        let a = record(&["milk"], &[("a", 1)], 10);
        let mut b = a.clone();
        b.value = b.value.fork("d");
        b.value.add_item("bread", 1);
        b.context = VectorClock::from_entries([("b".to_string(), 1)]);
        b.timestamp = 20;

        let result = reconcile(&[&a, &b]).unwrap();
        assert!(result.value.contains("milk"));
        assert!(result.value.contains("bread"));
        assert_eq!(result.context.get("a"), 1);
        assert_eq!(result.context.get("b"), 1);
        assert_eq!(result.timestamp, 20);
    }
}
