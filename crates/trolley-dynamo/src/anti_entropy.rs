//! Merkle-tree anti-entropy between replica pairs.
//!
//! A round fetches the trees of two nodes and walks them top-down. Only the
//! keys under mismatching leaves are read and repaired, so traffic is bounded
//! by the divergence rather than the data size.

use crate::error::{DynamoError, Result};
use crate::membership::MembershipManager;
use crate::message::{unexpected, Record, Request, Response};
use crate::node::StoreValue;
use crate::transport::{NodeId, NodeTransport};
use futures::future::join_all;
use rand::seq::IteratorRandom;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use trolley_merkle::MerkleTree;

/// Outcome of one pairwise sync.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncReport {
    pub a: NodeId,
    pub b: NodeId,
    pub diverging: BTreeSet<String>,
    /// Keys written back to both sides
    pub repaired: usize,
}

impl SyncReport {
    pub fn in_sync(&self) -> bool {
        self.diverging.is_empty()
    }
}

pub struct AntiEntropy<V, T> {
    transport: Arc<T>,
    membership: Arc<MembershipManager>,
    interval: Duration,
    timeout: Duration,
    _value: PhantomData<fn() -> V>,
}

impl<V, T> AntiEntropy<V, T>
where
    V: StoreValue,
    T: NodeTransport<V>,
{
    pub fn new(transport: Arc<T>, membership: Arc<MembershipManager>, interval: Duration, timeout: Duration) -> Self {
        Self {
            transport,
            membership,
            interval,
            timeout,
            _value: PhantomData,
        }
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

    async fn merkle_tree(&self, node: &NodeId) -> Result<MerkleTree> {
        match self.call(node, Request::MerkleTree).await? {
            Response::MerkleTree(tree) => Ok(tree),
            other => Err(unexpected(node, &other)),
        }
    }

    async fn record(&self, node: &NodeId, key: &str) -> Result<Option<Record<V>>> {
        let request = Request::Get {
            key: key.to_string(),
        };
        match self.call(node, request).await? {
            Response::Record(record) => Ok(record),
            other => Err(unexpected(node, &other)),
        }
    }

    async fn merge(&self, node: &NodeId, key: &str, record: Record<V>) -> Result<()> {
        let request = Request::Merge {
            key: key.to_string(),
            record,
        };
        match self.call(node, request).await? {
            Response::Merged => Ok(()),
            other => Err(unexpected(node, &other)),
        }
    }

    /// Compare `a` and `b` and repair every diverging key on both sides.
    ///
    /// Fails if either tree cannot be fetched. A key whose repair fails is
    /// left for a later round.
    pub async fn sync_pair(&self, a: &NodeId, b: &NodeId) -> Result<SyncReport> {
        let (tree_a, tree_b) = futures::try_join!(self.merkle_tree(a), self.merkle_tree(b))?;
        let mut report = SyncReport {
            a: a.clone(),
            b: b.clone(),
            diverging: BTreeSet::new(),
            repaired: 0,
        };
        if tree_a.root() == tree_b.root() {
            debug!(a = %a, b = %b, "replicas in sync");
            return Ok(report);
        }
        report.diverging = tree_a.diff(&tree_b);

        let repairs = report.diverging.iter().map(|key| self.repair_key(a, b, key));
        for (key, result) in report.diverging.iter().zip(join_all(repairs).await) {
            match result {
                Ok(()) => report.repaired += 1,
                Err(e) => warn!(a = %a, b = %b, key, error = %e, "anti-entropy repair failed"),
            }
        }

        info!(
            a = %a,
            b = %b,
            diverging = report.diverging.len(),
            repaired = report.repaired,
            "anti-entropy round"
        );
        Ok(report)
    }

    async fn repair_key(&self, a: &NodeId, b: &NodeId, key: &str) -> Result<()> {
        let (left, right) = futures::try_join!(self.record(a, key), self.record(b, key))?;
        let joined = match (left, right) {
            (Some(mut left), Some(right)) => {
                left.value.join_assign(&right.value);
                left.context.merge(&right.context);
                left.timestamp = left.timestamp.max(right.timestamp);
                left
            }
            (Some(only), None) | (None, Some(only)) => only,
            (None, None) => return Ok(()),
        };
        futures::try_join!(self.merge(a, key, joined.clone()), self.merge(b, key, joined))?;
        Ok(())
    }

    fn pick_pair(&self) -> Option<(NodeId, NodeId)> {
        let mut pair = self
            .membership
            .healthy_nodes()
            .into_iter()
            .choose_multiple(&mut rand::thread_rng(), 2)
            .into_iter();
        Some((pair.next()?, pair.next()?))
    }

    /// Sync one random pair of healthy nodes. `None` when fewer than two are
    /// healthy.
    pub async fn run_round(&self) -> Option<Result<SyncReport>> {
        let (a, b) = self.pick_pair()?;
        Some(self.sync_pair(&a, &b).await)
    }

    /// Run a round every `interval` until the handle is aborted.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Some(Err(e)) = self.run_round().await {
                    warn!(error = %e, "anti-entropy round failed");
                }
            }
        })
    }
}
