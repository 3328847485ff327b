//! Background persistence of list snapshots.
//!
//! Mutations hand a serialized snapshot to a [`PersistenceQueue`] and carry
//! on; a tokio worker drains the queue into a [`SnapshotSink`] and reports
//! each outcome on a bounded acknowledgement channel. The queue is bounded:
//! when it is full the [`OverflowPolicy`] decides whether the oldest pending
//! snapshot is dropped or the producer waits.
//!
//! Pending snapshots for the same key are coalesced: only the newest one is
//! written. A queued removal counts as the newest state of its key.

use crate::error::{ListError, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Where snapshots end up.
pub trait SnapshotSink: Send + Sync + 'static {
    /// Durably store the snapshot for `key`, replacing any earlier one.
    fn persist(&self, key: &str, snapshot: &serde_json::Value) -> Result<()>;

    /// Forget the snapshot for `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Last stored snapshot for `key`.
    fn load(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Every stored snapshot, for rebuilding a store after restart.
    fn load_all(&self) -> Result<Vec<(String, serde_json::Value)>>;
}

/// In-memory sink for tests and simulations.
#[derive(Debug, Default)]
pub struct MemorySink {
    snapshots: Mutex<HashMap<String, serde_json::Value>>,
    fail: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `persist` fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }
}

impl SnapshotSink for MemorySink {
    fn persist(&self, key: &str, snapshot: &serde_json::Value) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ListError::Storage(format!("write of {key} refused")));
        }
        self.snapshots
            .lock()
            .insert(key.to_string(), snapshot.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ListError::Storage(format!("removal of {key} refused")));
        }
        self.snapshots.lock().remove(key);
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.snapshots.lock().get(key).cloned())
    }

    fn load_all(&self) -> Result<Vec<(String, serde_json::Value)>> {
        let mut all: Vec<_> = self
            .snapshots
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(all)
    }
}

/// What to do when a snapshot arrives and the queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest pending snapshot. Producers never wait.
    #[default]
    DropOldest,
    /// Producers wait for space (`submit`) or get [`ListError::QueueFull`]
    /// (`try_submit`).
    Block,
}

/// Outcome of one persisted snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistAck {
    pub key: String,
    pub sequence: u64,
    pub ok: bool,
}

#[derive(Debug)]
struct Job {
    key: String,
    sequence: u64,
    /// `None` removes the stored snapshot
    snapshot: Option<serde_json::Value>,
}

struct Shared {
    queue: Mutex<VecDeque<Job>>,
    capacity: usize,
    policy: OverflowPolicy,
    not_empty: Notify,
    not_full: Notify,
    closed: AtomicBool,
    sequence: AtomicU64,
    dropped: AtomicU64,
}

enum Enqueue {
    Queued(u64),
    Full(Option<serde_json::Value>),
}

impl Shared {
    fn enqueue(&self, key: &str, snapshot: Option<serde_json::Value>) -> Result<Enqueue> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ListError::PersistenceClosed);
        }

        let mut queue = self.queue.lock();
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(pending) = queue.iter_mut().find(|job| job.key == key) {
            pending.sequence = sequence;
            pending.snapshot = snapshot;
            return Ok(Enqueue::Queued(sequence));
        }

        if queue.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    if let Some(evicted) = queue.pop_front() {
                        self.dropped.fetch_add(1, Ordering::SeqCst);
                        warn!(
                            key = %evicted.key,
                            sequence = evicted.sequence,
                            "persistence queue full, dropping oldest snapshot"
                        );
                    }
                }
                OverflowPolicy::Block => return Ok(Enqueue::Full(snapshot)),
            }
        }

        queue.push_back(Job {
            key: key.to_string(),
            sequence,
            snapshot,
        });
        drop(queue);
        self.not_empty.notify_one();
        Ok(Enqueue::Queued(sequence))
    }
}

/// Producer handle of the persistence queue. Cheap to clone.
#[derive(Clone)]
pub struct PersistenceQueue {
    shared: Arc<Shared>,
}

impl PersistenceQueue {
    /// Start a worker draining into `sink`.
    ///
    /// Returns the producer handle, the acknowledgement receiver (bounded to
    /// `capacity`; acks are dropped when nobody reads them) and the worker
    /// handle, which finishes after [`close`](Self::close) once the queue is
    /// drained.
    pub fn spawn<S: SnapshotSink>(
        sink: Arc<S>,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> (Self, mpsc::Receiver<PersistAck>, JoinHandle<()>) {
        let capacity = capacity.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            policy,
            not_empty: Notify::new(),
            not_full: Notify::new(),
            closed: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        let (ack_tx, ack_rx) = mpsc::channel(capacity);
        let worker = tokio::spawn(run_worker(shared.clone(), sink, ack_tx));
        (Self { shared }, ack_rx, worker)
    }

    /// Queue a snapshot without waiting.
    ///
    /// Returns the snapshot's sequence number. Under [`OverflowPolicy::Block`]
    /// a full queue yields [`ListError::QueueFull`].
    pub fn try_submit(&self, key: &str, snapshot: serde_json::Value) -> Result<u64> {
        self.try_enqueue(key, Some(snapshot))
    }

    /// Queue the removal of `key`'s snapshot without waiting.
    pub fn try_remove(&self, key: &str) -> Result<u64> {
        self.try_enqueue(key, None)
    }

    fn try_enqueue(&self, key: &str, snapshot: Option<serde_json::Value>) -> Result<u64> {
        match self.shared.enqueue(key, snapshot)? {
            Enqueue::Queued(sequence) => Ok(sequence),
            Enqueue::Full(_) => Err(ListError::QueueFull),
        }
    }

    /// Queue a snapshot, waiting for space under [`OverflowPolicy::Block`].
    pub async fn submit(&self, key: &str, snapshot: serde_json::Value) -> Result<u64> {
        let mut snapshot = Some(snapshot);
        loop {
            let space = self.shared.not_full.notified();
            match self.shared.enqueue(key, snapshot)? {
                Enqueue::Queued(sequence) => return Ok(sequence),
                Enqueue::Full(back) => snapshot = back,
            }
            space.await;
        }
    }

    /// Stop accepting snapshots. Pending ones are still written.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.not_empty.notify_one();
        self.shared.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Snapshots waiting to be written.
    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Snapshots evicted under [`OverflowPolicy::DropOldest`].
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::SeqCst)
    }
}

async fn run_worker<S: SnapshotSink>(
    shared: Arc<Shared>,
    sink: Arc<S>,
    acks: mpsc::Sender<PersistAck>,
) {
    loop {
        let next = shared.queue.lock().pop_front();
        let Some(job) = next else {
            if shared.closed.load(Ordering::SeqCst) {
                debug!("persistence queue closed and drained");
                return;
            }
            shared.not_empty.notified().await;
            continue;
        };
        shared.not_full.notify_one();

        let written = match &job.snapshot {
            Some(snapshot) => sink.persist(&job.key, snapshot),
            None => sink.remove(&job.key),
        };
        let ok = match written {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %job.key, sequence = job.sequence, error = %e, "failed to persist snapshot");
                false
            }
        };

        let ack = PersistAck {
            key: job.key,
            sequence: job.sequence,
            ok,
        };
        if acks.try_send(ack).is_err() {
            debug!("acknowledgement channel full or closed");
        }
        tokio::task::yield_now().await;
    }
}
