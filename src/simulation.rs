use async_stream::stream;
use futures::stream::{Stream, StreamExt};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use trolley_dynamo::{
    AntiEntropy, ClusterConfig, ConsistentHashRing, DynamoError, DynamoNode, LocalTransport, MembershipManager,
    NodeId, QuorumCoordinator,
};
use trolley_list::{ListId, ShoppingList};

type Transport = LocalTransport<ShoppingList>;

const ITEMS: [&str; 8] = ["milk", "bread", "eggs", "butter", "apples", "coffee", "rice", "tea"];

/// Parameters of one simulated run.
#[derive(Clone, Debug)]
pub struct SimulationOptions {
    pub nodes: usize,
    pub clients: usize,
    pub ops_per_client: usize,
    /// Chance per failure tick that a node crashes
    pub failure_rate: f64,
}

/// Statistics collected during a simulated run
#[derive(Clone, Debug)]
pub struct SimulationStats {
    pub nodes: usize,
    pub clients: usize,
    pub operations: usize,
    pub successful_writes: usize,
    pub failed_writes: usize,
    pub failed_reads: usize,
    pub crashes: usize,
    pub hints_delivered: usize,
    pub keys_repaired: usize,
    pub converged: bool,
    pub total_time: Duration,
    pub ops_per_second: f64,
}

impl SimulationStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Cluster Simulation Statistics                 ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Nodes:                     {:>30} ║", self.nodes);
        println!("║  Clients:                   {:>30} ║", self.clients);
        println!("║  Operations:                {:>30} ║", self.operations);
        println!("║  Successful Writes:         {:>30} ║", self.successful_writes);
        println!("║  Failed Writes:             {:>30} ║", self.failed_writes);
        println!("║  Failed Reads:              {:>30} ║", self.failed_reads);
        println!("║  Node Crashes:              {:>30} ║", self.crashes);
        println!("║  Hints Delivered:           {:>30} ║", self.hints_delivered);
        println!("║  Keys Repaired:             {:>30} ║", self.keys_repaired);
        println!("║  Converged:                 {:>30} ║", if self.converged { "yes" } else { "no" });
        println!("║  Total Time:                {:>29}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Operations/Second:         {:>30.0} ║", self.ops_per_second);
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

#[derive(Default)]
struct Counters {
    successful_writes: AtomicUsize,
    failed_writes: AtomicUsize,
    failed_reads: AtomicUsize,
}

/// An in-process cluster: nodes, their membership views and one coordinator.
pub struct Cluster {
    pub config: ClusterConfig,
    pub ids: Vec<NodeId>,
    pub transport: Arc<Transport>,
    pub coordinator: Arc<QuorumCoordinator<ShoppingList, Transport>>,
    pub views: Vec<Arc<MembershipManager>>,
    pub anti_entropy: Arc<AntiEntropy<ShoppingList, Transport>>,
}

impl Cluster {
    pub fn new(config: ClusterConfig, nodes: usize) -> Result<Self, DynamoError> {
        if nodes < config.replication.n {
            return Err(DynamoError::Config(format!(
                "{nodes} nodes cannot hold {} replicas",
                config.replication.n
            )));
        }

        let ids: Vec<NodeId> = (1..=nodes).map(|i| NodeId::new(format!("node{i}"))).collect();
        let transport = Arc::new(Transport::new());
        let mut views = Vec::with_capacity(nodes);
        for id in &ids {
            transport.register(Arc::new(DynamoNode::new(id.clone())));
            let view = Arc::new(
                MembershipManager::new(id.clone(), config.gossip_interval(), config.request_timeout())
                    .with_members(ids.iter().cloned()),
            );
            transport.register_membership(view.clone())?;
            views.push(view);
        }

        let ring = Arc::new(RwLock::new(ConsistentHashRing::with_nodes(
            config.virtual_nodes,
            ids.iter().cloned(),
        )));
        let coordinator =
            Arc::new(QuorumCoordinator::new(ring, transport.clone(), &config).with_membership(views[0].clone()));
        let anti_entropy = Arc::new(AntiEntropy::new(
            transport.clone(),
            views[0].clone(),
            config.anti_entropy_interval(),
            config.request_timeout(),
        ));

        Ok(Self {
            config,
            ids,
            transport,
            coordinator,
            views,
            anti_entropy,
        })
    }

    /// Start gossip on every node and periodic anti-entropy.
    pub fn start_background(&self) -> Vec<JoinHandle<()>> {
        let mut handles: Vec<JoinHandle<()>> = self
            .views
            .iter()
            .map(|view| view.clone().start::<ShoppingList, _>(self.transport.clone()))
            .collect();
        handles.push(self.anti_entropy.clone().start());
        handles
    }

    /// Deliver the hints held for every node.
    pub async fn deliver_all_hints(&self) -> usize {
        let mut delivered = 0;
        for id in &self.ids {
            delivered += self.coordinator.deliver_hints(id).await.delivered;
        }
        delivered
    }

    /// Sync every node with the first one, twice, so that every change
    /// reaches every node. Returns the number of keys repaired.
    pub async fn full_anti_entropy(&self) -> usize {
        let mut repaired = 0;
        for _ in 0..2 {
            for other in &self.ids[1..] {
                match self.anti_entropy.sync_pair(&self.ids[0], other).await {
                    Ok(report) => repaired += report.repaired,
                    Err(e) => warn!(node = %other, error = %e, "anti-entropy failed"),
                }
            }
        }
        repaired
    }

    pub fn converged(&self) -> bool {
        let roots: BTreeSet<_> = self
            .ids
            .iter()
            .filter_map(|id| self.transport.node(id))
            .map(|node| node.merkle_tree().root())
            .collect();
        roots.len() == 1
    }
}

enum FailureEvent {
    Crash(NodeId),
    Recover(NodeId),
}

/// Generator of crash and recovery events. At most a minority of nodes is
/// down at any time.
fn failure_schedule(ids: Vec<NodeId>, ticks: usize, failure_rate: f64) -> impl Stream<Item = FailureEvent> {
    stream! {
        let mut rng = StdRng::from_entropy();
        let mut down: Vec<NodeId> = Vec::new();
        let max_down = ids.len().saturating_sub(1) / 2;
        let failure_rate = failure_rate.clamp(0.0, 1.0);
        for _ in 0..ticks {
            if !down.is_empty() && rng.gen_bool(0.5) {
                let idx = rng.gen_range(0..down.len());
                yield FailureEvent::Recover(down.swap_remove(idx));
            }
            if down.len() < max_down && rng.gen_bool(failure_rate) {
                let up: Vec<&NodeId> = ids.iter().filter(|id| !down.contains(id)).collect();
                if let Some(id) = up.choose(&mut rng) {
                    let id = (*id).clone();
                    down.push(id.clone());
                    yield FailureEvent::Crash(id);
                }
            }
        }
        for id in down {
            yield FailureEvent::Recover(id);
        }
    }
}

async fn run_client(
    client: usize,
    coordinator: Arc<QuorumCoordinator<ShoppingList, Transport>>,
    keys: usize,
    ops: usize,
    counters: Arc<Counters>,
) {
    let replica = format!("client{client}");
    let mut rng = StdRng::from_entropy();
    let mut lists: HashMap<usize, ShoppingList> = HashMap::new();

    for op in 0..ops {
        let k = rng.gen_range(0..keys);
        let key = format!("list-{k}");
        let list = lists
            .entry(k)
            .or_insert_with(|| ShoppingList::new(replica.clone(), ListId::Local(k as u64 + 1), format!("List {k}")));

        let context = match coordinator.get(&key).await {
            Ok(Some(read)) => {
                list.merge(&read.value);
                Some(read.context)
            }
            Ok(None) => None,
            Err(e) => {
                debug!(client, key, error = %e, "read failed");
                counters.failed_reads.fetch_add(1, Ordering::Relaxed);
                None
            }
        };

        let item = ITEMS[rng.gen_range(0..ITEMS.len())];
        match rng.gen_range(0..10) {
            0..=4 => list.add_item(item, rng.gen_range(1..4)),
            5..=6 => list.mark_bought(item, 1),
            7 => list.update_quantity(item, rng.gen_range(-2..3)),
            _ => list.remove_item(item),
        }

        match coordinator.put(&key, list.clone(), context).await {
            Ok(result) if result.success => {
                counters.successful_writes.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {
                counters.failed_writes.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                debug!(client, key, error = %e, "write failed");
                counters.failed_writes.fetch_add(1, Ordering::Relaxed);
            }
        }

        if op % 10 == 0 {
            tokio::task::yield_now().await;
        }
    }
}

/// Run concurrent clients against a cluster while nodes crash and recover,
/// then heal the cluster and check that every replica converged.
pub async fn simulate(config: ClusterConfig, options: SimulationOptions) -> Result<SimulationStats, DynamoError> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Trolley Cluster Simulation                          ║");
    println!(
        "║  Nodes: {} | Clients: {} | Ops/Client: {} | N/R/W: {}/{}/{} ║",
        options.nodes,
        options.clients,
        options.ops_per_client,
        config.replication.n,
        config.replication.r,
        config.replication.w
    );
    println!("╚════════════════════════════════════════════════════════════╝");

    let cluster = Cluster::new(config, options.nodes)?;
    let background = cluster.start_background();
    let start = Instant::now();

    println!("\n[Phase 1/3] Running clients with failure injection...");

    let counters = Arc::new(Counters::default());
    let keys = options.clients.max(1) * 2;
    let mut handles = vec![];
    for client in 0..options.clients {
        handles.push(tokio::spawn(run_client(
            client,
            cluster.coordinator.clone(),
            keys,
            options.ops_per_client,
            counters.clone(),
        )));
    }

    let mut crashes = 0;
    let mut hints_delivered = 0;
    let tick = cluster.config.request_timeout() / 2;
    let mut schedule = Box::pin(failure_schedule(
        cluster.ids.clone(),
        options.ops_per_client,
        options.failure_rate,
    ));
    while let Some(event) = schedule.next().await {
        match event {
            FailureEvent::Crash(id) => {
                info!(node = %id, "crashing node");
                cluster.transport.set_down(&id, true);
                crashes += 1;
            }
            FailureEvent::Recover(id) => {
                info!(node = %id, "recovering node");
                cluster.transport.set_down(&id, false);
                hints_delivered += cluster.coordinator.deliver_hints(&id).await.delivered;
            }
        }
        tokio::time::sleep(tick).await;
    }

    for handle in handles {
        let _ = handle.await;
    }
    let elapsed = start.elapsed();
    println!("[Phase 1/3] ✓ Completed");

    println!("[Phase 2/3] Delivering hints...");
    for id in &cluster.ids {
        cluster.transport.set_down(id, false);
    }
    hints_delivered += cluster.deliver_all_hints().await;
    println!("[Phase 2/3] ✓ Completed");

    println!("[Phase 3/3] Running anti-entropy...");
    for handle in background {
        handle.abort();
    }
    let keys_repaired = cluster.full_anti_entropy().await;
    let converged = cluster.converged();
    println!("[Phase 3/3] ✓ Completed");

    let operations = options.clients * options.ops_per_client;
    Ok(SimulationStats {
        nodes: options.nodes,
        clients: options.clients,
        operations,
        successful_writes: counters.successful_writes.load(Ordering::Relaxed),
        failed_writes: counters.failed_writes.load(Ordering::Relaxed),
        failed_reads: counters.failed_reads.load(Ordering::Relaxed),
        crashes,
        hints_delivered,
        keys_repaired,
        converged,
        total_time: elapsed,
        ops_per_second: operations as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
    })
}
