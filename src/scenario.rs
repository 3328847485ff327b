use crate::simulation::Cluster;
use std::sync::Arc;
use trolley_dynamo::{ClusterConfig, DynamoError};
use trolley_list::{ListError, ListId, ListStore, MemorySink, OverflowPolicy, PersistenceQueue, ShoppingList};

fn print_list(title: &str, list: &ShoppingList) {
    println!("  {title} ({}, id {}):", list.name(), list.list_id());
    for item in list.get_items() {
        println!(
            "    - {:<10} quantity {:>2}  bought {:>2}  need {:>2}",
            item.name,
            item.quantity,
            item.bought,
            item.need()
        );
    }
}

fn banner(title: &str) {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║  {title:<58}║");
    println!("╚════════════════════════════════════════════════════════════╝");
}

/// Two devices edit the same list offline and sync afterwards.
pub async fn concurrent_edits(config: &ClusterConfig) -> Result<(), ListError> {
    banner("Scenario: concurrent edits on two devices");

    let sink = Arc::new(MemorySink::new());
    let (queue, _acks, worker) = PersistenceQueue::spawn(
        sink.clone(),
        config.persistence_queue_capacity,
        OverflowPolicy::DropOldest,
    );
    let mut phone = ListStore::new("phone").with_persistence(queue.clone());
    let mut laptop = ListStore::new("laptop");

    let id = phone.create_list("Groceries");
    let id = phone.assign_global_id(&id, ulid::Ulid::new())?;
    laptop.merge_remote(phone.list(&id).ok_or_else(|| ListError::ListNotFound(id.to_string()))?);

    phone.add_item(&id, "milk", 2)?;
    laptop.add_item(&id, "bread", 1)?;
    laptop.add_item(&id, "milk", 1)?;
    phone.mark_bought(&id, "milk", 1)?;

    let from_laptop = laptop
        .list(&id)
        .cloned()
        .ok_or_else(|| ListError::ListNotFound(id.to_string()))?;
    let from_phone = phone
        .list(&id)
        .cloned()
        .ok_or_else(|| ListError::ListNotFound(id.to_string()))?;
    phone.merge_remote(&from_laptop);
    laptop.merge_remote(&from_phone);

    for (title, store) in [("phone", &phone), ("laptop", &laptop)] {
        if let Some(list) = store.list(&id) {
            print_list(title, list);
        }
    }

    queue.close();
    if let Err(e) = worker.await {
        tracing::error!("Persistence worker failed: {}", e);
    }
    println!("  snapshots persisted: {}", sink.len());
    Ok(())
}

/// A remove on one replica races a re-add on another; the add wins.
pub fn add_wins() {
    banner("Scenario: concurrent remove and re-add");

    let mut a = ShoppingList::new("a", ListId::Local(1), "Party");
    a.add_item("chips", 3);
    let mut b = a.fork("b");

    a.remove_item("chips");
    b.add_item("chips", 1);

    a.merge(&b);
    b.merge(&a);
    print_list("a", &a);
    print_list("b", &b);
    println!("  chips survived: {}", a.contains("chips") && b.contains("chips"));
}

/// Write through the quorum with a replica down, then hand the write off.
pub async fn hinted_handoff(config: &ClusterConfig) -> Result<(), DynamoError> {
    banner("Scenario: write with a replica down");

    let cluster = Cluster::new(config.clone(), config.replication.n + 1)?;
    let key = "groceries";
    let down = cluster.coordinator.preference_list(key)[0].clone();
    cluster.transport.set_down(&down, true);
    println!("  {down} is down");

    let mut list = ShoppingList::new("phone", ListId::Local(1), "Groceries");
    list.add_item("milk", 2);
    let result = cluster.coordinator.put(key, list, None).await?;
    println!("  write succeeded: {} with context {}", result.success, result.context);

    cluster.transport.set_down(&down, false);
    let report = cluster.coordinator.deliver_hints(&down).await;
    println!("  {down} recovered, hints delivered: {}", report.delivered);

    if let Some(record) = cluster.transport.node(&down).and_then(|node| node.get(key)) {
        print_list(down.as_str(), &record.value);
    }
    Ok(())
}
