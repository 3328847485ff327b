//! Quorum reads and writes against an in-process cluster.
//!
//! Tests cover:
//! - Writes and reads with one replica down
//! - Insufficient replicas
//! - Reconciliation of concurrent versions
//! - Read repair of missing and outdated replicas
//! - Slow replicas hitting the request timeout

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use trolley_dynamo::{ClockOrdering, DynamoError, VectorClock};

#[tokio::test]
async fn test_write_then_read() {
    let config = config();
    let ids = ids(3);
    let transport = transport(&ids);
    let coordinator = coordinator(&ids, transport.clone(), &config);

    let written = coordinator.put("1", list("phone", &["milk"]), None).await.unwrap();
    assert!(written.success);
    assert_eq!(written.context.len(), 2);

    let read = coordinator.get("1").await.unwrap().unwrap();
    assert!(read.value.contains("milk"));
    assert_ne!(read.context.compare(&written.context), ClockOrdering::Less);
    assert!(coordinator.get("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_one_replica_down() {
    let config = config();
    let ids = ids(3);
    let transport = transport(&ids);
    let coordinator = coordinator(&ids, transport.clone(), &config);
    let preference = coordinator.preference_list("1");

    transport.set_down(&preference[0], true);
    let written = coordinator.put("1", list("phone", &["milk"]), None).await.unwrap();
    assert!(written.success);
    assert_eq!(hints_for(&transport, &preference[0]), 1);

    let read = coordinator.get("1").await.unwrap().unwrap();
    assert!(read.value.contains("milk"));
}

#[tokio::test]
async fn test_insufficient_replicas() {
    let config = config();
    let ids = ids(3);
    let transport = transport(&ids);
    let coordinator = coordinator(&ids, transport.clone(), &config);

    transport.set_down(&ids[0], true);
    transport.set_down(&ids[1], true);

    let err = coordinator.put("1", list("phone", &["milk"]), None).await.unwrap_err();
    assert_eq!(
        err,
        DynamoError::InsufficientReplicas {
            required: 2,
            available: 1
        }
    );
    assert!(matches!(
        coordinator.get("1").await,
        Err(DynamoError::InsufficientReplicas { .. })
    ));
    assert_eq!(transport.node(&ids[2]).unwrap().len(), 0);
}

#[tokio::test]
async fn test_descendant_write_replaces() {
    let config = config();
    let ids = ids(3);
    let transport = transport(&ids);
    let coordinator = coordinator(&ids, transport.clone(), &config);

    let mut value = list("phone", &["milk", "bread"]);
    let first = coordinator.put("1", value.clone(), None).await.unwrap();

    value.remove_item("milk");
    let second = coordinator.put("1", value, Some(first.context.clone())).await.unwrap();
    assert!(second.success);
    assert_eq!(second.context.compare(&first.context), ClockOrdering::Greater);

    let read = coordinator.get("1").await.unwrap().unwrap();
    assert!(!read.value.contains("milk"));
    assert!(read.value.contains("bread"));
}

#[tokio::test]
async fn test_blind_writes_do_not_overwrite() {
    let config = config();
    let ids = ids(3);
    let transport = transport(&ids);
    let coordinator = coordinator(&ids, transport.clone(), &config);

    coordinator.put("1", list("phone", &["milk"]), None).await.unwrap();
    let second = coordinator.put("1", list("laptop", &["bread"]), None).await.unwrap();
    assert!(second.success);

    let read = coordinator.get("1").await.unwrap().unwrap();
    assert!(read.value.contains("milk"));
    assert!(read.value.contains("bread"));
}

#[tokio::test]
async fn test_concurrent_versions_are_joined() {
    let config = config();
    let ids = ids(3);
    let transport = transport(&ids);
    let coordinator = coordinator(&ids, transport.clone(), &config);
    let preference = coordinator.preference_list("1");

    // two replicas take independent writes with no shared history
    let base = list("base", &[]);
    let mut phone = base.fork("phone");
    phone.add_item("milk", 2);
    let mut laptop = base.fork("laptop");
    laptop.add_item("bread", 1);

    let a = transport.node(&preference[0]).unwrap();
    let b = transport.node(&preference[1]).unwrap();
    a.put("1", phone, VectorClock::new());
    b.put("1", laptop, VectorClock::new());

    let read = coordinator.get("1").await.unwrap().unwrap();
    assert!(read.value.contains("milk"));
    assert!(read.value.contains("bread"));
    assert_eq!(read.context.get(preference[0].as_str()), 1);
    assert_eq!(read.context.get(preference[1].as_str()), 1);

    // both replicas were repaired to the joined version
    for node in [&a, &b] {
        let record = node.get("1").unwrap();
        assert!(record.value.contains("milk") && record.value.contains("bread"));
        assert_eq!(record.context, read.context);
    }
}

#[tokio::test]
async fn test_read_repairs_missing_replica() {
    let config = config();
    let ids = ids(3);
    let transport = transport(&ids);
    let coordinator = coordinator(&ids, transport.clone(), &config);
    let preference = coordinator.preference_list("1");

    coordinator.put("1", list("phone", &["milk"]), None).await.unwrap();
    let lagging = transport.node(&preference[2]).unwrap();
    assert!(lagging.get("1").is_none());

    transport.set_down(&preference[0], true);
    let read = coordinator.get("1").await.unwrap().unwrap();
    assert!(read.value.contains("milk"));

    let repaired = lagging.get("1").unwrap();
    assert!(repaired.value.contains("milk"));
}

#[tokio::test]
async fn test_slow_replica_times_out() {
    let config = config();
    let ids = ids(3);
    let transport = transport(&ids);
    let coordinator = coordinator(&ids, transport.clone(), &config);
    let preference = coordinator.preference_list("1");

    transport.set_delay(&preference[0], Duration::from_millis(400));
    let written = coordinator.put("1", list("phone", &["milk"]), None).await.unwrap();
    assert!(written.success);
    assert_eq!(hints_for(&transport, &preference[0]), 1);

    transport.set_delay(&preference[0], Duration::ZERO);
    assert!(transport.node(&preference[0]).unwrap().get("1").is_none());
}

#[tokio::test]
async fn test_suspected_node_is_skipped() {
    let config = config();
    let ids = ids(3);
    let transport = transport(&ids);
    let preference = coordinator(&ids, transport.clone(), &config).preference_list("1");

    let view = membership(&preference[1], &ids);
    view.suspect(&preference[0]);
    let coordinator = coordinator(&ids, transport.clone(), &config).with_membership(Arc::clone(&view));

    let written = coordinator.put("1", list("phone", &["milk"]), None).await.unwrap();
    assert!(written.success);
    assert!(transport.node(&preference[0]).unwrap().is_empty());
    assert_eq!(hints_for(&transport, &preference[0]), 1);
}
