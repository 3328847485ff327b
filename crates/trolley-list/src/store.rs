//! Per-replica table of shopping lists.
//!
//! A [`ListStore`] owns every list a replica knows about. Each mutation is
//! applied to the in-memory CRDT and, when a [`PersistenceQueue`] is
//! attached, a serialized snapshot is queued without waiting for it to be
//! written.

use crate::codec;
use crate::error::{ListError, Result};
use crate::list::{ItemView, ListId, ShoppingList};
use crate::persistence::PersistenceQueue;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use ulid::Ulid;

pub struct ListStore {
    replica_id: String,
    lists: BTreeMap<ListId, ShoppingList>,
    next_local_id: u64,
    persistence: Option<PersistenceQueue>,
}

impl ListStore {
    pub fn new(replica_id: impl Into<String>) -> Self {
        Self {
            replica_id: replica_id.into(),
            lists: BTreeMap::new(),
            next_local_id: 1,
            persistence: None,
        }
    }

    /// Attach a persistence queue; every later mutation is snapshotted.
    pub fn with_persistence(mut self, queue: PersistenceQueue) -> Self {
        self.persistence = Some(queue);
        self
    }

    /// Rebuild a store from stored snapshots.
    ///
    /// Snapshots written by another replica are taken over by this one.
    pub fn restore(
        replica_id: impl Into<String>,
        snapshots: impl IntoIterator<Item = serde_json::Value>,
    ) -> Result<Self> {
        let mut store = Self::new(replica_id);
        for snapshot in snapshots {
            let list = codec::from_json(snapshot)?.fork(store.replica_id.clone());
            if let ListId::Local(id) = list.list_id() {
                store.next_local_id = store.next_local_id.max(id + 1);
            }
            store.lists.insert(list.list_id().clone(), list);
        }
        debug!(replica = %store.replica_id, lists = store.lists.len(), "restored list store");
        Ok(store)
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    /// Create a list under a fresh local id.
    pub fn create_list(&mut self, name: impl Into<String>) -> ListId {
        let id = ListId::Local(self.next_local_id);
        self.next_local_id += 1;
        let list = ShoppingList::new(self.replica_id.clone(), id.clone(), name);
        self.lists.insert(id.clone(), list);
        self.persist(&id);
        id
    }

    pub fn list(&self, id: &ListId) -> Option<&ShoppingList> {
        self.lists.get(id)
    }

    /// Lists that have not been deleted.
    pub fn lists(&self) -> impl Iterator<Item = &ShoppingList> + '_ {
        self.lists.values().filter(|list| !list.is_deleted())
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    fn list_mut(&mut self, id: &ListId) -> Result<&mut ShoppingList> {
        self.lists
            .get_mut(id)
            .ok_or_else(|| ListError::ListNotFound(id.to_string()))
    }

    fn mutate(&mut self, id: &ListId, f: impl FnOnce(&mut ShoppingList)) -> Result<()> {
        f(self.list_mut(id)?);
        self.persist(id);
        Ok(())
    }

    pub fn add_item(&mut self, id: &ListId, item: &str, quantity: u64) -> Result<()> {
        self.mutate(id, |list| list.add_item(item, quantity))
    }

    pub fn remove_item(&mut self, id: &ListId, item: &str) -> Result<()> {
        self.mutate(id, |list| list.remove_item(item))
    }

    pub fn mark_bought(&mut self, id: &ListId, item: &str, quantity: u64) -> Result<()> {
        self.mutate(id, |list| list.mark_bought(item, quantity))
    }

    pub fn update_quantity(&mut self, id: &ListId, item: &str, diff: i64) -> Result<()> {
        self.mutate(id, |list| list.update_quantity(item, diff))
    }

    /// Soft-delete a list; it stays in the store so the deletion replicates.
    pub fn delete_list(&mut self, id: &ListId) -> Result<()> {
        self.mutate(id, ShoppingList::soft_delete)
    }

    pub fn items(&self, id: &ListId) -> Result<Vec<ItemView>> {
        self.lists
            .get(id)
            .map(ShoppingList::get_items)
            .ok_or_else(|| ListError::ListNotFound(id.to_string()))
    }

    /// Promote a local list to a global id, returning the new id.
    ///
    /// The snapshot stored under the old id is removed once the promoted
    /// list has been queued.
    pub fn assign_global_id(&mut self, id: &ListId, global: Ulid) -> Result<ListId> {
        let mut list = self
            .lists
            .remove(id)
            .ok_or_else(|| ListError::ListNotFound(id.to_string()))?;
        list.assign_global_id(global);
        let new_id = list.list_id().clone();

        match self.lists.get_mut(&new_id) {
            Some(existing) => existing.merge(&list),
            None => {
                self.lists.insert(new_id.clone(), list);
            }
        }
        self.persist(&new_id);
        if new_id != *id {
            self.unpersist(id);
        }
        Ok(new_id)
    }

    /// Merge a list received from another replica.
    ///
    /// Unknown lists are adopted under this replica's id.
    pub fn merge_remote(&mut self, remote: &ShoppingList) -> ListId {
        let id = remote.list_id().clone();
        match self.lists.get_mut(&id) {
            Some(local) => local.merge(remote),
            None => {
                self.lists
                    .insert(id.clone(), remote.fork(self.replica_id.clone()));
            }
        }
        self.persist(&id);
        id
    }

    /// Serialized snapshot of one list.
    pub fn snapshot(&self, id: &ListId) -> Result<serde_json::Value> {
        let list = self
            .lists
            .get(id)
            .ok_or_else(|| ListError::ListNotFound(id.to_string()))?;
        codec::to_json(list)
    }

    fn persist(&self, id: &ListId) {
        let Some(queue) = &self.persistence else {
            return;
        };
        let snapshot = match self.snapshot(id) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(list = %id, error = %e, "could not snapshot list");
                return;
            }
        };
        if let Err(e) = queue.try_submit(&id.to_string(), snapshot) {
            warn!(list = %id, error = %e, "snapshot not queued for persistence");
        }
    }

    fn unpersist(&self, id: &ListId) {
        if let Some(queue) = &self.persistence {
            if let Err(e) = queue.try_remove(&id.to_string()) {
                warn!(list = %id, error = %e, "snapshot removal not queued");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemorySink, OverflowPolicy, SnapshotSink};
    use std::sync::Arc;

    #[test]
    fn test_create_and_edit() {
        let mut store = ListStore::new("r1");
        let id = store.create_list("Groceries");
        assert_eq!(id, ListId::Local(1));

        store.add_item(&id, "milk", 2).unwrap();
        store.mark_bought(&id, "milk", 1).unwrap();
        store.add_item(&id, "bread", 1).unwrap();
        store.remove_item(&id, "bread").unwrap();
        store.update_quantity(&id, "milk", 3).unwrap();

        let items = store.items(&id).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!((items[0].quantity, items[0].bought), (5, 1));
    }

    #[test]
    fn test_missing_list() {
        let mut store = ListStore::new("r1");
        let missing = ListId::Local(42);
        assert_eq!(
            store.add_item(&missing, "milk", 1),
            Err(ListError::ListNotFound("42".into()))
        );
        assert!(store.items(&missing).is_err());
        assert!(store.snapshot(&missing).is_err());
    }

    #[test]
    fn test_delete_hides_list() {
        let mut store = ListStore::new("r1");
        let keep = store.create_list("Keep");
        let gone = store.create_list("Gone");
        store.delete_list(&gone).unwrap();

        let names: Vec<_> = store.lists().map(|l| l.name().to_string()).collect();
        assert_eq!(names, vec!["Keep"]);
        assert!(store.list(&gone).unwrap().is_deleted());
        assert!(store.list(&keep).is_some());
    }

    #[test]
    fn test_merge_remote_between_stores() {
        let mut r1 = ListStore::new("r1");
        let id = r1.create_list("Groceries");
        let global = r1.assign_global_id(&id, Ulid::new()).unwrap();
        assert!(global.is_global());
        assert!(r1.list(&id).is_none());

        let mut r2 = ListStore::new("r2");
        r2.merge_remote(r1.list(&global).unwrap());

        r1.add_item(&global, "milk", 2).unwrap();
        r2.add_item(&global, "bread", 1).unwrap();

        r1.merge_remote(r2.list(&global).unwrap());
        r2.merge_remote(r1.list(&global).unwrap());

        assert_eq!(r1.items(&global).unwrap(), r2.items(&global).unwrap());
        assert_eq!(r2.list(&global).unwrap().replica_id(), "r2");
    }

    #[test]
    fn test_restore_round_trip() {
        let mut store = ListStore::new("r1");
        let a = store.create_list("A");
        store.add_item(&a, "tea", 1).unwrap();
        let b = store.create_list("B");

        let snapshots = vec![store.snapshot(&a).unwrap(), store.snapshot(&b).unwrap()];
        let mut restored = ListStore::restore("r1", snapshots).unwrap();

        assert_eq!(restored.items(&a).unwrap(), store.items(&a).unwrap());
        assert_eq!(restored.create_list("C"), ListId::Local(3));
    }

    #[test]
    fn test_restore_rejects_garbage() {
        let result = ListStore::restore("r1", vec![serde_json::json!({ "name": "x" })]);
        assert!(matches!(result, Err(ListError::MalformedMessage(_))));
    }

    #[tokio::test]
    async fn test_mutations_are_persisted() {
        let sink = Arc::new(MemorySink::new());
        let (queue, mut acks, worker) =
            PersistenceQueue::spawn(sink.clone(), 16, OverflowPolicy::DropOldest);

        let mut store = ListStore::new("r1").with_persistence(queue.clone());
        let id = store.create_list("Groceries");
        store.add_item(&id, "milk", 2).unwrap();

        queue.close();
        worker.await.unwrap();
        while let Ok(ack) = acks.try_recv() {
            assert!(ack.ok);
        }

        let stored = sink.load("1").unwrap().unwrap();
        let restored = ListStore::restore("r1", [stored]).unwrap();
        assert_eq!(restored.items(&id).unwrap(), store.items(&id).unwrap());
    }

    #[tokio::test]
    async fn test_restart_after_promotion_restores_one_list() {
        let sink = Arc::new(MemorySink::new());
        let (queue, _acks, worker) =
            PersistenceQueue::spawn(sink.clone(), 16, OverflowPolicy::DropOldest);

        let mut store = ListStore::new("r1").with_persistence(queue.clone());
        let local = store.create_list("Groceries");
        let global = store.assign_global_id(&local, Ulid::new()).unwrap();
        store.add_item(&global, "milk", 2).unwrap();

        queue.close();
        worker.await.unwrap();

        let snapshots = sink.load_all().unwrap().into_iter().map(|(_, v)| v);
        let restored = ListStore::restore("r1", snapshots).unwrap();
        assert_eq!(restored.lists().count(), 1);
        assert!(restored.list(&local).is_none());
        assert_eq!(restored.items(&global).unwrap(), store.items(&global).unwrap());
    }
}
