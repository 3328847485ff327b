//! Shopping list CRDT.
//!
//! A list is an add-wins set of item names plus one PN-counter per item: the
//! positive half counts how many were asked for, the negative half how many
//! were bought. Removing an item only touches the set; its counter is kept so
//! that a concurrent remote update is not lost when the item comes back.

use crate::codec::ShoppingListWire;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use trolley_core::aworset::AWORSet;
use trolley_core::gcounter::GCounter;
use trolley_core::lattice::Lattice;
use trolley_core::pncounter::PNCounter;
use ulid::Ulid;

/// Identifier of a list: a replica-local number until the list is first
/// synchronised, a global ULID afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListId {
    Local(u64),
    Global(Ulid),
}

impl ListId {
    /// Allocate a fresh global id.
    pub fn global() -> Self {
        ListId::Global(Ulid::new())
    }

    pub fn is_global(&self) -> bool {
        matches!(self, ListId::Global(_))
    }

    /// Merge rule for ids: a global id beats a local one, otherwise the
    /// larger id wins so both sides pick the same.
    pub fn merge(&self, other: &ListId) -> ListId {
        match (self, other) {
            (ListId::Global(_), ListId::Local(_)) => self.clone(),
            (ListId::Local(_), ListId::Global(_)) => other.clone(),
            _ => self.max(other).clone(),
        }
    }
}

impl fmt::Display for ListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListId::Local(id) => write!(f, "{}", id),
            ListId::Global(ulid) => write!(f, "{}", ulid),
        }
    }
}

impl FromStr for ListId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(local) = s.parse::<u64>() {
            return Ok(ListId::Local(local));
        }
        Ulid::from_string(s).map(ListId::Global)
    }
}

/// What a reader sees for one item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemView {
    pub name: String,
    /// Total ever requested
    pub quantity: u64,
    /// Total ever ticked off
    pub bought: u64,
}

impl ItemView {
    /// Still to buy; never negative.
    pub fn need(&self) -> u64 {
        self.quantity.saturating_sub(self.bought)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ShoppingListWire", try_from = "ShoppingListWire")]
pub struct ShoppingList {
    pub(crate) replica_id: String,
    pub(crate) list_id: ListId,
    pub(crate) name: String,
    pub(crate) items: AWORSet<String>,
    pub(crate) quantities: BTreeMap<String, PNCounter>,
    pub(crate) deleted: bool,
}

impl ShoppingList {
    pub fn new(replica_id: impl Into<String>, list_id: ListId, name: impl Into<String>) -> Self {
        let replica_id = replica_id.into();
        Self {
            items: AWORSet::new(replica_id.clone()),
            replica_id,
            list_id,
            name: name.into(),
            quantities: BTreeMap::new(),
            deleted: false,
        }
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    pub fn list_id(&self) -> &ListId {
        &self.list_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn items(&self) -> &AWORSet<String> {
        &self.items
    }

    pub fn quantities(&self) -> &BTreeMap<String, PNCounter> {
        &self.quantities
    }

    /// A copy of this list that issues dots and counter entries as
    /// `replica_id`. Used when another replica takes ownership of a received
    /// snapshot.
    pub fn fork(&self, replica_id: impl Into<String>) -> ShoppingList {
        let replica_id = replica_id.into();
        let quantities = self
            .quantities
            .iter()
            .map(|(item, counter)| {
                let p = counter.increments().clone().with_owner(replica_id.clone());
                let n = counter.decrements().clone().with_owner(replica_id.clone());
                (item.clone(), PNCounter::from_parts(p, n))
            })
            .collect();

        ShoppingList {
            items: AWORSet::from_kernel(replica_id.clone(), self.items.kernel().clone()),
            replica_id,
            list_id: self.list_id.clone(),
            name: self.name.clone(),
            quantities,
            deleted: self.deleted,
        }
    }

    fn counter_mut(&mut self, item: &str) -> &mut PNCounter {
        let replica_id = &self.replica_id;
        self.quantities
            .entry(item.to_string())
            .or_insert_with(|| PNCounter::new(replica_id.clone()))
    }

    /// Add an item (or re-add it) and request `quantity` more of it.
    pub fn add_item(&mut self, item: &str, quantity: u64) {
        let delta = self.items.add(item.to_string());
        self.items.join_assign(&delta);

        let counter = self.counter_mut(item);
        let delta = counter.inc(quantity);
        counter.join_assign(&delta);
    }

    /// Remove an item from the list. The counter is retained.
    pub fn remove_item(&mut self, item: &str) {
        let delta = self.items.rmv(&item.to_string());
        self.items.join_assign(&delta);
    }

    /// Tick off `quantity` of an item as bought.
    pub fn mark_bought(&mut self, item: &str, quantity: u64) {
        let counter = self.counter_mut(item);
        let delta = counter.dec(quantity);
        counter.join_assign(&delta);
    }

    /// Adjust an item by a signed amount: positive asks for more, negative
    /// marks some as bought.
    pub fn update_quantity(&mut self, item: &str, diff: i64) {
        match diff {
            d if d > 0 => {
                let counter = self.counter_mut(item);
                let delta = counter.inc(d.unsigned_abs());
                counter.join_assign(&delta);
            }
            d if d < 0 => self.mark_bought(item, d.unsigned_abs()),
            _ => {}
        }
    }

    pub fn contains(&self, item: &str) -> bool {
        self.items.contains(&item.to_string())
    }

    /// Current items sorted by name.
    pub fn get_items(&self) -> Vec<ItemView> {
        self.items
            .read()
            .into_iter()
            .map(|name| {
                let (quantity, bought) = self
                    .quantities
                    .get(&name)
                    .map(|c| (c.increments().read(), c.decrements().read()))
                    .unwrap_or((0, 0));
                ItemView {
                    name,
                    quantity,
                    bought,
                }
            })
            .collect()
    }

    pub fn item(&self, name: &str) -> Option<ItemView> {
        self.get_items().into_iter().find(|view| view.name == name)
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn assign_global_id(&mut self, id: Ulid) {
        self.list_id = ListId::Global(id);
    }

    /// Mark the list deleted. Deletion is permanent once merged.
    pub fn soft_delete(&mut self) {
        self.deleted = true;
    }

    /// Merge another replica's state into this one.
    pub fn merge(&mut self, other: &ShoppingList) {
        self.items.join_assign(&other.items);

        for (item, counter) in &other.quantities {
            self.counter_mut(item).join_assign(counter);
        }

        self.list_id = self.list_id.merge(&other.list_id);
        if other.name > self.name {
            self.name = other.name.clone();
        }
        self.deleted |= other.deleted;
    }

    /// Canonical bytes of the replicated state.
    ///
    /// The owning replica id is blanked out, so two replicas holding the same
    /// CRDT state produce the same bytes.
    pub fn state_bytes(&self) -> Vec<u8> {
        let mut wire = ShoppingListWire::from(self.clone());
        wire.replica_id.clear();
        wire.items.id.clear();
        serde_json::to_vec(&wire).unwrap_or_default()
    }

    /// Build a counter owned by this list's replica from raw entries.
    pub(crate) fn owned_counter(
        replica_id: &str,
        p: BTreeMap<String, u64>,
        n: BTreeMap<String, u64>,
    ) -> PNCounter {
        PNCounter::from_parts(
            GCounter::from_entries(p).with_owner(replica_id),
            GCounter::from_entries(n).with_owner(replica_id),
        )
    }
}

impl Lattice for ShoppingList {
    fn bottom() -> Self {
        ShoppingList::new(String::new(), ListId::Local(0), String::new())
    }

    fn join(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    fn join_assign(&mut self, other: &Self) {
        self.merge(other);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(name: &str, quantity: u64, bought: u64) -> ItemView {
        ItemView {
            name: name.to_string(),
            quantity,
            bought,
        }
    }

    #[test]
    fn test_concurrent_edits_merge() {
        let base = ShoppingList::new("r1", ListId::Local(1), "Groceries");
        let mut r1 = base.clone();
        let mut r2 = base.fork("r2");

        r1.add_item("milk", 2);
        r2.add_item("bread", 1);

        r1.merge(&r2);
        assert_eq!(
            r1.get_items(),
            vec![view("bread", 1, 0), view("milk", 2, 0)]
        );
    }

    #[test]
    fn test_mark_bought_need() {
        let mut list = ShoppingList::new("r1", ListId::Local(1), "Groceries");
        list.add_item("milk", 2);
        list.mark_bought("milk", 1);

        let milk = list.item("milk").unwrap();
        assert_eq!(milk, view("milk", 2, 1));
        assert_eq!(milk.need(), 1);

        list.mark_bought("milk", 5);
        assert_eq!(list.item("milk").unwrap().need(), 0);
    }

    #[test]
    fn test_remove_retains_counter() {
        let mut list = ShoppingList::new("r1", ListId::Local(1), "Groceries");
        list.add_item("eggs", 6);
        list.mark_bought("eggs", 2);
        list.remove_item("eggs");

        assert!(!list.contains("eggs"));
        assert!(list.get_items().is_empty());
        assert_eq!(list.quantities().get("eggs").map(|c| c.read()), Some(4));

        list.add_item("eggs", 1);
        assert_eq!(list.item("eggs").unwrap(), view("eggs", 7, 2));
    }

    #[test]
    fn test_concurrent_remove_and_readd() {
        let mut r1 = ShoppingList::new("r1", ListId::Local(1), "Groceries");
        r1.add_item("milk", 1);
        let mut r2 = r1.fork("r2");

        r1.remove_item("milk");
        r2.add_item("milk", 1);

        r1.merge(&r2);
        assert!(r1.contains("milk"));
        assert_eq!(r1.item("milk").unwrap().quantity, 2);
    }

    #[test]
    fn test_update_quantity() {
        let mut list = ShoppingList::new("r1", ListId::Local(1), "Groceries");
        list.add_item("apples", 3);
        list.update_quantity("apples", 2);
        list.update_quantity("apples", -4);
        list.update_quantity("apples", 0);

        assert_eq!(list.item("apples").unwrap(), view("apples", 5, 4));
    }

    #[test]
    fn test_unticked_item_reads_zero() {
        let mut list = ShoppingList::new("r1", ListId::Local(1), "Groceries");
        let delta = list.items.add("salt".to_string());
        list.items.join_assign(&delta);
        assert_eq!(list.get_items(), vec![view("salt", 0, 0)]);
    }

    #[test]
    fn test_merge_metadata() {
        let mut r1 = ShoppingList::new("r1", ListId::Local(4), "Groceries");
        let mut r2 = r1.fork("r2");
        let global = Ulid::new();
        r2.assign_global_id(global);
        r2.soft_delete();

        r1.merge(&r2);
        assert_eq!(r1.list_id(), &ListId::Global(global));
        assert!(r1.is_deleted());

        // merging back the older local view changes nothing
        let stale = ShoppingList::new("r3", ListId::Local(4), "Groceries");
        r1.merge(&stale);
        assert_eq!(r1.list_id(), &ListId::Global(global));
        assert!(r1.is_deleted());
    }

    #[test]
    fn test_state_bytes_ignore_owner() {
        let mut r1 = ShoppingList::new("r1", ListId::Local(1), "Groceries");
        r1.add_item("milk", 2);
        let r2 = r1.fork("r2");

        assert_eq!(r1.state_bytes(), r2.state_bytes());

        let mut r3 = r2.clone();
        r3.add_item("tea", 1);
        assert_ne!(r1.state_bytes(), r3.state_bytes());
    }

    #[test]
    fn test_list_id_parse_and_display() {
        assert_eq!("17".parse::<ListId>().unwrap(), ListId::Local(17));

        let ulid = Ulid::new();
        let id: ListId = ulid.to_string().parse().unwrap();
        assert_eq!(id, ListId::Global(ulid));
        assert_eq!(id.to_string(), ulid.to_string());

        assert!("not-an-id".parse::<ListId>().is_err());
    }
}
