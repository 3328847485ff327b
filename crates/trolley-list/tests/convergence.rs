//! Convergence properties of shopping lists edited on several replicas.

use proptest::prelude::*;
use trolley_core::lattice::Lattice;
use trolley_list::codec;
use trolley_list::{ListId, ShoppingList};

#[derive(Clone, Debug)]
enum Edit {
    Add(usize, u64),
    Remove(usize),
    Bought(usize, u64),
    Update(usize, i64),
}

const ITEMS: [&str; 4] = ["milk", "bread", "eggs", "tea"];

fn edit_strategy() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (0..ITEMS.len(), 1u64..4).prop_map(|(i, q)| Edit::Add(i, q)),
        (0..ITEMS.len()).prop_map(Edit::Remove),
        (0..ITEMS.len(), 1u64..3).prop_map(|(i, q)| Edit::Bought(i, q)),
        (0..ITEMS.len(), -3i64..4).prop_map(|(i, d)| Edit::Update(i, d)),
    ]
}

fn apply(list: &mut ShoppingList, edits: &[Edit]) {
    for edit in edits {
        match *edit {
            Edit::Add(i, q) => list.add_item(ITEMS[i], q),
            Edit::Remove(i) => list.remove_item(ITEMS[i]),
            Edit::Bought(i, q) => list.mark_bought(ITEMS[i], q),
            Edit::Update(i, d) => list.update_quantity(ITEMS[i], d),
        }
    }
}

fn edited(base: &ShoppingList, replica: &str, edits: &[Edit]) -> ShoppingList {
    let mut list = base.fork(replica);
    apply(&mut list, edits);
    list
}

fn edits() -> impl Strategy<Value = Vec<Edit>> {
    prop::collection::vec(edit_strategy(), 0..10)
}

proptest! {
    #[test]
    fn replicas_converge_in_any_merge_order(
        shared in edits(),
        a in edits(),
        b in edits(),
        c in edits()
    ) {
        let mut base = ShoppingList::new("r0", ListId::Local(1), "Groceries");
        apply(&mut base, &shared);

        let ra = edited(&base, "ra", &a);
        let rb = edited(&base, "rb", &b);
        let rc = edited(&base, "rc", &c);

        let left = ra.join(&rb).join(&rc);
        let right = rc.join(&ra.join(&rb));
        let other = rb.join(&rc).join(&ra);

        prop_assert_eq!(left.get_items(), right.get_items());
        prop_assert_eq!(left.get_items(), other.get_items());
        prop_assert_eq!(left.state_bytes(), other.state_bytes());
    }

    #[test]
    fn merge_is_idempotent(shared in edits(), a in edits()) {
        let mut base = ShoppingList::new("r0", ListId::Local(1), "Groceries");
        apply(&mut base, &shared);
        let list = edited(&base, "ra", &a);

        let twice = list.join(&list);
        prop_assert_eq!(twice, list);
    }

    #[test]
    fn decoded_snapshot_joins_as_noop(shared in edits(), a in edits()) {
        let mut base = ShoppingList::new("r0", ListId::Local(1), "Groceries");
        apply(&mut base, &shared);
        let list = edited(&base, "ra", &a);

        let decoded = codec::from_json(codec::to_json(&list).unwrap()).unwrap();
        prop_assert_eq!(list.join(&decoded), list);
    }

    #[test]
    fn need_is_never_negative(a in edits()) {
        let list = edited(&ShoppingList::new("r0", ListId::Local(1), "Groceries"), "ra", &a);
        for item in list.get_items() {
            prop_assert!(item.need() <= item.quantity);
        }
    }
}
