//! # trolley-list
//!
//! Collaborative shopping lists for Trolley.
//!
//! - [`list`] - the [`ShoppingList`] CRDT: an add-wins item set with
//!   per-item PN-counters for requested and bought quantities
//! - [`codec`] - the validated JSON wire format
//! - [`store`] - [`ListStore`], one replica's table of lists
//! - [`persistence`] - bounded background queue writing snapshots to a
//!   [`SnapshotSink`]
//!
//! ## Example
//!
//! ```rust
//! use trolley_list::{ListId, ShoppingList};
//!
//! let mut phone = ShoppingList::new("phone", ListId::Local(1), "Groceries");
//! let mut laptop = phone.fork("laptop");
//!
//! phone.add_item("milk", 2);
//! laptop.add_item("bread", 1);
//!
//! phone.merge(&laptop);
//! let names: Vec<_> = phone.get_items().into_iter().map(|i| i.name).collect();
//! assert_eq!(names, vec!["bread", "milk"]);
//! ```

pub mod codec;
pub mod error;
pub mod list;
pub mod persistence;
pub mod store;

pub use error::{ListError, Result};
pub use list::{ItemView, ListId, ShoppingList};
pub use persistence::{MemorySink, OverflowPolicy, PersistAck, PersistenceQueue, SnapshotSink};
pub use store::ListStore;
