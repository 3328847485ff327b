//! JSON wire format for shopping lists.
//!
//! ```json
//! {
//!   "replicaId": "r1",
//!   "listId": 7,
//!   "name": "Groceries",
//!   "items": {
//!     "id": "r1",
//!     "dk": { "c": { "compact": { "r1": 2 }, "cloud": ["r2:4"] }, "ds": { "r1:2": "milk" } }
//!   },
//!   "quantities": { "milk": { "p": { "r1": 2 }, "n": {} } },
//!   "deleted": true
//! }
//! ```
//!
//! Decoding is strict: a payload with a missing field, a malformed dot or a
//! stored dot the context does not cover is rejected with
//! [`ListError::MalformedMessage`] instead of producing a half-built list.

use crate::error::{ListError, Result};
use crate::list::{ListId, ShoppingList};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use trolley_core::aworset::AWORSet;
use trolley_core::dot::{Dot, DotContext};
use trolley_core::dot_kernel::DotKernel;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingListWire {
    pub replica_id: String,
    pub list_id: ListId,
    pub name: String,
    pub items: AWORSetWire,
    pub quantities: BTreeMap<String, PNCounterWire>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AWORSetWire {
    pub id: String,
    pub dk: DotKernelWire,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DotKernelWire {
    pub c: DotContextWire,
    /// Dot (`replica:counter`) to item name
    pub ds: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DotContextWire {
    pub compact: BTreeMap<String, u64>,
    pub cloud: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PNCounterWire {
    pub p: BTreeMap<String, u64>,
    pub n: BTreeMap<String, u64>,
}

/// Parse a `replica:counter` dot. The replica part may itself contain colons.
pub fn parse_dot(raw: &str) -> Result<Dot> {
    let (replica, counter) = raw
        .rsplit_once(':')
        .ok_or_else(|| ListError::MalformedMessage(format!("dot without counter: {raw:?}")))?;
    if replica.is_empty() {
        return Err(ListError::MalformedMessage(format!(
            "dot without replica: {raw:?}"
        )));
    }
    let counter: u64 = counter
        .parse()
        .map_err(|_| ListError::MalformedMessage(format!("bad dot counter: {raw:?}")))?;
    if counter == 0 {
        return Err(ListError::MalformedMessage(format!(
            "dot counters start at 1: {raw:?}"
        )));
    }
    Ok(Dot::new(replica, counter))
}

impl From<ShoppingList> for ShoppingListWire {
    fn from(list: ShoppingList) -> Self {
        let kernel = list.items.kernel();
        let context = kernel.context();

        let items = AWORSetWire {
            id: list.items.id().to_string(),
            dk: DotKernelWire {
                c: DotContextWire {
                    compact: context.compact_entries().clone(),
                    cloud: context.cloud().iter().map(Dot::to_string).collect(),
                },
                ds: kernel
                    .store()
                    .iter()
                    .map(|(dot, item)| (dot.to_string(), item.clone()))
                    .collect(),
            },
        };

        let quantities = list
            .quantities
            .iter()
            .map(|(item, counter)| {
                (
                    item.clone(),
                    PNCounterWire {
                        p: counter.increments().entries().clone(),
                        n: counter.decrements().entries().clone(),
                    },
                )
            })
            .collect();

        ShoppingListWire {
            replica_id: list.replica_id,
            list_id: list.list_id,
            name: list.name,
            items,
            quantities,
            deleted: list.deleted,
        }
    }
}

impl TryFrom<ShoppingListWire> for ShoppingList {
    type Error = ListError;

    fn try_from(wire: ShoppingListWire) -> Result<Self> {
        let cloud = wire
            .items
            .dk
            .c
            .cloud
            .iter()
            .map(|raw| parse_dot(raw))
            .collect::<Result<Vec<_>>>()?;
        let context = DotContext::from_parts(wire.items.dk.c.compact, cloud);

        let mut store = BTreeMap::new();
        for (raw, item) in wire.items.dk.ds {
            let dot = parse_dot(&raw)?;
            if !context.dotin(&dot) {
                return Err(ListError::MalformedMessage(format!(
                    "stored dot {dot} is not covered by the context"
                )));
            }
            store.insert(dot, item);
        }

        let quantities = wire
            .quantities
            .into_iter()
            .map(|(item, counter)| {
                let counter = ShoppingList::owned_counter(&wire.replica_id, counter.p, counter.n);
                (item, counter)
            })
            .collect();

        Ok(ShoppingList {
            items: AWORSet::from_kernel(wire.items.id, DotKernel::from_parts(context, store)),
            replica_id: wire.replica_id,
            list_id: wire.list_id,
            name: wire.name,
            quantities,
            deleted: wire.deleted,
        })
    }
}

/// Serialize a list to a JSON value.
pub fn to_json(list: &ShoppingList) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(list)?)
}

/// Decode a list from a JSON value, failing closed on any malformed input.
pub fn from_json(value: serde_json::Value) -> Result<ShoppingList> {
    serde_json::from_value(value).map_err(|e| ListError::MalformedMessage(e.to_string()))
}

/// Decode a list from raw JSON bytes.
pub fn from_slice(bytes: &[u8]) -> Result<ShoppingList> {
    serde_json::from_slice(bytes).map_err(|e| ListError::MalformedMessage(e.to_string()))
}
