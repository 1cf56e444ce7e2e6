//! Normalized requests handed to adapters.
//!
//! Every store operation is reduced to one of these before it reaches the
//! hook bus, so adapters see the resolved [`ItemType`] rather than a bare
//! type name.
//!
//! [`ItemType`]: layerstore_kernel::ItemType

use std::collections::BTreeMap;
use std::fmt;

use layerstore_kernel::{Item, ItemTypeHandle};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Verbs
// ---------------------------------------------------------------------------

/// A CRUD verb an adapter can claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Verb {
    FetchItem,
    FetchList,
    Create,
    Update,
    Delete,
}

impl Verb {
    pub const ALL: [Verb; 5] = [
        Self::FetchItem,
        Self::FetchList,
        Self::Create,
        Self::Update,
        Self::Delete,
    ];

    /// Name of the claim hook serving this verb.
    pub fn hook_name(self) -> &'static str {
        match self {
            Self::FetchItem => "fetchItem",
            Self::FetchList => "fetchList",
            Self::Create => "createItem",
            Self::Update => "updateItem",
            Self::Delete => "deleteItem",
        }
    }

    pub fn is_mutation(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hook_name())
    }
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// A list query.
///
/// `filter` is a field-equality map that adapters apply remotely and the
/// store applies locally to cached lists.  `params` is an opaque hint for
/// the adapter (pagination, sort order) that the store never interprets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filter: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filter.insert(field.into(), value);
        self
    }

    pub fn params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// `true` if every filter field of the item equals the filter value.
    pub fn matches(&self, item: &Item) -> bool {
        self.filter
            .iter()
            .all(|(field, expected)| item.get(field) == Some(expected))
    }

    pub fn is_empty(&self) -> bool {
        self.filter.is_empty() && self.params.is_null()
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FetchItemRequest {
    pub item_type: ItemTypeHandle,
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct FetchListRequest {
    pub item_type: ItemTypeHandle,
    pub query: Query,
}

/// A create.  `key` is `None` when the payload carries no identity key yet
/// and the backend is expected to assign one.
#[derive(Debug, Clone)]
pub struct CreateItemRequest {
    pub item_type: ItemTypeHandle,
    pub key: Option<String>,
    pub item: Item,
}

/// An update.  `patch` is what the caller sent; `item` is the patch merged
/// over the item as the store currently sees it.
#[derive(Debug, Clone)]
pub struct UpdateItemRequest {
    pub item_type: ItemTypeHandle,
    pub key: String,
    pub patch: Item,
    pub item: Item,
}

#[derive(Debug, Clone)]
pub struct DeleteItemRequest {
    pub item_type: ItemTypeHandle,
    pub key: String,
}

/// Requests that name the item type they target.
pub trait TypedRequest {
    fn item_type(&self) -> &ItemTypeHandle;

    fn type_name(&self) -> &str {
        self.item_type().name()
    }
}

macro_rules! typed_request {
    ($($ty:ty),* $(,)?) => {
        $(impl TypedRequest for $ty {
            fn item_type(&self) -> &ItemTypeHandle {
                &self.item_type
            }
        })*
    };
}

typed_request!(
    FetchItemRequest,
    FetchListRequest,
    CreateItemRequest,
    UpdateItemRequest,
    DeleteItemRequest,
);

// ---------------------------------------------------------------------------
// Transform payloads
// ---------------------------------------------------------------------------

/// Outgoing mutation, before it is staged or dispatched.
///
/// `item` is the full item for a create, the patch for an update and
/// `null` for a delete.
#[derive(Debug, Clone)]
pub struct MutationDraft {
    pub verb: Verb,
    pub item_type: ItemTypeHandle,
    pub key: Option<String>,
    pub item: Item,
}

/// Items returned by an adapter, before they are written to the cache.
#[derive(Debug, Clone)]
pub struct FetchedItems {
    pub item_type: ItemTypeHandle,
    pub items: Vec<Item>,
}

/// A confirmed mutation.  `item` is `None` for deletes.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub verb: Verb,
    pub item_type: ItemTypeHandle,
    pub key: String,
    pub item: Option<Item>,
}

/// Merge the top-level fields of `patch` over `base`.
///
/// When either side is not a JSON object the patch replaces the base.
pub fn shallow_merge(base: &Item, patch: &Item) -> Item {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            let mut merged = base.clone();
            for (field, value) in patch {
                merged.insert(field.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verbs_map_to_hook_names() {
        let names: Vec<_> = Verb::ALL.iter().map(|v| v.hook_name()).collect();
        assert_eq!(
            names,
            ["fetchItem", "fetchList", "createItem", "updateItem", "deleteItem"]
        );
        assert!(Verb::Update.is_mutation());
        assert!(!Verb::FetchList.is_mutation());
    }

    #[test]
    fn query_matches_on_field_equality() {
        let query = Query::new().filter("done", json!(true));
        assert!(query.matches(&json!({"id": "1", "done": true})));
        assert!(!query.matches(&json!({"id": "2", "done": false})));
        assert!(!query.matches(&json!({"id": "3"})));
        assert!(Query::new().matches(&json!({"anything": 1})));
    }

    #[test]
    fn empty_query_serializes_to_empty_object() {
        assert_eq!(serde_json::to_string(&Query::new()).unwrap(), "{}");
        assert!(Query::new().is_empty());
        assert!(!Query::new().params(json!({"page": 2})).is_empty());
    }

    #[test]
    fn shallow_merge_overwrites_top_level_fields() {
        let merged = shallow_merge(
            &json!({"id": "1", "text": "a", "tags": ["x"]}),
            &json!({"text": "b", "tags": []}),
        );
        assert_eq!(merged, json!({"id": "1", "text": "b", "tags": []}));
        assert_eq!(shallow_merge(&json!(1), &json!({"a": 1})), json!({"a": 1}));
    }
}
