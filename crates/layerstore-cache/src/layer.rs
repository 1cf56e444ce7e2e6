//! A single cache layer.
//!
//! A layer maps item type name -> identity key -> item snapshot, plus a set
//! of keys the layer explicitly deletes (tombstones).  A key is never in
//! both maps of the same layer; every mutator below preserves that.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use layerstore_kernel::Item;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a layer in the stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(String);

impl LayerId {
    /// Id of the base layer.
    pub const BASE: &'static str = "base";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn base() -> Self {
        Self(Self::BASE.to_string())
    }

    /// A fresh, time-ordered id for an optimistic layer.
    pub fn generate() -> Self {
        Self(format!("optimistic-{}", Uuid::now_v7()))
    }

    pub fn is_base(&self) -> bool {
        self.0 == Self::BASE
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LayerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for LayerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// What a single layer says about a key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution<'a> {
    Present(&'a Item),
    Deleted,
}

/// A write or delete, used to describe confirmed results at commit time.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerChange {
    Write {
        type_name: String,
        key: String,
        item: Item,
    },
    Delete {
        type_name: String,
        key: String,
    },
}

impl LayerChange {
    pub fn write(type_name: impl Into<String>, key: impl Into<String>, item: Item) -> Self {
        Self::Write {
            type_name: type_name.into(),
            key: key.into(),
            item,
        }
    }

    pub fn delete(type_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Delete {
            type_name: type_name.into(),
            key: key.into(),
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Self::Write { type_name, .. } | Self::Delete { type_name, .. } => type_name,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Write { key, .. } | Self::Delete { key, .. } => key,
        }
    }
}

/// A named overlay of cached state and deletions.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    id: LayerId,
    state: BTreeMap<String, BTreeMap<String, Item>>,
    deleted: BTreeMap<String, BTreeSet<String>>,
    skip: bool,
    optimistic: bool,
}

impl Layer {
    /// The bottom layer.  Only the stack creates one.
    pub(crate) fn base() -> Self {
        Self {
            id: LayerId::base(),
            state: BTreeMap::new(),
            deleted: BTreeMap::new(),
            skip: false,
            optimistic: false,
        }
    }

    /// An empty speculative layer, ready to be filled and pushed.
    pub fn optimistic(id: impl Into<LayerId>) -> Self {
        Self {
            id: id.into(),
            state: BTreeMap::new(),
            deleted: BTreeMap::new(),
            skip: false,
            optimistic: true,
        }
    }

    pub fn with_item(mut self, type_name: &str, key: &str, item: Item) -> Self {
        self.insert_item(type_name, key, item);
        self
    }

    pub fn with_deleted(mut self, type_name: &str, key: &str) -> Self {
        self.mark_deleted(type_name, key);
        self
    }

    /// Push the layer paused (excluded from merged reads).
    pub fn with_skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    /// Insert or overwrite an item, clearing any tombstone for its key.
    pub fn insert_item(&mut self, type_name: &str, key: &str, item: Item) {
        if let Some(keys) = self.deleted.get_mut(type_name) {
            keys.remove(key);
            if keys.is_empty() {
                self.deleted.remove(type_name);
            }
        }
        self.state
            .entry(type_name.to_string())
            .or_default()
            .insert(key.to_string(), item);
    }

    /// Remove an item and record a tombstone for its key.
    pub fn mark_deleted(&mut self, type_name: &str, key: &str) {
        if let Some(items) = self.state.get_mut(type_name) {
            items.remove(key);
            if items.is_empty() {
                self.state.remove(type_name);
            }
        }
        self.deleted
            .entry(type_name.to_string())
            .or_default()
            .insert(key.to_string());
    }

    pub(crate) fn apply(&mut self, change: &LayerChange) {
        match change {
            LayerChange::Write {
                type_name,
                key,
                item,
            } => self.insert_item(type_name, key, item.clone()),
            LayerChange::Delete { type_name, key } => self.mark_deleted(type_name, key),
        }
    }

    /// Drop everything this layer knows about one type.
    pub(crate) fn clear_type(&mut self, type_name: &str) -> bool {
        let had_state = self.state.remove(type_name).is_some();
        let had_deleted = self.deleted.remove(type_name).is_some();
        had_state || had_deleted
    }

    pub(crate) fn set_skip(&mut self, skip: bool) {
        self.skip = skip;
    }

    /// Every change this layer carries, writes first.
    pub fn changes(&self) -> Vec<LayerChange> {
        let writes = self.state.iter().flat_map(|(t, items)| {
            items
                .iter()
                .map(move |(k, item)| LayerChange::write(t.as_str(), k.as_str(), item.clone()))
        });
        let deletes = self.deleted.iter().flat_map(|(t, keys)| {
            keys.iter()
                .map(move |k| LayerChange::delete(t.as_str(), k.as_str()))
        });
        writes.chain(deletes).collect()
    }

    pub fn id(&self) -> &LayerId {
        &self.id
    }

    pub fn is_skipped(&self) -> bool {
        self.skip
    }

    pub fn is_optimistic(&self) -> bool {
        self.optimistic
    }

    /// What this layer says about a key, if anything.
    pub fn resolve(&self, type_name: &str, key: &str) -> Option<Resolution<'_>> {
        if let Some(item) = self.state.get(type_name).and_then(|items| items.get(key)) {
            return Some(Resolution::Present(item));
        }
        if self
            .deleted
            .get(type_name)
            .is_some_and(|keys| keys.contains(key))
        {
            return Some(Resolution::Deleted);
        }
        None
    }

    pub fn state_keys(&self, type_name: &str) -> impl Iterator<Item = &String> + '_ {
        self.state.get(type_name).into_iter().flat_map(BTreeMap::keys)
    }

    pub fn deleted_keys(&self, type_name: &str) -> impl Iterator<Item = &String> + '_ {
        self.deleted.get(type_name).into_iter().flat_map(BTreeSet::iter)
    }

    /// Every `(type, key)` this layer mentions, in state or tombstones.
    pub fn touched(&self) -> BTreeSet<(String, String)> {
        let written = self
            .state
            .iter()
            .flat_map(|(t, items)| items.keys().map(move |k| (t.clone(), k.clone())));
        let deleted = self
            .deleted
            .iter()
            .flat_map(|(t, keys)| keys.iter().map(move |k| (t.clone(), k.clone())));
        written.chain(deleted).collect()
    }

    pub(crate) fn state(&self) -> &BTreeMap<String, BTreeMap<String, Item>> {
        &self.state
    }

    pub(crate) fn deleted(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.deleted
    }

    pub fn item_count(&self) -> usize {
        self.state.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty() && self.deleted.is_empty()
    }

    /// `true` if no key is in both `state` and `deletedItems`.
    pub fn invariant_holds(&self) -> bool {
        self.deleted.iter().all(|(t, keys)| {
            self.state
                .get(t)
                .is_none_or(|items| keys.iter().all(|k| !items.contains_key(k)))
        })
    }
}
