//! Serializable base-layer state.
//!
//! A [`StoreSnapshot`] has the same shape as a layer's `state` and
//! `deletedItems` maps, with no adapter-specific fields.  It is used to seed
//! a store (e.g. from a server-rendered snapshot) and to export the base
//! layer again.

use std::collections::{BTreeMap, BTreeSet};

use layerstore_kernel::Item;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Item type name -> identity key -> item.
    #[serde(default)]
    pub state: BTreeMap<String, BTreeMap<String, Item>>,
    /// Item type name -> keys known to be deleted.
    #[serde(default)]
    pub deleted_items: BTreeMap<String, BTreeSet<String>>,
}

impl StoreSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(mut self, type_name: &str, key: &str, item: Item) -> Self {
        self.state
            .entry(type_name.to_string())
            .or_default()
            .insert(key.to_string(), item);
        self
    }

    pub fn with_deleted(mut self, type_name: &str, key: &str) -> Self {
        self.deleted_items
            .entry(type_name.to_string())
            .or_default()
            .insert(key.to_string());
        self
    }

    pub fn from_json(json: &str) -> CacheResult<Self> {
        let snapshot: Self = serde_json::from_str(json)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn to_json(&self) -> CacheResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Reject snapshots listing a key as both present and deleted.
    pub fn validate(&self) -> CacheResult<()> {
        for (type_name, keys) in &self.deleted_items {
            let Some(items) = self.state.get(type_name) else {
                continue;
            };
            if let Some(key) = keys.iter().find(|k| items.contains_key(*k)) {
                return Err(CacheError::SnapshotConflict {
                    type_name: type_name.clone(),
                    key: key.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.state.values().all(BTreeMap::is_empty)
            && self.deleted_items.values().all(BTreeSet::is_empty)
    }
}
