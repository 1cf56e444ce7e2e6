//! Push ingestion into the base layer.
//!
//! Adapters with a push channel (WebSocket, server-sent events) receive
//! items outside any store request.  A [`CacheWriter`] validates such items
//! against their type's schema, extracts the identity key and writes them
//! straight into the base layer.

use layerstore_cache::{LayerChange, LayerId, LayerStack};
use layerstore_kernel::{Item, ItemTypeRegistry};
use tracing::debug;

use crate::error::Result;

/// Handle for writing confirmed items into the base layer.
#[derive(Clone)]
pub struct CacheWriter {
    layers: LayerStack,
    registry: ItemTypeRegistry,
    validate: bool,
}

impl CacheWriter {
    /// `validate` toggles the inbound `item_schema` check.
    pub fn new(layers: LayerStack, registry: ItemTypeRegistry, validate: bool) -> Self {
        Self {
            layers,
            registry,
            validate,
        }
    }

    /// Write one item; returns its identity key.
    pub fn write(&self, type_name: &str, item: Item) -> Result<String> {
        let mut keys = self.write_many(type_name, vec![item])?;
        Ok(keys.remove(0))
    }

    /// Write several items of one type.
    ///
    /// Every item is validated and keyed first; if any fails nothing is
    /// written.
    pub fn write_many(&self, type_name: &str, items: Vec<Item>) -> Result<Vec<String>> {
        let item_type = self.registry.resolve(type_name)?;

        let mut keys = Vec::with_capacity(items.len());
        let mut changes = Vec::with_capacity(items.len());
        for item in items {
            if self.validate {
                item_type.validate_item(&item)?;
            }
            let key = item_type.key_of(&item)?;
            keys.push(key.clone());
            changes.push(LayerChange::write(type_name, key, item));
        }

        self.layers.apply_changes(&LayerId::base(), &changes)?;
        debug!(item_type = type_name, count = keys.len(), "items ingested into base layer");
        Ok(keys)
    }

    /// Tombstone an item in the base layer.
    pub fn remove(&self, type_name: &str, key: &str) -> Result<()> {
        self.registry.resolve(type_name)?;
        self.layers.delete_item(&LayerId::base(), type_name, key)?;
        debug!(item_type = type_name, key, "item removed from base layer");
        Ok(())
    }
}
