//! The layer stack.
//!
//! An ordered stack of [`Layer`]s: the base layer at the bottom, optimistic
//! overlays above it, the most recent on top.  All mutation goes through the
//! stack so the per-layer never-both invariant holds, and every mutation
//! publishes one [`CacheEvent::ItemChanged`] per key whose merged value it
//! changed.
//!
//! ```text
//!   top    ┌──────────────────────────┐
//!          │ optimistic-0192...  (new) │  <- scanned first
//!          ├──────────────────────────┤
//!          │ optimistic-0191...        │
//!          ├──────────────────────────┤
//!   bottom │ base                      │  <- never removed, never skipped
//!          └──────────────────────────┘
//! ```
//!
//! Layers are held as `Arc<Layer>` and copied on write, so list snapshots
//! can keep reading the layers they captured without holding the lock.
//! Each operation takes the lock once, so readers never observe a half
//! applied commit.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use layerstore_kernel::{CacheEvent, ChangeBus, Item};
use tracing::{debug, warn};

use crate::error::{CacheError, CacheResult};
use crate::layer::{Layer, LayerChange, LayerId};
use crate::snapshot::StoreSnapshot;
use crate::stats::CacheStats;
use crate::view::{ListSnapshot, Lookup, Predicate, lookup_in};

type ItemRef = (String, String);

/// Where a pushed layer lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayerPosition {
    /// Highest precedence.
    #[default]
    Top,
    /// Stack index counted from the bottom; clamped so the base stays at 0.
    At(usize),
}

struct StackInner {
    /// Bottom (base) to top.
    layers: Vec<Arc<Layer>>,
    /// Layer id -> index in `layers`.
    index: HashMap<LayerId, usize>,
}

impl StackInner {
    fn new() -> Self {
        let base = Layer::base();
        let mut index = HashMap::new();
        index.insert(base.id().clone(), 0);
        Self {
            layers: vec![Arc::new(base)],
            index,
        }
    }

    fn reindex_from(&mut self, from: usize) {
        for (position, layer) in self.layers.iter().enumerate().skip(from) {
            self.index.insert(layer.id().clone(), position);
        }
    }

    fn position(&self, id: &LayerId) -> CacheResult<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| CacheError::LayerNotFound { id: id.to_string() })
    }

    fn lookup(&self, type_name: &str, key: &str) -> Lookup {
        lookup_in(self.layers.iter().rev(), type_name, key)
    }

    fn merged(&self, refs: &BTreeSet<ItemRef>) -> Vec<Lookup> {
        refs.iter().map(|(t, k)| self.lookup(t, k)).collect()
    }

    /// Keys whose merged outcome differs from `before`.
    fn changed(&self, refs: &BTreeSet<ItemRef>, before: &[Lookup]) -> Vec<CacheEvent> {
        refs.iter()
            .zip(before)
            .filter(|((t, k), old)| self.lookup(t, k).item() != old.item())
            .map(|((t, k), _)| CacheEvent::item_changed(t.as_str(), k.as_str()))
            .collect()
    }
}

/// Ordered stack of cache layers with a single merged read view.
///
/// The stack is cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Clone)]
pub struct LayerStack {
    inner: Arc<RwLock<StackInner>>,
    changes: ChangeBus,
    stats: Arc<CacheStats>,
}

impl LayerStack {
    /// Create a stack holding only an empty base layer.
    pub fn new(changes: ChangeBus) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StackInner::new())),
            changes,
            stats: Arc::new(CacheStats::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StackInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StackInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, events: Vec<CacheEvent>) {
        for event in events {
            self.changes.publish(event);
        }
    }

    // -- Layer management ---------------------------------------------------

    /// Push a layer (top of the stack by default).
    pub fn push_layer(&self, layer: Layer, position: LayerPosition) -> CacheResult<()> {
        let id = layer.id().clone();
        let mut events = {
            let mut inner = self.write();
            if inner.index.contains_key(&id) {
                return Err(CacheError::DuplicateLayer { id: id.to_string() });
            }

            let refs = if layer.is_skipped() {
                BTreeSet::new()
            } else {
                layer.touched()
            };
            let before = inner.merged(&refs);

            let len = inner.layers.len();
            let position = match position {
                LayerPosition::Top => len,
                LayerPosition::At(i) => i.clamp(1, len),
            };
            inner.layers.insert(position, Arc::new(layer));
            inner.reindex_from(position);

            debug!(layer = %id, position, depth = inner.layers.len(), "layer pushed");
            inner.changed(&refs, &before)
        };
        events.insert(
            0,
            CacheEvent::LayerAdded {
                layer_id: id.to_string(),
            },
        );
        self.publish(events);
        Ok(())
    }

    /// Remove a layer.  Returns `false` if no such layer exists; the base
    /// layer is never removed.
    pub fn remove_layer(&self, id: &LayerId) -> bool {
        if id.is_base() {
            warn!("refusing to remove the base layer");
            return false;
        }

        let mut events = {
            let mut inner = self.write();
            let Ok(position) = inner.position(id) else {
                return false;
            };

            let layer = Arc::clone(&inner.layers[position]);
            let refs = if layer.is_skipped() {
                BTreeSet::new()
            } else {
                layer.touched()
            };
            let before = inner.merged(&refs);

            inner.layers.remove(position);
            inner.index.remove(id);
            inner.reindex_from(position);

            debug!(layer = %id, depth = inner.layers.len(), "layer removed");
            inner.changed(&refs, &before)
        };
        events.insert(
            0,
            CacheEvent::LayerRemoved {
                layer_id: id.to_string(),
            },
        );
        self.publish(events);
        true
    }

    /// Discard an optimistic layer without touching the base layer.
    pub fn rollback_layer(&self, id: &LayerId) -> bool {
        let removed = self.remove_layer(id);
        if removed {
            self.stats.record_rollback();
            warn!(layer = %id, "optimistic layer rolled back");
        }
        removed
    }

    /// Merge a layer into the base layer and remove it, in one step.
    ///
    /// `confirmed` changes (typically the adapter's authoritative result)
    /// are applied to the base layer after the layer's own content.
    pub fn commit_layer(&self, id: &LayerId, confirmed: &[LayerChange]) -> CacheResult<()> {
        if id.is_base() {
            return Err(CacheError::BaseLayerImmutable {
                operation: "committed",
            });
        }

        let mut events = {
            let mut inner = self.write();
            let position = inner.position(id)?;
            let layer = Arc::clone(&inner.layers[position]);

            let mut refs = layer.touched();
            refs.extend(
                confirmed
                    .iter()
                    .map(|c| (c.type_name().to_string(), c.key().to_string())),
            );
            let before = inner.merged(&refs);

            inner.layers.remove(position);
            inner.index.remove(id);
            inner.reindex_from(position);

            let base = Arc::make_mut(&mut inner.layers[0]);
            for change in layer.changes().iter().chain(confirmed) {
                base.apply(change);
            }

            debug!(
                layer = %id,
                merged = refs.len(),
                depth = inner.layers.len(),
                "layer committed into base"
            );
            inner.changed(&refs, &before)
        };
        self.stats.record_commit();
        events.insert(
            0,
            CacheEvent::LayerRemoved {
                layer_id: id.to_string(),
            },
        );
        self.publish(events);
        Ok(())
    }

    /// Include or exclude a layer from merged reads without dropping it.
    pub fn set_skip(&self, id: &LayerId, skip: bool) -> CacheResult<()> {
        if id.is_base() {
            return Err(CacheError::BaseLayerImmutable { operation: "skipped" });
        }

        let events = {
            let mut inner = self.write();
            let position = inner.position(id)?;
            if inner.layers[position].is_skipped() == skip {
                return Ok(());
            }

            let refs = inner.layers[position].touched();
            let before = inner.merged(&refs);
            Arc::make_mut(&mut inner.layers[position]).set_skip(skip);

            debug!(layer = %id, skip, "layer skip toggled");
            inner.changed(&refs, &before)
        };
        self.publish(events);
        Ok(())
    }

    // -- Item writes --------------------------------------------------------

    /// Insert or overwrite an item in one layer.
    pub fn write_item(&self, layer_id: &LayerId, type_name: &str, key: &str, item: Item) -> CacheResult<()> {
        self.apply_changes(layer_id, &[LayerChange::write(type_name, key, item)])
    }

    /// Write several items of one type in a single step.
    pub fn write_items(
        &self,
        layer_id: &LayerId,
        type_name: &str,
        items: Vec<(String, Item)>,
    ) -> CacheResult<()> {
        let changes: Vec<LayerChange> = items
            .into_iter()
            .map(|(key, item)| LayerChange::Write {
                type_name: type_name.to_string(),
                key,
                item,
            })
            .collect();
        self.apply_changes(layer_id, &changes)
    }

    /// Tombstone an item in one layer.
    pub fn delete_item(&self, layer_id: &LayerId, type_name: &str, key: &str) -> CacheResult<()> {
        self.apply_changes(layer_id, &[LayerChange::delete(type_name, key)])
    }

    /// Apply a batch of writes and deletes to one layer.
    pub fn apply_changes(&self, layer_id: &LayerId, changes: &[LayerChange]) -> CacheResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let events = {
            let mut inner = self.write();
            let position = inner.position(layer_id)?;

            let refs: BTreeSet<ItemRef> = changes
                .iter()
                .map(|c| (c.type_name().to_string(), c.key().to_string()))
                .collect();
            let before = inner.merged(&refs);

            let layer = Arc::make_mut(&mut inner.layers[position]);
            for change in changes {
                layer.apply(change);
            }

            debug!(layer = %layer_id, changes = changes.len(), "layer written");
            inner.changed(&refs, &before)
        };
        self.publish(events);
        Ok(())
    }

    // -- Reads --------------------------------------------------------------

    /// Merged read: the item, a tombstone, or nothing known.
    pub fn lookup(&self, type_name: &str, key: &str) -> Lookup {
        let lookup = self.read().lookup(type_name, key);
        if lookup.is_known() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }
        lookup
    }

    /// Merged read of one item.
    pub fn get(&self, type_name: &str, key: &str) -> Option<Item> {
        self.lookup(type_name, key).into_item()
    }

    /// Merged items of one type as of now, optionally filtered.
    pub fn list(&self, type_name: &str, predicate: Option<Predicate>) -> ListSnapshot {
        let layers: Vec<Arc<Layer>> = self
            .read()
            .layers
            .iter()
            .rev()
            .filter(|layer| !layer.is_skipped())
            .cloned()
            .collect();
        ListSnapshot::new(type_name, layers, predicate)
    }

    // -- Bulk ---------------------------------------------------------------

    /// Seed the base layer from a snapshot.
    pub fn seed(&self, snapshot: &StoreSnapshot) -> CacheResult<()> {
        snapshot.validate()?;
        let writes = snapshot.state.iter().flat_map(|(t, items)| {
            items
                .iter()
                .map(move |(k, item)| LayerChange::write(t.as_str(), k.as_str(), item.clone()))
        });
        let deletes = snapshot.deleted_items.iter().flat_map(|(t, keys)| {
            keys.iter()
                .map(move |k| LayerChange::delete(t.as_str(), k.as_str()))
        });
        let changes: Vec<LayerChange> = writes.chain(deletes).collect();
        debug!(changes = changes.len(), "seeding base layer");
        self.apply_changes(&LayerId::base(), &changes)
    }

    /// Export the base layer in snapshot form.
    pub fn export_base(&self) -> StoreSnapshot {
        let inner = self.read();
        let base = &inner.layers[0];
        StoreSnapshot {
            state: base.state().clone(),
            deleted_items: base.deleted().clone(),
        }
    }

    /// Drop every overlay and empty the base layer.
    pub fn clear(&self) {
        let removed: Vec<LayerId> = {
            let mut inner = self.write();
            let removed = inner.layers.iter().skip(1).map(|l| l.id().clone()).collect();
            *inner = StackInner::new();
            removed
        };
        debug!(overlays = removed.len(), "layer stack cleared");

        let mut events: Vec<CacheEvent> = removed
            .into_iter()
            .map(|id| CacheEvent::LayerRemoved {
                layer_id: id.to_string(),
            })
            .collect();
        events.push(CacheEvent::Cleared { type_name: None });
        self.publish(events);
    }

    /// Forget everything every layer knows about one type.
    pub fn clear_type(&self, type_name: &str) {
        {
            let mut inner = self.write();
            for layer in inner.layers.iter_mut() {
                let mentions = layer.state().contains_key(type_name)
                    || layer.deleted().contains_key(type_name);
                if mentions {
                    Arc::make_mut(layer).clear_type(type_name);
                }
            }
        }
        debug!(item_type = type_name, "item type cleared from cache");
        self.publish(vec![CacheEvent::Cleared {
            type_name: Some(type_name.to_string()),
        }]);
    }

    // -- Inspection ---------------------------------------------------------

    /// A read-only snapshot of one layer.
    pub fn layer(&self, id: &LayerId) -> Option<Arc<Layer>> {
        let inner = self.read();
        let position = inner.position(id).ok()?;
        Some(Arc::clone(&inner.layers[position]))
    }

    /// Layer ids, bottom (base) to top.
    pub fn layer_ids(&self) -> Vec<LayerId> {
        self.read().layers.iter().map(|l| l.id().clone()).collect()
    }

    pub fn contains(&self, id: &LayerId) -> bool {
        self.read().index.contains_key(id)
    }

    /// Number of layers, base included.
    pub fn len(&self) -> usize {
        self.read().layers.len()
    }

    /// Always `false`: the base layer is always present.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// `true` when every layer keeps the never-both invariant, the base is
    /// at the bottom, and it is the only non-optimistic layer.
    pub fn invariants_hold(&self) -> bool {
        let inner = self.read();
        let base_ok = inner.layers.first().is_some_and(|l| l.id().is_base() && !l.is_optimistic());
        let overlays_ok = inner.layers.iter().skip(1).all(|l| l.is_optimistic());
        let index_ok = inner.index.len() == inner.layers.len()
            && inner
                .layers
                .iter()
                .enumerate()
                .all(|(i, l)| inner.index.get(l.id()) == Some(&i));
        base_ok && overlays_ok && index_ok && inner.layers.iter().all(|l| l.invariant_holds())
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn changes(&self) -> &ChangeBus {
        &self.changes
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stack() -> LayerStack {
        LayerStack::new(ChangeBus::new(64))
    }

    fn base() -> LayerId {
        LayerId::base()
    }

    #[test]
    fn base_layer_is_always_present() {
        let stack = stack();
        assert_eq!(stack.layer_ids(), vec![base()]);
        assert!(!stack.remove_layer(&base()));
        assert!(matches!(
            stack.set_skip(&base(), true),
            Err(CacheError::BaseLayerImmutable { .. })
        ));
        assert!(stack.invariants_hold());
    }

    #[test]
    fn overlay_takes_precedence_and_removal_restores() {
        let stack = stack();
        stack.write_item(&base(), "Todo", "A", json!({"v": 1})).unwrap();

        let overlay = Layer::optimistic("opt").with_item("Todo", "A", json!({"v": 2}));
        stack.push_layer(overlay, LayerPosition::Top).unwrap();
        assert_eq!(stack.get("Todo", "A"), Some(json!({"v": 2})));

        assert!(stack.remove_layer(&"opt".into()));
        assert_eq!(stack.get("Todo", "A"), Some(json!({"v": 1})));
        assert!(!stack.remove_layer(&"opt".into()));
    }

    #[test]
    fn deletion_in_overlay_hides_base() {
        let stack = stack();
        stack.write_item(&base(), "Todo", "A", json!({"v": 1})).unwrap();
        stack
            .push_layer(Layer::optimistic("del").with_deleted("Todo", "A"), LayerPosition::Top)
            .unwrap();

        assert_eq!(stack.lookup("Todo", "A"), Lookup::Deleted);
        assert_eq!(stack.list("Todo", None).count(), 0);

        stack.remove_layer(&"del".into());
        assert_eq!(stack.get("Todo", "A"), Some(json!({"v": 1})));
    }

    #[test]
    fn skipped_layer_is_invisible_until_resumed() {
        let stack = stack();
        stack.write_item(&base(), "Todo", "A", json!({"v": 1})).unwrap();
        stack
            .push_layer(
                Layer::optimistic("paused")
                    .with_item("Todo", "A", json!({"v": 9}))
                    .with_skip(true),
                LayerPosition::Top,
            )
            .unwrap();
        assert_eq!(stack.get("Todo", "A"), Some(json!({"v": 1})));

        stack.set_skip(&"paused".into(), false).unwrap();
        assert_eq!(stack.get("Todo", "A"), Some(json!({"v": 9})));

        stack.set_skip(&"paused".into(), true).unwrap();
        assert_eq!(stack.get("Todo", "A"), Some(json!({"v": 1})));
    }

    #[test]
    fn push_at_position_never_goes_below_base() {
        let stack = stack();
        stack.push_layer(Layer::optimistic("top"), LayerPosition::Top).unwrap();
        stack.push_layer(Layer::optimistic("low"), LayerPosition::At(0)).unwrap();
        assert_eq!(
            stack.layer_ids(),
            vec![base(), LayerId::new("low"), LayerId::new("top")]
        );
        assert!(stack.invariants_hold());
    }

    #[test]
    fn lower_overlay_is_shadowed_by_higher() {
        let stack = stack();
        stack
            .push_layer(Layer::optimistic("high").with_item("Todo", "A", json!(2)), LayerPosition::Top)
            .unwrap();
        stack
            .push_layer(Layer::optimistic("low").with_deleted("Todo", "A"), LayerPosition::At(1))
            .unwrap();
        assert_eq!(stack.get("Todo", "A"), Some(json!(2)));
    }

    #[test]
    fn duplicate_layer_is_rejected() {
        let stack = stack();
        stack.push_layer(Layer::optimistic("x"), LayerPosition::Top).unwrap();
        assert!(matches!(
            stack.push_layer(Layer::optimistic("x"), LayerPosition::Top),
            Err(CacheError::DuplicateLayer { .. })
        ));
        assert!(matches!(
            stack.push_layer(Layer::optimistic("base"), LayerPosition::Top),
            Err(CacheError::DuplicateLayer { .. })
        ));
    }

    #[test]
    fn writes_to_unknown_layer_fail() {
        let stack = stack();
        let err = stack
            .write_item(&"ghost".into(), "Todo", "A", json!({}))
            .unwrap_err();
        assert!(matches!(err, CacheError::LayerNotFound { id } if id == "ghost"));
    }

    #[test]
    fn commit_merges_into_base_atomically() {
        let stack = stack();
        stack.write_item(&base(), "Todo", "A", json!({"v": 1})).unwrap();
        stack
            .push_layer(
                Layer::optimistic("opt")
                    .with_item("Todo", "A", json!({"v": 2}))
                    .with_deleted("Todo", "B"),
                LayerPosition::Top,
            )
            .unwrap();

        stack
            .commit_layer(
                &"opt".into(),
                &[LayerChange::write("Todo", "A", json!({"v": 2, "server": true}))],
            )
            .unwrap();

        assert_eq!(stack.layer_ids(), vec![base()]);
        assert_eq!(stack.get("Todo", "A"), Some(json!({"v": 2, "server": true})));
        assert_eq!(stack.lookup("Todo", "B"), Lookup::Deleted);
        assert_eq!(stack.stats().commits(), 1);
        assert!(stack.invariants_hold());
    }

    #[test]
    fn rollback_leaves_base_untouched() {
        let stack = stack();
        stack.write_item(&base(), "Todo", "A", json!({"v": 1})).unwrap();
        stack
            .push_layer(Layer::optimistic("opt").with_item("Todo", "A", json!({"v": 2})), LayerPosition::Top)
            .unwrap();

        assert!(stack.rollback_layer(&"opt".into()));
        assert_eq!(stack.get("Todo", "A"), Some(json!({"v": 1})));
        assert_eq!(stack.stats().rollbacks(), 1);
        assert!(!stack.contains(&"opt".into()));
    }

    #[test]
    fn list_is_a_snapshot() {
        let stack = stack();
        stack.write_item(&base(), "Todo", "1", json!({"id": "1", "done": true})).unwrap();
        stack.write_item(&base(), "Todo", "2", json!({"id": "2", "done": false})).unwrap();
        stack
            .push_layer(Layer::optimistic("opt").with_item("Todo", "3", json!({"id": "3", "done": true})), LayerPosition::Top)
            .unwrap();

        let mut snapshot = stack.list("Todo", Some(Box::new(|item: &Item| item["done"] == json!(true))));

        // Mutations after the call do not leak into the snapshot.
        stack.delete_item(&base(), "Todo", "1").unwrap();
        stack.remove_layer(&"opt".into());
        stack.write_item(&base(), "Todo", "4", json!({"id": "4", "done": true})).unwrap();

        assert_eq!(snapshot.next(), Some(json!({"id": "1", "done": true})));
        assert_eq!(snapshot.next(), Some(json!({"id": "3", "done": true})));
        assert_eq!(snapshot.next(), None);

        let now: Vec<_> = stack.list("Todo", None).collect();
        assert_eq!(now.len(), 2);
    }

    #[test]
    fn lookup_stats() {
        let stack = stack();
        stack.write_item(&base(), "Todo", "1", json!({})).unwrap();
        stack.delete_item(&base(), "Todo", "2").unwrap();

        assert!(stack.lookup("Todo", "1").is_known());
        assert!(stack.lookup("Todo", "2").is_known());
        assert!(!stack.lookup("Todo", "3").is_known());
        assert_eq!(stack.stats().hits(), 2);
        assert_eq!(stack.stats().misses(), 1);
    }

    #[test]
    fn seed_and_export_round_trip() {
        let stack = stack();
        let snapshot = StoreSnapshot::new()
            .with_item("Todo", "1", json!({"id": "1"}))
            .with_deleted("Todo", "2");
        stack.seed(&snapshot).unwrap();

        assert_eq!(stack.get("Todo", "1"), Some(json!({"id": "1"})));
        assert_eq!(stack.lookup("Todo", "2"), Lookup::Deleted);
        assert_eq!(stack.export_base(), snapshot);
    }

    #[test]
    fn clear_and_clear_type() {
        let stack = stack();
        stack.write_item(&base(), "Todo", "1", json!({})).unwrap();
        stack.write_item(&base(), "Note", "1", json!({})).unwrap();
        stack
            .push_layer(Layer::optimistic("opt").with_item("Todo", "2", json!({})), LayerPosition::Top)
            .unwrap();

        stack.clear_type("Todo");
        assert_eq!(stack.get("Todo", "1"), None);
        assert_eq!(stack.get("Todo", "2"), None);
        assert!(stack.get("Note", "1").is_some());
        assert_eq!(stack.len(), 2);

        stack.clear();
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.get("Note", "1"), None);
        assert!(stack.invariants_hold());
    }

    #[tokio::test]
    async fn events_only_for_visible_changes() {
        let bus = ChangeBus::new(64);
        let stack = LayerStack::new(bus.clone());
        let mut rx = bus.subscribe();

        stack.write_item(&base(), "Todo", "A", json!(1)).unwrap();
        // Same value again: no change in the merged view.
        stack.write_item(&base(), "Todo", "A", json!(1)).unwrap();
        // Hidden behind a skipped layer: no item event.
        stack
            .push_layer(
                Layer::optimistic("paused").with_item("Todo", "A", json!(9)).with_skip(true),
                LayerPosition::Top,
            )
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert!(first.affects("Todo", "A"));
        let second = rx.recv().await.unwrap();
        assert_eq!(
            *second,
            CacheEvent::LayerAdded {
                layer_id: "paused".into()
            }
        );
        assert!(rx.try_recv().is_err());

        stack.set_skip(&"paused".into(), false).unwrap();
        let third = rx.recv().await.unwrap();
        assert!(third.affects("Todo", "A"));
    }
}
