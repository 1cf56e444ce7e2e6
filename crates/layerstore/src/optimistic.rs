//! Optimistic mutation lifecycle.
//!
//! Every create, update and delete runs the same steps:
//!
//! 1. apply defaults (create) and run the create/update schema;
//! 2. pass the draft through the `beforeMutation` transform hook;
//! 3. stage the speculative result in a fresh optimistic layer, when
//!    optimistic writes are on and the identity key is known;
//! 4. dispatch to the claiming adapter;
//! 5. pass the confirmed result through `afterMutation`;
//! 6. commit: merge the layer and the confirmed result into the base layer
//!    in one step, or write the result to the base layer directly.
//!
//! Any failure after step 3 rolls the layer back.  The rollback lives in
//! [`StagedLayer`]'s `Drop`, so a caller dropping the mutation future also
//! restores the pre-mutation view.

use std::sync::Arc;

use layerstore_adapters::{
    AdapterError, AfterMutationHook, BeforeMutationHook, CreateItemHook, CreateItemRequest,
    DeleteItemHook, DeleteItemRequest, MutationDraft, MutationOutcome, UpdateItemHook,
    UpdateItemRequest, Verb, shallow_merge,
};
use layerstore_cache::{CacheError, Layer, LayerChange, LayerId, LayerPosition, LayerStack};
use layerstore_kernel::{Item, ItemTypeHandle};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, StoreError, expect_claim};
use crate::store::StoreInner;

/// Per-call mutation settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationOptions {
    /// Stage the mutation in an optimistic layer.  `None` uses the store's
    /// configured default.
    pub optimistic: Option<bool>,
}

impl MutationOptions {
    /// Stage the mutation regardless of the store default.
    pub fn optimistic() -> Self {
        Self {
            optimistic: Some(true),
        }
    }

    /// Only touch the cache once the adapter confirms.
    pub fn confirmed() -> Self {
        Self {
            optimistic: Some(false),
        }
    }

    fn is_optimistic(self, default: bool) -> bool {
        self.optimistic.unwrap_or(default)
    }
}

// ---------------------------------------------------------------------------
// Staging
// ---------------------------------------------------------------------------

/// An optimistic layer that is rolled back unless committed.
pub(crate) struct StagedLayer {
    layers: LayerStack,
    id: Option<LayerId>,
}

impl StagedLayer {
    pub(crate) fn push(layers: &LayerStack, layer: Layer) -> Result<Self> {
        let id = layer.id().clone();
        layers.push_layer(layer, LayerPosition::Top)?;
        debug!(layer = %id, "mutation staged");
        Ok(Self {
            layers: layers.clone(),
            id: Some(id),
        })
    }

    /// Merge the layer plus the confirmed changes into the base layer.
    pub(crate) fn commit(mut self, confirmed: &[LayerChange]) -> Result<()> {
        let Some(id) = self.id.take() else {
            return Ok(());
        };
        match self.layers.commit_layer(&id, confirmed) {
            Err(CacheError::LayerNotFound { .. }) => {
                warn!(layer = %id, "staged layer removed before commit, writing result to base");
                self.layers.apply_changes(&LayerId::base(), confirmed)?;
                Ok(())
            }
            other => Ok(other?),
        }
    }
}

impl Drop for StagedLayer {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.layers.rollback_layer(&id);
        }
    }
}

fn stage_if(inner: &StoreInner, enabled: bool, layer: impl FnOnce(LayerId) -> Layer) -> Result<Option<StagedLayer>> {
    if !enabled {
        return Ok(None);
    }
    StagedLayer::push(&inner.layers, layer(LayerId::generate())).map(Some)
}

fn settle(inner: &StoreInner, staged: Option<StagedLayer>, confirmed: LayerChange) -> Result<()> {
    let changes = [confirmed];
    match staged {
        Some(staged) => staged.commit(&changes),
        None => Ok(inner.layers.apply_changes(&LayerId::base(), &changes)?),
    }
}

// ---------------------------------------------------------------------------
// Hook plumbing
// ---------------------------------------------------------------------------

async fn before_mutation(
    inner: &StoreInner,
    verb: Verb,
    item_type: &ItemTypeHandle,
    key: Option<String>,
    item: Item,
) -> Result<MutationDraft> {
    Ok(inner
        .hooks
        .call_transform::<BeforeMutationHook>(MutationDraft {
            verb,
            item_type: Arc::clone(item_type),
            key,
            item,
        })
        .await?)
}

async fn after_mutation(
    inner: &StoreInner,
    verb: Verb,
    item_type: &ItemTypeHandle,
    key: String,
    item: Option<Item>,
) -> Result<Option<Item>> {
    let outcome = inner
        .hooks
        .call_transform::<AfterMutationHook>(MutationOutcome {
            verb,
            item_type: Arc::clone(item_type),
            key,
            item,
        })
        .await?;
    Ok(outcome.item)
}

fn invalid_response(inner: &StoreInner, verb: Verb, item_type: &ItemTypeHandle, reason: String) -> StoreError {
    AdapterError::InvalidResponse {
        adapter_id: inner.owner_of(verb, item_type),
        reason,
    }
    .into()
}

/// Check a confirmed item before it enters the base layer; returns its key.
fn confirm(
    inner: &StoreInner,
    verb: Verb,
    item_type: &ItemTypeHandle,
    expected_key: Option<&str>,
    item: &Item,
) -> Result<String> {
    if inner.config.validate_inbound {
        item_type.validate_item(item)?;
    }
    let key = item_type.key_of(item)?;
    match expected_key {
        Some(expected) if expected != key => Err(invalid_response(
            inner,
            verb,
            item_type,
            format!("{verb} for `{expected}` returned `{key}`"),
        )),
        _ => Ok(key),
    }
}

// ---------------------------------------------------------------------------
// Verbs
// ---------------------------------------------------------------------------

pub(crate) async fn create(
    inner: &StoreInner,
    type_name: &str,
    item: Item,
    options: MutationOptions,
) -> Result<Item> {
    let item_type = inner.registry.resolve(type_name)?;
    let item = item_type.apply_defaults(item);
    item_type.validate_create(&item)?;

    let key = item_type.key_of(&item).ok();
    let item = before_mutation(inner, Verb::Create, &item_type, key, item)
        .await?
        .item;
    // The hook may have set or changed the key.
    let key = item_type.key_of(&item).ok();

    let optimistic = options.is_optimistic(inner.config.optimistic) && key.is_some();
    let staged = stage_if(inner, optimistic, |id| {
        Layer::optimistic(id).with_item(type_name, key.as_deref().unwrap_or_default(), item.clone())
    })?;

    let request = CreateItemRequest {
        item_type: Arc::clone(&item_type),
        key: key.clone(),
        item,
    };
    let claim = inner.hooks.call_claim::<CreateItemHook>(request).await?;
    let created = expect_claim(claim, Verb::Create, type_name, key.as_deref().unwrap_or("<new>"))?;

    let created_key = item_type.key_of(&created)?;
    let Some(created) = after_mutation(inner, Verb::Create, &item_type, created_key, Some(created)).await?
    else {
        return Err(invalid_response(
            inner,
            Verb::Create,
            &item_type,
            "afterMutation dropped the created item".to_string(),
        ));
    };
    let key = confirm(inner, Verb::Create, &item_type, key.as_deref(), &created)?;

    settle(inner, staged, LayerChange::write(type_name, key.as_str(), created.clone()))?;
    debug!(item_type = type_name, key = %key, "item created");
    Ok(created)
}

pub(crate) async fn update(
    inner: &StoreInner,
    type_name: &str,
    key: &str,
    patch: Item,
    options: MutationOptions,
) -> Result<Item> {
    let item_type = inner.registry.resolve(type_name)?;
    item_type.validate_update(&patch)?;

    let patch = before_mutation(inner, Verb::Update, &item_type, Some(key.to_string()), patch)
        .await?
        .item;

    let current = inner.layers.get(type_name, key);
    let merged = match &current {
        Some(current) => shallow_merge(current, &patch),
        None => patch.clone(),
    };

    // Without a cached item the merge is only the patch; never stage that.
    let optimistic = options.is_optimistic(inner.config.optimistic) && current.is_some();
    let staged = stage_if(inner, optimistic, |id| {
        Layer::optimistic(id).with_item(type_name, key, merged.clone())
    })?;

    let request = UpdateItemRequest {
        item_type: Arc::clone(&item_type),
        key: key.to_string(),
        patch,
        item: merged,
    };
    let claim = inner.hooks.call_claim::<UpdateItemHook>(request).await?;
    let updated = expect_claim(claim, Verb::Update, type_name, key)?;

    let Some(updated) = after_mutation(inner, Verb::Update, &item_type, key.to_string(), Some(updated)).await?
    else {
        return Err(invalid_response(
            inner,
            Verb::Update,
            &item_type,
            "afterMutation dropped the updated item".to_string(),
        ));
    };
    confirm(inner, Verb::Update, &item_type, Some(key), &updated)?;

    settle(inner, staged, LayerChange::write(type_name, key, updated.clone()))?;
    debug!(item_type = type_name, key, "item updated");
    Ok(updated)
}

pub(crate) async fn delete(
    inner: &StoreInner,
    type_name: &str,
    key: &str,
    options: MutationOptions,
) -> Result<()> {
    let item_type = inner.registry.resolve(type_name)?;
    before_mutation(inner, Verb::Delete, &item_type, Some(key.to_string()), Value::Null).await?;

    let staged = stage_if(inner, options.is_optimistic(inner.config.optimistic), |id| {
        Layer::optimistic(id).with_deleted(type_name, key)
    })?;

    let request = DeleteItemRequest {
        item_type: Arc::clone(&item_type),
        key: key.to_string(),
    };
    let claim = inner.hooks.call_claim::<DeleteItemHook>(request).await?;
    expect_claim(claim, Verb::Delete, type_name, key)?;
    after_mutation(inner, Verb::Delete, &item_type, key.to_string(), None).await?;

    settle(inner, staged, LayerChange::delete(type_name, key))?;
    debug!(item_type = type_name, key, "item deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use layerstore_kernel::ChangeBus;
    use serde_json::json;

    #[test]
    fn options_fall_back_to_store_default() {
        assert!(MutationOptions::default().is_optimistic(true));
        assert!(!MutationOptions::default().is_optimistic(false));
        assert!(MutationOptions::optimistic().is_optimistic(false));
        assert!(!MutationOptions::confirmed().is_optimistic(true));
    }

    #[test]
    fn dropped_stage_rolls_back() {
        let layers = LayerStack::new(ChangeBus::new(8));
        layers
            .write_item(&LayerId::base(), "Todo", "1", json!({"v": 1}))
            .unwrap();
        {
            let _staged = StagedLayer::push(
                &layers,
                Layer::optimistic("pending").with_item("Todo", "1", json!({"v": 2})),
            )
            .unwrap();
            assert_eq!(layers.get("Todo", "1"), Some(json!({"v": 2})));
        }
        assert_eq!(layers.get("Todo", "1"), Some(json!({"v": 1})));
        assert_eq!(layers.len(), 1);
        assert_eq!(layers.stats().rollbacks(), 1);
    }

    #[test]
    fn committed_stage_is_not_rolled_back() {
        let layers = LayerStack::new(ChangeBus::new(8));
        let staged = StagedLayer::push(
            &layers,
            Layer::optimistic("pending").with_item("Todo", "1", json!({"v": 2})),
        )
        .unwrap();
        staged
            .commit(&[LayerChange::write("Todo", "1", json!({"v": 3}))])
            .unwrap();
        assert_eq!(layers.get("Todo", "1"), Some(json!({"v": 3})));
        assert_eq!(layers.stats().rollbacks(), 0);
    }

    #[test]
    fn commit_after_clear_writes_to_base() {
        let layers = LayerStack::new(ChangeBus::new(8));
        let staged = StagedLayer::push(&layers, Layer::optimistic("pending")).unwrap();
        layers.clear();
        staged
            .commit(&[LayerChange::write("Todo", "1", json!({"v": 3}))])
            .unwrap();
        assert_eq!(layers.get("Todo", "1"), Some(json!({"v": 3})));
    }
}
