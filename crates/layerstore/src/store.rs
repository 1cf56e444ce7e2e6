//! The store facade.
//!
//! A [`Store`] ties together one item type registry, one hook bus, one
//! layer stack and the installed adapters.  Reads go through the request
//! coordinator so identical concurrent fetches share one backend call;
//! writes go through the optimistic mutation lifecycle in
//! [`crate::optimistic`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use layerstore_adapters::{
    Adapter, AdapterError, AdapterHost, AfterFetchHook, CacheWriter, ClaimTable, DEFAULT_SCOPE,
    FetchItemHook, FetchItemRequest, FetchListHook, FetchListRequest, FetchedItems, Query, Verb,
};
use layerstore_cache::{CacheStats, LayerStack, Lookup, StoreSnapshot};
use layerstore_kernel::{
    CacheEvent, ChangeBus, Claim, HookBus, Item, ItemKind, ItemType, ItemTypeHandle,
    ItemTypeRegistry, ItemWatcher,
};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{FetchPolicy, StoreConfig};
use crate::coordinator::{FetchState, RequestCoordinator};
use crate::error::{Result, StoreError, expect_claim};
use crate::optimistic::{self, MutationOptions};
use crate::query::Fingerprint;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub(crate) struct StoreInner {
    pub(crate) config: StoreConfig,
    pub(crate) registry: ItemTypeRegistry,
    pub(crate) hooks: HookBus,
    pub(crate) layers: LayerStack,
    pub(crate) changes: ChangeBus,
    pub(crate) writer: CacheWriter,
    claims: ClaimTable,
    adapters: Vec<String>,
    items: RequestCoordinator<Item>,
    lists: RequestCoordinator<Vec<Item>>,
    /// List fingerprints fetched at least once since the last clear.
    query_log: Mutex<HashSet<Fingerprint>>,
}

impl StoreInner {
    fn query_log(&self) -> MutexGuard<'_, HashSet<Fingerprint>> {
        self.query_log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The adapter that claimed `verb` for this type, for error reports.
    pub(crate) fn owner_of(&self, verb: Verb, item_type: &ItemType) -> String {
        let scope = item_type.scope_id().unwrap_or(DEFAULT_SCOPE);
        self.claims
            .owner(scope, verb, item_type.name())
            .unwrap_or("unknown")
            .to_string()
    }

    async fn after_fetch(&self, item_type: &ItemTypeHandle, items: Vec<Item>) -> Result<Vec<Item>> {
        let fetched = self
            .hooks
            .call_transform::<AfterFetchHook>(FetchedItems {
                item_type: Arc::clone(item_type),
                items,
            })
            .await?;
        Ok(fetched.items)
    }
}

async fn fetch_item_task(inner: Arc<StoreInner>, item_type: ItemTypeHandle, key: String) -> Result<Item> {
    let request = FetchItemRequest {
        item_type: Arc::clone(&item_type),
        key: key.clone(),
    };
    let claim = inner.hooks.call_claim::<FetchItemHook>(request).await?;
    let item = expect_claim(claim, Verb::FetchItem, item_type.name(), &key)?;

    let Some(item) = inner.after_fetch(&item_type, vec![item]).await?.pop() else {
        return Err(StoreError::not_found(item_type.name(), key));
    };
    let fetched_key = item_type.key_of(&item)?;
    if fetched_key != key {
        return Err(AdapterError::InvalidResponse {
            adapter_id: inner.owner_of(Verb::FetchItem, &item_type),
            reason: format!("asked for `{key}`, got `{fetched_key}`"),
        }
        .into());
    }

    inner.writer.write(item_type.name(), item.clone())?;
    debug!(item_type = item_type.name(), key = %key, "item fetched");
    Ok(item)
}

async fn fetch_list_task(
    inner: Arc<StoreInner>,
    item_type: ItemTypeHandle,
    query: Query,
    fingerprint: Fingerprint,
) -> Result<Vec<Item>> {
    let request = FetchListRequest {
        item_type: Arc::clone(&item_type),
        query,
    };
    let items = match inner.hooks.call_claim::<FetchListHook>(request).await? {
        Claim::NotFound => Vec::new(),
        claim => expect_claim(claim, Verb::FetchList, item_type.name(), fingerprint.as_str())?,
    };
    let items = inner.after_fetch(&item_type, items).await?;

    inner.writer.write_many(item_type.name(), items.clone())?;
    inner.query_log().insert(fingerprint.clone());
    inner
        .changes
        .publish(CacheEvent::query_settled(item_type.name(), fingerprint.as_str()));
    debug!(item_type = item_type.name(), %fingerprint, count = items.len(), "list fetched");
    Ok(items)
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// A typed client-side data store.
///
/// The store is cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    // -- Reads ----------------------------------------------------------------

    /// Read one item using the configured fetch policy.
    pub async fn get(&self, type_name: &str, key: &str) -> Result<Item> {
        self.get_with(type_name, key, self.inner.config.fetch_policy)
            .await
    }

    /// Read one item with an explicit fetch policy.
    pub async fn get_with(&self, type_name: &str, key: &str, policy: FetchPolicy) -> Result<Item> {
        let item_type = self.inner.registry.resolve(type_name)?;
        if policy == FetchPolicy::FetchOnly {
            return self.fetch_item(item_type, key).await;
        }

        match self.inner.layers.lookup(type_name, key) {
            Lookup::Present(item) => {
                if policy == FetchPolicy::CacheAndFetch {
                    self.refresh_item(item_type, key.to_string());
                }
                Ok(item)
            }
            Lookup::Deleted => Err(StoreError::not_found(type_name, key)),
            Lookup::Unknown if policy == FetchPolicy::CacheOnly => {
                Err(StoreError::not_found(type_name, key))
            }
            Lookup::Unknown => self.fetch_item(item_type, key).await,
        }
    }

    /// Read one item and decode it.
    pub async fn get_as<T: DeserializeOwned>(&self, type_name: &str, key: &str) -> Result<T> {
        let item = self.get(type_name, key).await?;
        serde_json::from_value(item).map_err(|e| StoreError::Decode {
            type_name: type_name.to_string(),
            reason: e.to_string(),
        })
    }

    /// The cached item, without ever fetching.
    pub fn peek(&self, type_name: &str, key: &str) -> Option<Item> {
        self.inner.layers.get(type_name, key)
    }

    /// Run a list query using the configured fetch policy.
    pub async fn list(&self, type_name: &str, query: Query) -> Result<Vec<Item>> {
        self.list_with(type_name, query, self.inner.config.fetch_policy)
            .await
    }

    /// Run a list query with an explicit fetch policy.
    ///
    /// Under the cache-first policies a query that has been fetched before
    /// is answered from the cache, filtered locally.
    pub async fn list_with(&self, type_name: &str, query: Query, policy: FetchPolicy) -> Result<Vec<Item>> {
        let item_type = self.inner.registry.resolve(type_name)?;
        if item_type.kind() == ItemKind::Model {
            return Err(StoreError::Unsupported {
                verb: Verb::FetchList,
                type_name: type_name.to_string(),
                reason: "models have no list queries".to_string(),
            });
        }

        let fingerprint = Fingerprint::list(type_name, &query);
        match policy {
            FetchPolicy::CacheOnly => self.list_cached(type_name, &query),
            FetchPolicy::FetchOnly => self.fetch_list(item_type, query, fingerprint).await,
            FetchPolicy::CacheFirst | FetchPolicy::CacheAndFetch => {
                let logged = self.inner.query_log().contains(&fingerprint);
                if !logged {
                    return self.fetch_list(item_type, query, fingerprint).await;
                }
                let cached = self.list_cached(type_name, &query)?;
                if policy == FetchPolicy::CacheAndFetch {
                    self.refresh_list(item_type, query, fingerprint);
                }
                Ok(cached)
            }
        }
    }

    /// Cached items of a type matching the query's filter.
    pub fn list_cached(&self, type_name: &str, query: &Query) -> Result<Vec<Item>> {
        self.inner.registry.resolve(type_name)?;
        let query = query.clone();
        let items = self
            .inner
            .layers
            .list(type_name, Some(Box::new(move |item: &Item| query.matches(item))))
            .collect();
        Ok(items)
    }

    async fn fetch_item(&self, item_type: ItemTypeHandle, key: &str) -> Result<Item> {
        let fingerprint = Fingerprint::item(item_type.name(), key);
        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        self.inner
            .items
            .run(fingerprint, self.inner.config.dedupe, move || {
                fetch_item_task(inner, item_type, key)
            })
            .await
    }

    async fn fetch_list(
        &self,
        item_type: ItemTypeHandle,
        query: Query,
        fingerprint: Fingerprint,
    ) -> Result<Vec<Item>> {
        let inner = Arc::clone(&self.inner);
        let task_fingerprint = fingerprint.clone();
        self.inner
            .lists
            .run(fingerprint, self.inner.config.dedupe, move || {
                fetch_list_task(inner, item_type, query, task_fingerprint)
            })
            .await
    }

    fn refresh_item(&self, item_type: ItemTypeHandle, key: String) {
        let store = self.clone();
        tokio::spawn(async move {
            if let Err(e) = store.fetch_item(item_type, &key).await {
                warn!(key = %key, error = %e, "background item refresh failed");
            }
        });
    }

    fn refresh_list(&self, item_type: ItemTypeHandle, query: Query, fingerprint: Fingerprint) {
        let store = self.clone();
        tokio::spawn(async move {
            if let Err(e) = store.fetch_list(item_type, query, fingerprint).await {
                warn!(error = %e, "background list refresh failed");
            }
        });
    }

    // -- Mutations ------------------------------------------------------------

    /// Create an item with the default mutation options.
    pub async fn create(&self, type_name: &str, item: Item) -> Result<Item> {
        self.create_with(type_name, item, MutationOptions::default())
            .await
    }

    pub async fn create_with(&self, type_name: &str, item: Item, options: MutationOptions) -> Result<Item> {
        optimistic::create(&self.inner, type_name, item, options).await
    }

    /// Shallow-merge `patch` over an item.
    pub async fn update(&self, type_name: &str, key: &str, patch: Item) -> Result<Item> {
        self.update_with(type_name, key, patch, MutationOptions::default())
            .await
    }

    pub async fn update_with(
        &self,
        type_name: &str,
        key: &str,
        patch: Item,
        options: MutationOptions,
    ) -> Result<Item> {
        optimistic::update(&self.inner, type_name, key, patch, options).await
    }

    pub async fn delete(&self, type_name: &str, key: &str) -> Result<()> {
        self.delete_with(type_name, key, MutationOptions::default())
            .await
    }

    pub async fn delete_with(&self, type_name: &str, key: &str, options: MutationOptions) -> Result<()> {
        optimistic::delete(&self.inner, type_name, key, options).await
    }

    // -- Observation ----------------------------------------------------------

    /// Every cache change event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<CacheEvent>> {
        self.inner.changes.subscribe()
    }

    /// Changes to one item.
    pub fn watch_item(&self, type_name: &str, key: &str) -> ItemWatcher {
        self.inner.changes.watch_item(type_name, key)
    }

    // -- Cache management -----------------------------------------------------

    /// The layer stack, for custom overlays.
    pub fn layers(&self) -> &LayerStack {
        &self.inner.layers
    }

    /// Ingest pushed items outside any request.
    pub fn cache_writer(&self) -> &CacheWriter {
        &self.inner.writer
    }

    /// Drop every cached item, overlay and remembered query.
    pub fn clear(&self) {
        self.inner.layers.clear();
        self.inner.query_log().clear();
        info!("store cache cleared");
    }

    /// Forget one item type in every layer.
    pub fn clear_type(&self, type_name: &str) {
        self.inner.layers.clear_type(type_name);
        self.inner
            .query_log()
            .retain(|fingerprint| fingerprint.type_name() != type_name);
    }

    /// The base layer in serializable form.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.layers.export_base()
    }

    // -- Inspection -----------------------------------------------------------

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ItemTypeRegistry {
        &self.inner.registry
    }

    pub fn hooks(&self) -> &HookBus {
        &self.inner.hooks
    }

    pub fn claims(&self) -> &ClaimTable {
        &self.inner.claims
    }

    pub fn adapter_ids(&self) -> &[String] {
        &self.inner.adapters
    }

    pub fn stats(&self) -> &CacheStats {
        self.inner.layers.stats()
    }

    /// Fetch lifecycle state of a fingerprint.
    pub fn fetch_state(&self, fingerprint: &Fingerprint) -> FetchState {
        match self.inner.items.state(fingerprint) {
            FetchState::Idle => self.inner.lists.state(fingerprint),
            state => state,
        }
    }

    /// Fetches currently in flight.
    pub fn pending_fetches(&self) -> usize {
        self.inner.items.in_flight() + self.inner.lists.in_flight()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a [`Store`].
///
/// Configuration errors (duplicate item types, adapter conflicts, a seed
/// naming an unknown type) all surface from [`StoreBuilder::build`].
#[derive(Default)]
pub struct StoreBuilder {
    config: StoreConfig,
    types: Vec<ItemType>,
    adapters: Vec<Arc<dyn Adapter>>,
    seed: Option<StoreSnapshot>,
}

impl StoreBuilder {
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn item_type(mut self, item_type: impl Into<ItemType>) -> Self {
        self.types.push(item_type.into());
        self
    }

    pub fn adapter(self, adapter: impl Adapter) -> Self {
        self.shared_adapter(Arc::new(adapter))
    }

    /// Install an adapter the caller keeps a handle to.
    pub fn shared_adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Initial base layer content.
    pub fn seed(mut self, snapshot: StoreSnapshot) -> Self {
        self.seed = Some(snapshot);
        self
    }

    pub fn build(self) -> Result<Store> {
        self.config.validate()?;

        let registry = ItemTypeRegistry::new();
        for item_type in self.types {
            registry.register(item_type)?;
        }

        let changes = ChangeBus::new(self.config.change_capacity);
        let layers = LayerStack::new(changes.clone());
        let hooks = HookBus::new();
        let writer = CacheWriter::new(layers.clone(), registry.clone(), self.config.validate_inbound);

        let mut host = AdapterHost::new(hooks.clone(), registry.clone(), writer.clone())?;
        for adapter in self.adapters {
            host.install(adapter)?;
        }

        if let Some(seed) = &self.seed {
            for type_name in seed.state.keys().chain(seed.deleted_items.keys()) {
                registry.resolve(type_name)?;
            }
            layers.seed(seed)?;
        }

        let adapters: Vec<String> = host.adapter_ids().into_iter().map(String::from).collect();
        info!(
            item_types = registry.len(),
            adapters = adapters.len(),
            claims = host.claims().len(),
            "store built"
        );

        Ok(Store {
            inner: Arc::new(StoreInner {
                config: self.config,
                registry,
                hooks,
                layers,
                changes,
                writer,
                claims: host.claims().clone(),
                adapters,
                items: RequestCoordinator::new(),
                lists: RequestCoordinator::new(),
                query_log: Mutex::new(HashSet::new()),
            }),
        })
    }
}
