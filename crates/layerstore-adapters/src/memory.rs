//! In-memory reference adapter.
//!
//! [`MemoryAdapter`] keeps rows in a process-local map and claims every verb
//! for the item types it is configured with.  It is the adapter tests and
//! demos use; it also shows the contract a real backend has to meet.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use layerstore_kernel::{Claim, Item, KernelError, KeyExtractor};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AdapterError, Result};
use crate::request::{
    CreateItemRequest, DeleteItemRequest, FetchItemRequest, FetchListRequest, TypedRequest,
    UpdateItemRequest, Verb, shallow_merge,
};
use crate::setup::SetupApi;
use crate::traits::Adapter;

type Rows = BTreeMap<String, BTreeMap<String, Item>>;

/// Process-local backend serving a fixed set of item types.
pub struct MemoryAdapter {
    id: String,
    types: Vec<String>,
    rows: Mutex<Rows>,
    calls: Mutex<HashMap<Verb, usize>>,
    latency: Option<Duration>,
    fail_next: Mutex<Option<AdapterError>>,
}

impl MemoryAdapter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            types: Vec::new(),
            rows: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(HashMap::new()),
            latency: None,
            fail_next: Mutex::new(None),
        }
    }

    /// Serve every verb for an item type.
    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.types.push(type_name.into());
        self
    }

    /// Delay every call, e.g. to let concurrent requests pile up.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Preload a row.
    pub fn with_row(self, type_name: &str, key: &str, item: Item) -> Self {
        self.insert(type_name, key, item);
        self
    }

    pub fn insert(&self, type_name: &str, key: &str, item: Item) {
        self.rows()
            .entry(type_name.to_string())
            .or_default()
            .insert(key.to_string(), item);
    }

    pub fn row(&self, type_name: &str, key: &str) -> Option<Item> {
        self.rows().get(type_name)?.get(key).cloned()
    }

    /// Make the next call fail with a transport error.
    pub fn fail_next(&self, message: impl Into<String>) {
        *self.fail_next.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(AdapterError::transport_msg(message));
    }

    /// Calls received for one verb, claimed or not.
    pub fn calls(&self, verb: Verb) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&verb)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }

    fn rows(&self) -> std::sync::MutexGuard<'_, Rows> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bookkeeping shared by every verb: count, wait, maybe fail.
    async fn enter(&self, verb: Verb, request: &impl TypedRequest) -> Result<()> {
        *self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(verb)
            .or_default() += 1;
        debug!(adapter = %self.id, %verb, item_type = request.type_name(), "memory adapter call");

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let failure = self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn setup(&self, api: &mut SetupApi<'_>) -> Result<()> {
        for type_name in &self.types {
            api.claim_all(type_name)?;
        }
        Ok(())
    }

    async fn fetch_item(&self, request: &FetchItemRequest) -> Result<Claim<Item>> {
        self.enter(Verb::FetchItem, request).await?;
        Ok(match self.row(request.type_name(), &request.key) {
            Some(item) => Claim::Handled(item),
            None => Claim::NotFound,
        })
    }

    async fn fetch_list(&self, request: &FetchListRequest) -> Result<Claim<Vec<Item>>> {
        self.enter(Verb::FetchList, request).await?;
        let items: Vec<Item> = self
            .rows()
            .get(request.type_name())
            .map(|rows| {
                rows.values()
                    .filter(|item| request.query.matches(item))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(Claim::Handled(items))
    }

    async fn create_item(&self, request: &CreateItemRequest) -> Result<Claim<Item>> {
        self.enter(Verb::Create, request).await?;
        let item_type = &request.item_type;
        let mut item = request.item.clone();

        let key = match &request.key {
            Some(key) => key.clone(),
            None => {
                // Assign an id the way a database would.
                let KeyExtractor::Field(field) = item_type.key_extractor() else {
                    return Err(KernelError::MissingKey {
                        type_name: item_type.name().to_string(),
                    }
                    .into());
                };
                let Some(obj) = item.as_object_mut() else {
                    return Err(AdapterError::InvalidResponse {
                        adapter_id: self.id.clone(),
                        reason: format!("cannot assign an id to a non-object `{}`", item_type.name()),
                    });
                };
                let id = Uuid::now_v7().to_string();
                obj.insert(field.clone(), Value::String(id.clone()));
                id
            }
        };

        self.insert(item_type.name(), &key, item.clone());
        Ok(Claim::Handled(item))
    }

    async fn update_item(&self, request: &UpdateItemRequest) -> Result<Claim<Item>> {
        self.enter(Verb::Update, request).await?;
        let mut rows = self.rows();
        let Some(row) = rows
            .get_mut(request.type_name())
            .and_then(|rows| rows.get_mut(&request.key))
        else {
            return Ok(Claim::NotFound);
        };
        *row = shallow_merge(row, &request.patch);
        Ok(Claim::Handled(row.clone()))
    }

    async fn delete_item(&self, request: &DeleteItemRequest) -> Result<Claim<()>> {
        self.enter(Verb::Delete, request).await?;
        let removed = self
            .rows()
            .get_mut(request.type_name())
            .and_then(|rows| rows.remove(&request.key));
        Ok(match removed {
            Some(_) => Claim::Handled(()),
            None => Claim::NotFound,
        })
    }
}
