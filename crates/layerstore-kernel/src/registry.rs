//! Item type registry.
//!
//! The registry holds every [`ItemType`] known to a store instance.  Names
//! are unique; descriptors are immutable once registered and handed out as
//! cheap [`ItemTypeHandle`] clones.
//!
//! Internally the registry is backed by [`DashMap`] which provides lock-free
//! concurrent reads and fine-grained write locking, making it safe to share
//! across tasks without a global `RwLock`.
//!
//! # Example
//!
//! ```rust
//! # use layerstore_kernel::{ItemType, ItemTypeRegistry};
//! let registry = ItemTypeRegistry::new();
//! registry.register(ItemType::collection("Todo")).unwrap();
//!
//! let todo = registry.resolve("Todo").unwrap();
//! assert_eq!(todo.name(), "Todo");
//! assert!(registry.register(ItemType::collection("Todo")).is_err());
//! ```

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::{KernelError, Result};
use crate::item::{ItemType, ItemTypeHandle};

/// Concurrent item type registry backed by [`DashMap`].
///
/// The registry is cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Clone, Default)]
pub struct ItemTypeRegistry {
    inner: Arc<DashMap<String, ItemTypeHandle>>,
}

impl ItemTypeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new item type.
    ///
    /// Fails with [`KernelError::DuplicateName`] if the name is taken.
    pub fn register(&self, descriptor: impl Into<ItemType>) -> Result<ItemTypeHandle> {
        let descriptor = descriptor.into();
        match self.inner.entry(descriptor.name().to_string()) {
            Entry::Occupied(entry) => Err(KernelError::DuplicateName {
                name: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                let handle = Arc::new(descriptor);
                tracing::info!(
                    item_type = %handle.name(),
                    kind = %handle.kind(),
                    scope = handle.scope_id().unwrap_or("-"),
                    "item type registered"
                );
                entry.insert(Arc::clone(&handle));
                Ok(handle)
            }
        }
    }

    /// Look up a registered item type.
    pub fn resolve(&self, name: &str) -> Result<ItemTypeHandle> {
        self.inner
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| KernelError::UnknownType {
                name: name.to_string(),
            })
    }

    /// Check whether a type with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    /// Return all registered type names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Return every type registered under the given scope, sorted by name.
    pub fn in_scope(&self, scope_id: &str) -> Vec<ItemTypeHandle> {
        let mut types: Vec<ItemTypeHandle> = self
            .inner
            .iter()
            .filter(|e| e.value().scope_id() == Some(scope_id))
            .map(|e| Arc::clone(e.value()))
            .collect();
        types.sort_by(|a, b| a.name().cmp(b.name()));
        types
    }

    /// Return the total number of registered types.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drop every registration (store teardown).
    pub fn clear(&self) {
        self.inner.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
