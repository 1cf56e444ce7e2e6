//! Adapter setup: claim declaration and conflict detection.
//!
//! While the store is built each adapter receives a [`SetupApi`].  Claims go
//! into a shared [`ClaimTable`] keyed by `(scope, verb, item type)`; a
//! second adapter claiming the same triple fails immediately with
//! [`AdapterError::Conflict`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use layerstore_kernel::{HookBus, ItemKind, ItemTypeRegistry};
use tracing::debug;

use crate::error::{AdapterError, Result};
use crate::request::Verb;
use crate::writer::CacheWriter;

/// Scope used for item types registered without a `scope_id`.
pub const DEFAULT_SCOPE: &str = "default";

// ---------------------------------------------------------------------------
// ClaimTable
// ---------------------------------------------------------------------------

type ClaimKey = (String, Verb, String);

/// Which adapter owns each `(scope, verb, item type)` triple.
#[derive(Debug, Default, Clone)]
pub struct ClaimTable {
    owners: HashMap<ClaimKey, String>,
}

impl ClaimTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a claim.  Re-claiming a triple the adapter already owns is a
    /// no-op.
    pub fn insert(&mut self, scope: &str, verb: Verb, type_name: &str, adapter: &str) -> Result<()> {
        let key = (scope.to_string(), verb, type_name.to_string());
        match self.owners.get(&key) {
            Some(existing) if existing != adapter => Err(AdapterError::Conflict {
                verb,
                type_name: type_name.to_string(),
                scope: scope.to_string(),
                existing: existing.clone(),
                adapter: adapter.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.owners.insert(key, adapter.to_string());
                Ok(())
            }
        }
    }

    /// The adapter owning a triple.
    pub fn owner(&self, scope: &str, verb: Verb, type_name: &str) -> Option<&str> {
        self.owners
            .get(&(scope.to_string(), verb, type_name.to_string()))
            .map(String::as_str)
    }

    /// Drop every claim of one adapter (failed setup).
    pub fn release(&mut self, adapter: &str) -> usize {
        let before = self.owners.len();
        self.owners.retain(|_, owner| owner != adapter);
        before - self.owners.len()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

// ---------------------------------------------------------------------------
// SetupApi
// ---------------------------------------------------------------------------

/// What an adapter sees during [`Adapter::setup`].
///
/// [`Adapter::setup`]: crate::Adapter::setup
pub struct SetupApi<'a> {
    adapter_id: &'a str,
    registry: &'a ItemTypeRegistry,
    hooks: &'a HookBus,
    claims: &'a mut ClaimTable,
    writer: &'a CacheWriter,
    /// Verb -> item type names this adapter serves.
    claimed: BTreeMap<Verb, BTreeSet<String>>,
}

impl<'a> SetupApi<'a> {
    pub(crate) fn new(
        adapter_id: &'a str,
        registry: &'a ItemTypeRegistry,
        hooks: &'a HookBus,
        claims: &'a mut ClaimTable,
        writer: &'a CacheWriter,
    ) -> Self {
        Self {
            adapter_id,
            registry,
            hooks,
            claims,
            writer,
            claimed: BTreeMap::new(),
        }
    }

    /// Claim one verb for one registered item type.
    pub fn claim(&mut self, verb: Verb, type_name: &str) -> Result<()> {
        let item_type = self.registry.resolve(type_name)?;
        let scope = item_type.scope_id().unwrap_or(DEFAULT_SCOPE);
        self.claims.insert(scope, verb, type_name, self.adapter_id)?;
        self.claimed
            .entry(verb)
            .or_default()
            .insert(type_name.to_string());
        debug!(adapter = self.adapter_id, %verb, item_type = type_name, scope, "claim registered");
        Ok(())
    }

    /// Claim every verb the type supports.  Models have no list queries, so
    /// `fetchList` is skipped for them.
    pub fn claim_all(&mut self, type_name: &str) -> Result<()> {
        let item_type = self.registry.resolve(type_name)?;
        for verb in Verb::ALL {
            if verb == Verb::FetchList && item_type.kind() == ItemKind::Model {
                continue;
            }
            self.claim(verb, type_name)?;
        }
        Ok(())
    }

    /// Claim the given verbs for every type registered under `scope_id`.
    /// Returns the number of types claimed.
    pub fn claim_scope(&mut self, verbs: &[Verb], scope_id: &str) -> Result<usize> {
        let types = self.registry.in_scope(scope_id);
        for item_type in &types {
            for &verb in verbs {
                if verb == Verb::FetchList && item_type.kind() == ItemKind::Model {
                    continue;
                }
                self.claim(verb, item_type.name())?;
            }
        }
        Ok(types.len())
    }

    /// The store's hook bus, for registering transform hooks.
    ///
    /// The verb claim hooks are reserved by the host; claim them with
    /// [`SetupApi::claim`] instead.
    pub fn hooks(&self) -> &HookBus {
        self.hooks
    }

    pub fn registry(&self) -> &ItemTypeRegistry {
        self.registry
    }

    /// A writer for pushing items into the base layer at any later time.
    pub fn cache_writer(&self) -> CacheWriter {
        self.writer.clone()
    }

    pub fn adapter_id(&self) -> &str {
        self.adapter_id
    }

    pub(crate) fn into_claimed(self) -> BTreeMap<Verb, BTreeSet<String>> {
        self.claimed
    }
}
