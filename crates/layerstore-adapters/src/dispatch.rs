//! Routing store requests to adapters.
//!
//! [`AdapterHost`] runs each adapter's setup and then registers one claim
//! handler per verb the adapter claimed.  A handler answers
//! [`Claim::Pass`] for item types outside the adapter's claims, so several
//! adapters can share a hook while each type reaches exactly one of them.
//!
//! The host reserves the five verb hooks when it is created.  After that a
//! claim handler on them can only come from a claim made through
//! [`SetupApi::claim`], so each `(verb, type)` pair has one owner.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use layerstore_kernel::{
    BoxError, Claim, ClaimHook, ClaimRegistrar, HandlerResult, HookBus, HookPosition,
    ItemTypeRegistry, Unregister,
};
use tracing::{debug, info};

use crate::error::{AdapterError, Result};
use crate::hooks::{CreateItemHook, DeleteItemHook, FetchItemHook, FetchListHook, UpdateItemHook};
use crate::request::{TypedRequest, Verb};
use crate::setup::{ClaimTable, SetupApi};
use crate::traits::Adapter;
use crate::writer::CacheWriter;

// ---------------------------------------------------------------------------
// Verb hooks
// ---------------------------------------------------------------------------

/// A claim hook served by one [`Adapter`] method.
trait VerbHook: ClaimHook<Request: TypedRequest> + Sized {
    const VERB: Verb;

    fn registrar(routes: &VerbRoutes) -> &ClaimRegistrar<Self>;

    fn invoke<'a>(
        adapter: &'a dyn Adapter,
        request: &'a Self::Request,
    ) -> BoxFuture<'a, Result<Claim<Self::Output>>>;
}

impl VerbHook for FetchItemHook {
    const VERB: Verb = Verb::FetchItem;

    fn registrar(routes: &VerbRoutes) -> &ClaimRegistrar<Self> {
        &routes.fetch_item
    }

    fn invoke<'a>(
        adapter: &'a dyn Adapter,
        request: &'a Self::Request,
    ) -> BoxFuture<'a, Result<Claim<Self::Output>>> {
        adapter.fetch_item(request)
    }
}

impl VerbHook for FetchListHook {
    const VERB: Verb = Verb::FetchList;

    fn registrar(routes: &VerbRoutes) -> &ClaimRegistrar<Self> {
        &routes.fetch_list
    }

    fn invoke<'a>(
        adapter: &'a dyn Adapter,
        request: &'a Self::Request,
    ) -> BoxFuture<'a, Result<Claim<Self::Output>>> {
        adapter.fetch_list(request)
    }
}

impl VerbHook for CreateItemHook {
    const VERB: Verb = Verb::Create;

    fn registrar(routes: &VerbRoutes) -> &ClaimRegistrar<Self> {
        &routes.create
    }

    fn invoke<'a>(
        adapter: &'a dyn Adapter,
        request: &'a Self::Request,
    ) -> BoxFuture<'a, Result<Claim<Self::Output>>> {
        adapter.create_item(request)
    }
}

impl VerbHook for UpdateItemHook {
    const VERB: Verb = Verb::Update;

    fn registrar(routes: &VerbRoutes) -> &ClaimRegistrar<Self> {
        &routes.update
    }

    fn invoke<'a>(
        adapter: &'a dyn Adapter,
        request: &'a Self::Request,
    ) -> BoxFuture<'a, Result<Claim<Self::Output>>> {
        adapter.update_item(request)
    }
}

impl VerbHook for DeleteItemHook {
    const VERB: Verb = Verb::Delete;

    fn registrar(routes: &VerbRoutes) -> &ClaimRegistrar<Self> {
        &routes.delete
    }

    fn invoke<'a>(
        adapter: &'a dyn Adapter,
        request: &'a Self::Request,
    ) -> BoxFuture<'a, Result<Claim<Self::Output>>> {
        adapter.delete_item(request)
    }
}

/// Registrars for the reserved verb hooks.
struct VerbRoutes {
    fetch_item: ClaimRegistrar<FetchItemHook>,
    fetch_list: ClaimRegistrar<FetchListHook>,
    create: ClaimRegistrar<CreateItemHook>,
    update: ClaimRegistrar<UpdateItemHook>,
    delete: ClaimRegistrar<DeleteItemHook>,
}

impl VerbRoutes {
    fn reserve(hooks: &HookBus) -> Result<Self> {
        Ok(Self {
            fetch_item: hooks.reserve_claim::<FetchItemHook>()?,
            fetch_list: hooks.reserve_claim::<FetchListHook>()?,
            create: hooks.reserve_claim::<CreateItemHook>()?,
            update: hooks.reserve_claim::<UpdateItemHook>()?,
            delete: hooks.reserve_claim::<DeleteItemHook>()?,
        })
    }
}

fn route<H: VerbHook>(
    routes: &VerbRoutes,
    adapter: &Arc<dyn Adapter>,
    types: BTreeSet<String>,
) -> Result<Unregister> {
    debug!(adapter = adapter.id(), verb = %H::VERB, types = types.len(), "routing claimed verb");
    let adapter = Arc::clone(adapter);
    let types = Arc::new(types);
    let handle = H::registrar(routes).register(
        move |request: Arc<H::Request>| {
            let adapter = Arc::clone(&adapter);
            let types = Arc::clone(&types);
            async move {
                let result: HandlerResult<Claim<H::Output>> =
                    if types.contains(request.type_name()) {
                        H::invoke(adapter.as_ref(), &request)
                            .await
                            .map_err(|e| Box::new(e) as BoxError)
                    } else {
                        Ok(Claim::Pass)
                    };
                result
            }
        },
        HookPosition::Append,
    )?;
    Ok(handle)
}

// ---------------------------------------------------------------------------
// AdapterHost
// ---------------------------------------------------------------------------

/// Installs adapters on a store's hook bus and keeps their claims.
pub struct AdapterHost {
    hooks: HookBus,
    routes: VerbRoutes,
    registry: ItemTypeRegistry,
    writer: CacheWriter,
    claims: ClaimTable,
    adapters: Vec<Arc<dyn Adapter>>,
}

impl AdapterHost {
    /// Create a host and reserve the verb hooks on `hooks`.
    ///
    /// Fails with `KernelError::HookReserved` when another host already
    /// serves the same bus.
    pub fn new(hooks: HookBus, registry: ItemTypeRegistry, writer: CacheWriter) -> Result<Self> {
        let routes = VerbRoutes::reserve(&hooks)?;
        Ok(Self {
            hooks,
            routes,
            registry,
            writer,
            claims: ClaimTable::new(),
            adapters: Vec::new(),
        })
    }

    /// Run the adapter's setup and route its claimed verbs to it.
    ///
    /// On failure the adapter's claims are released; hooks it registered
    /// itself during setup stay registered.
    pub fn install(&mut self, adapter: Arc<dyn Adapter>) -> Result<()> {
        let id = adapter.id().to_string();
        if self.adapters.iter().any(|a| a.id() == id) {
            return Err(AdapterError::DuplicateAdapter { id });
        }

        let claimed = {
            let mut api = SetupApi::new(
                &id,
                &self.registry,
                &self.hooks,
                &mut self.claims,
                &self.writer,
            );
            match adapter.setup(&mut api) {
                Ok(()) => api.into_claimed(),
                Err(e) => {
                    drop(api);
                    self.claims.release(&id);
                    return Err(e);
                }
            }
        };

        let mut routed = 0;
        for (verb, types) in claimed {
            match verb {
                Verb::FetchItem => route::<FetchItemHook>(&self.routes, &adapter, types)?,
                Verb::FetchList => route::<FetchListHook>(&self.routes, &adapter, types)?,
                Verb::Create => route::<CreateItemHook>(&self.routes, &adapter, types)?,
                Verb::Update => route::<UpdateItemHook>(&self.routes, &adapter, types)?,
                Verb::Delete => route::<DeleteItemHook>(&self.routes, &adapter, types)?,
            };
            routed += 1;
        }

        info!(adapter = %id, verbs = routed, "adapter installed");
        self.adapters.push(adapter);
        Ok(())
    }

    pub fn claims(&self) -> &ClaimTable {
        &self.claims
    }

    pub fn adapter_ids(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
