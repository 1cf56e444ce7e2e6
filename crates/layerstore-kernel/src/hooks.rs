//! Typed hook bus.
//!
//! The hook bus is the integration point for adapters and plugins.  Every
//! hook point is a type implementing either [`TransformHook`] or
//! [`ClaimHook`]; the type fixes the hook name and its payload types, so a
//! handler can never be called with the wrong payload.
//!
//! # Hook kinds
//!
//! - **Transform** hooks run every handler in order, threading the payload
//!   through each one.
//! - **Claim** hooks run handlers in order until one returns
//!   [`Claim::Handled`]; the remaining handlers are skipped.
//!
//! A hook name is bound to one kind the first time a handler is registered
//! for it.  Handlers execute sequentially in registration order
//! ([`HookPosition::Prepend`] puts a handler in front).  A failing handler
//! aborts the chain and the call returns [`KernelError::HookExecution`].
//!
//! A claim hook can be *reserved* with [`HookBus::reserve_claim`].  From
//! then on plain [`HookBus::on_claim`] registrations for it fail with
//! [`KernelError::HookReserved`]; handlers only enter through the returned
//! [`ClaimRegistrar`].
//!
//! The bus is owned by one store instance and passed explicitly to adapters
//! at setup; there is no process-wide registry.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::{BoxError, KernelError, Result};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Whether a hook threads its payload or elects a single handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    Transform,
    Claim,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transform => write!(f, "transform"),
            Self::Claim => write!(f, "claim"),
        }
    }
}

/// Where a new handler goes in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookPosition {
    /// After every existing handler.
    #[default]
    Append,
    /// Before every existing handler.
    Prepend,
}

/// Outcome of a claim handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim<T> {
    /// The handler served the request; the chain stops here.
    Handled(T),
    /// The handler owns the request but the item does not exist.
    NotFound,
    /// Not applicable; let the next handler try.
    Pass,
}

impl<T> Claim<T> {
    pub fn is_handled(&self) -> bool {
        matches!(self, Self::Handled(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Claim<U> {
        match self {
            Self::Handled(value) => Claim::Handled(f(value)),
            Self::NotFound => Claim::NotFound,
            Self::Pass => Claim::Pass,
        }
    }
}

/// A hook whose handlers all run, each receiving the previous one's output.
pub trait TransformHook: 'static {
    const NAME: &'static str;
    type Payload: Send + 'static;
}

/// A hook where the first handler producing a result wins.
pub trait ClaimHook: 'static {
    const NAME: &'static str;
    type Request: Send + Sync + 'static;
    type Output: Send + 'static;
}

/// Result type returned by hook handlers.
pub type HandlerResult<T> = std::result::Result<T, BoxError>;

type TransformFn<P> = dyn Fn(P) -> BoxFuture<'static, HandlerResult<P>> + Send + Sync;
type ClaimFn<R, O> = dyn Fn(Arc<R>) -> BoxFuture<'static, HandlerResult<Claim<O>>> + Send + Sync;

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

struct Registration {
    id: u64,
    /// `Arc<TransformFn<P>>` or `Arc<ClaimFn<R, O>>`, erased.
    handler: Box<dyn Any + Send + Sync>,
}

struct Slot {
    kind: HookKind,
    /// Only a [`ClaimRegistrar`] may add handlers.
    reserved: bool,
    handlers: Vec<Registration>,
}

#[derive(Default)]
struct HookBusInner {
    slots: RwLock<HashMap<&'static str, Slot>>,
    next_id: AtomicU64,
}

/// Store-scoped hook registry.
///
/// The bus is cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Clone, Default)]
pub struct HookBus {
    inner: Arc<HookBusInner>,
}

impl HookBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a transform hook.
    pub fn on_transform<H, F, Fut>(&self, handler: F, position: HookPosition) -> Result<Unregister>
    where
        H: TransformHook,
        F: Fn(H::Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<H::Payload>> + Send + 'static,
    {
        let erased: Arc<TransformFn<H::Payload>> = Arc::new(move |payload| handler(payload).boxed());
        self.insert(H::NAME, HookKind::Transform, Box::new(erased), position, false)
    }

    /// Register a handler for a claim hook.
    ///
    /// Fails with [`KernelError::HookReserved`] once the hook is reserved.
    pub fn on_claim<H, F, Fut>(&self, handler: F, position: HookPosition) -> Result<Unregister>
    where
        H: ClaimHook,
        F: Fn(Arc<H::Request>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<Claim<H::Output>>> + Send + 'static,
    {
        self.insert(H::NAME, HookKind::Claim, erase_claim::<H, _, _>(handler), position, false)
    }

    /// Take exclusive control of a claim hook.
    ///
    /// Fails with [`KernelError::HookReserved`] if the hook is already
    /// reserved.  Handlers registered before the reservation stay in place.
    pub fn reserve_claim<H: ClaimHook>(&self) -> Result<ClaimRegistrar<H>> {
        let mut slots = self.inner.slots.write().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(H::NAME).or_insert_with(|| Slot {
            kind: HookKind::Claim,
            reserved: false,
            handlers: Vec::new(),
        });
        if slot.kind != HookKind::Claim {
            return Err(KernelError::HookKindMismatch {
                hook: H::NAME.to_string(),
                registered: slot.kind,
                requested: HookKind::Claim,
            });
        }
        if slot.reserved {
            return Err(KernelError::HookReserved {
                hook: H::NAME.to_string(),
            });
        }
        slot.reserved = true;
        tracing::debug!(hook = H::NAME, "claim hook reserved");

        Ok(ClaimRegistrar {
            bus: self.clone(),
            _hook: PhantomData,
        })
    }

    fn insert(
        &self,
        name: &'static str,
        kind: HookKind,
        handler: Box<dyn Any + Send + Sync>,
        position: HookPosition,
        privileged: bool,
    ) -> Result<Unregister> {
        let mut slots = self.inner.slots.write().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(name).or_insert_with(|| Slot {
            kind,
            reserved: false,
            handlers: Vec::new(),
        });
        if slot.kind != kind {
            return Err(KernelError::HookKindMismatch {
                hook: name.to_string(),
                registered: slot.kind,
                requested: kind,
            });
        }
        if slot.reserved && !privileged {
            return Err(KernelError::HookReserved {
                hook: name.to_string(),
            });
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let registration = Registration { id, handler };
        match position {
            HookPosition::Append => slot.handlers.push(registration),
            HookPosition::Prepend => slot.handlers.insert(0, registration),
        }

        tracing::debug!(hook = name, %kind, handlers = slot.handlers.len(), "hook handler registered");

        Ok(Unregister {
            bus: Arc::downgrade(&self.inner),
            hook: name,
            id,
        })
    }

    /// Run a transform hook, returning the payload after every handler.
    ///
    /// With no handlers registered the payload is returned unchanged.
    pub async fn call_transform<H: TransformHook>(&self, payload: H::Payload) -> Result<H::Payload> {
        let handlers = self.snapshot::<Arc<TransformFn<H::Payload>>>(H::NAME, HookKind::Transform)?;
        tracing::debug!(hook = H::NAME, handlers = handlers.len(), "calling transform hook");

        let mut payload = payload;
        for handler in handlers {
            payload = handler(payload)
                .await
                .map_err(|e| KernelError::hook_execution(H::NAME, e))?;
        }
        Ok(payload)
    }

    /// Run a claim hook until a handler serves the request.
    pub async fn call_claim<H: ClaimHook>(&self, request: H::Request) -> Result<Claim<H::Output>> {
        let handlers =
            self.snapshot::<Arc<ClaimFn<H::Request, H::Output>>>(H::NAME, HookKind::Claim)?;
        tracing::debug!(hook = H::NAME, handlers = handlers.len(), "calling claim hook");

        let request = Arc::new(request);
        let mut not_found = false;
        for (position, handler) in handlers.into_iter().enumerate() {
            match handler(Arc::clone(&request))
                .await
                .map_err(|e| KernelError::hook_execution(H::NAME, e))?
            {
                Claim::Handled(output) => {
                    tracing::debug!(hook = H::NAME, position, "claim hook handled");
                    return Ok(Claim::Handled(output));
                }
                Claim::NotFound => not_found = true,
                Claim::Pass => {}
            }
        }

        if not_found {
            tracing::debug!(hook = H::NAME, "claim hook reported not found");
            Ok(Claim::NotFound)
        } else {
            tracing::debug!(hook = H::NAME, "claim hook unclaimed");
            Ok(Claim::Pass)
        }
    }

    /// Clone the handler list so the lock is not held across awaits.
    fn snapshot<T: Clone + 'static>(&self, name: &'static str, kind: HookKind) -> Result<Vec<T>> {
        let slots = self.inner.slots.read().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = slots.get(name) else {
            return Ok(Vec::new());
        };
        if slot.kind != kind {
            return Err(KernelError::HookKindMismatch {
                hook: name.to_string(),
                registered: slot.kind,
                requested: kind,
            });
        }
        slot.handlers
            .iter()
            .map(|r| {
                r.handler.downcast_ref::<T>().cloned().ok_or_else(|| {
                    KernelError::Internal(format!(
                        "hook `{name}` has handlers registered with a different payload type"
                    ))
                })
            })
            .collect()
    }

    /// Number of handlers registered for a hook name.
    pub fn handler_count(&self, name: &str) -> usize {
        let slots = self.inner.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.get(name).map_or(0, |slot| slot.handlers.len())
    }

    /// The kind a hook name is bound to, once a handler was registered or the
    /// hook reserved.
    pub fn kind_of(&self, name: &str) -> Option<HookKind> {
        let slots = self.inner.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.get(name).map(|slot| slot.kind)
    }

    /// Remove every handler and reservation (store teardown).
    pub fn clear(&self) {
        self.inner
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn erase_claim<H, F, Fut>(handler: F) -> Box<dyn Any + Send + Sync>
where
    H: ClaimHook,
    F: Fn(Arc<H::Request>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<Claim<H::Output>>> + Send + 'static,
{
    let erased: Arc<ClaimFn<H::Request, H::Output>> =
        Arc::new(move |request| handler(request).boxed());
    Box::new(erased)
}

/// The only way to add handlers to a reserved claim hook.
pub struct ClaimRegistrar<H: ClaimHook> {
    bus: HookBus,
    _hook: PhantomData<fn() -> H>,
}

impl<H: ClaimHook> ClaimRegistrar<H> {
    pub fn register<F, Fut>(&self, handler: F, position: HookPosition) -> Result<Unregister>
    where
        F: Fn(Arc<H::Request>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<Claim<H::Output>>> + Send + 'static,
    {
        self.bus
            .insert(H::NAME, HookKind::Claim, erase_claim::<H, _, _>(handler), position, true)
    }

    pub fn hook(&self) -> &'static str {
        H::NAME
    }
}

impl<H: ClaimHook> fmt::Debug for ClaimRegistrar<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimRegistrar").field("hook", &H::NAME).finish()
    }
}

/// Handle returned by registration; call [`Unregister::unregister`] to
/// remove the handler.  Dropping the handle keeps the handler registered.
#[derive(Debug)]
pub struct Unregister {
    bus: Weak<HookBusInner>,
    hook: &'static str,
    id: u64,
}

impl Unregister {
    /// Remove the handler.  Returns `false` if it was already gone.
    pub fn unregister(self) -> bool {
        let Some(inner) = self.bus.upgrade() else {
            return false;
        };
        let mut slots = inner.slots.write().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = slots.get_mut(self.hook) else {
            return false;
        };
        let before = slot.handlers.len();
        slot.handlers.retain(|r| r.id != self.id);
        before != slot.handlers.len()
    }

    pub fn hook(&self) -> &'static str {
        self.hook
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
