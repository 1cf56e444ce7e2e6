//! A plugin that traces the adapter pipeline.
//!
//! [`LoggingPlugin`] claims nothing.  It registers transform hooks that emit
//! `tracing` events for outgoing mutations, fetch results and confirmed
//! mutations, and pass every payload through unchanged.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use layerstore_kernel::{HookPosition, TransformHook};
use tracing::info;

use crate::error::Result;
use crate::hooks::{AfterFetchHook, AfterMutationHook, BeforeMutationHook};
use crate::setup::SetupApi;
use crate::traits::Adapter;

/// Non-claiming adapter that logs fetches and mutations.
#[derive(Debug, Default)]
pub struct LoggingPlugin {
    observed: Arc<AtomicUsize>,
}

impl LoggingPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook payloads seen so far.
    pub fn observed(&self) -> usize {
        self.observed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Adapter for LoggingPlugin {
    fn id(&self) -> &str {
        "logging"
    }

    fn setup(&self, api: &mut SetupApi<'_>) -> Result<()> {
        let hooks = api.hooks();

        let observed = Arc::clone(&self.observed);
        hooks.on_transform::<BeforeMutationHook, _, _>(
            move |draft| {
                observed.fetch_add(1, Ordering::Relaxed);
                info!(
                    hook = BeforeMutationHook::NAME,
                    verb = %draft.verb,
                    item_type = draft.item_type.name(),
                    key = draft.key.as_deref().unwrap_or("<new>"),
                    "mutation requested"
                );
                async move { Ok(draft) }
            },
            HookPosition::Append,
        )?;

        let observed = Arc::clone(&self.observed);
        hooks.on_transform::<AfterFetchHook, _, _>(
            move |fetched| {
                observed.fetch_add(1, Ordering::Relaxed);
                info!(
                    hook = AfterFetchHook::NAME,
                    item_type = fetched.item_type.name(),
                    count = fetched.items.len(),
                    "items fetched"
                );
                async move { Ok(fetched) }
            },
            HookPosition::Append,
        )?;

        let observed = Arc::clone(&self.observed);
        hooks.on_transform::<AfterMutationHook, _, _>(
            move |outcome| {
                observed.fetch_add(1, Ordering::Relaxed);
                info!(
                    hook = AfterMutationHook::NAME,
                    verb = %outcome.verb,
                    item_type = outcome.item_type.name(),
                    key = %outcome.key,
                    "mutation confirmed"
                );
                async move { Ok(outcome) }
            },
            HookPosition::Append,
        )?;

        Ok(())
    }
}
