//! layerstore kernel.
//!
//! This crate provides the foundational services every layerstore instance
//! is built on:
//!
//! - **[`item`]** -- Immutable item type descriptors: identity-key
//!   extraction, default values, validation schemas, routing metadata.
//! - **[`registry`]** -- Concurrent item type registry using [`DashMap`].
//! - **[`hooks`]** -- Typed hook bus with transform and claim hooks, the
//!   integration point for adapters and plugins.
//! - **[`ipc`]** -- Cache change notifications backed by
//!   [`tokio::sync::broadcast`].
//! - **[`error`]** -- Unified kernel error types via [`thiserror`].
//!
//! [`DashMap`]: dashmap::DashMap

pub mod error;
pub mod hooks;
pub mod ipc;
pub mod item;
pub mod registry;

pub use error::{BoxError, FieldError, KernelError, Result, SharedError};
pub use hooks::{
    Claim, ClaimHook, ClaimRegistrar, HandlerResult, HookBus, HookKind, HookPosition,
    TransformHook, Unregister,
};
pub use ipc::{CacheEvent, ChangeBus, ItemWatcher};
pub use item::{
    Item, ItemKind, ItemType, ItemTypeBuilder, ItemTypeHandle, KeyExtractor, RequiredFields,
    ValidationSchema,
};
pub use registry::ItemTypeRegistry;
