//! Adapter protocol for layerstore.
//!
//! Each backend integration implements the [`Adapter`] trait defined in
//! [`traits`].  At setup an adapter claims `(verb, item type)` pairs through
//! the [`SetupApi`]; the [`AdapterHost`] turns those claims into handlers on
//! the store's hook bus.
//!
//! Also provided:
//!
//! - [`MemoryAdapter`] -- an in-memory reference backend.
//! - [`LoggingPlugin`] -- a non-claiming plugin tracing the pipeline.
//! - [`CacheWriter`] -- push ingestion into the base layer.

pub mod dispatch;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod memory;
pub mod request;
pub mod setup;
pub mod traits;
pub mod writer;

pub use dispatch::AdapterHost;
pub use error::{AdapterError, Result};
pub use hooks::{
    AfterFetchHook, AfterMutationHook, BeforeMutationHook, CreateItemHook, DeleteItemHook,
    FetchItemHook, FetchListHook, UpdateItemHook,
};
pub use logging::LoggingPlugin;
pub use memory::MemoryAdapter;
pub use request::{
    CreateItemRequest, DeleteItemRequest, FetchItemRequest, FetchListRequest, FetchedItems,
    MutationDraft, MutationOutcome, Query, TypedRequest, UpdateItemRequest, Verb, shallow_merge,
};
pub use setup::{ClaimTable, DEFAULT_SCOPE, SetupApi};
pub use traits::Adapter;
pub use writer::CacheWriter;
