//! # layerstore
//!
//! A typed client-side data store.  Item types are registered up front;
//! adapters claim the verbs they serve for those types; reads are served
//! from a layered cache and fall back to the claiming adapter; mutations
//! are staged optimistically and committed or rolled back when the adapter
//! answers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │  Store (get / list / create / update / delete)   │
//! ├───────────────────────┬──────────────────────────┤
//! │  RequestCoordinator   │  optimistic lifecycle    │
//! │  (fingerprint dedupe) │  (stage / commit / undo) │
//! ├───────────────────────┴──────────────────────────┤
//! │  HookBus + AdapterHost (claim routing)           │
//! ├──────────────────────────────────────────────────┤
//! │  LayerStack (base + optimistic layers)           │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```
//! use layerstore::{ItemType, MemoryAdapter, Store};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> layerstore::Result<()> {
//! let store = Store::builder()
//!     .item_type(ItemType::collection("Todo"))
//!     .adapter(MemoryAdapter::new("memory").with_type("Todo"))
//!     .build()?;
//!
//! store.create("Todo", json!({"id": "1", "text": "write docs"})).await?;
//! let todo = store.get("Todo", "1").await?;
//! assert_eq!(todo["text"], "write docs");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod optimistic;
pub mod query;
pub mod store;

// ── re-exports ───────────────────────────────────────────────────────

pub use config::{FetchPolicy, StoreConfig};
pub use coordinator::{FetchState, RequestCoordinator};
pub use error::{Result, StoreError};
pub use optimistic::MutationOptions;
pub use query::Fingerprint;
pub use store::{Store, StoreBuilder};

pub use layerstore_adapters::{
    Adapter, AdapterError, AfterFetchHook, AfterMutationHook, BeforeMutationHook, CacheWriter,
    ClaimTable, CreateItemHook, CreateItemRequest, DeleteItemHook, DeleteItemRequest,
    FetchItemHook, FetchItemRequest, FetchListHook, FetchListRequest, FetchedItems, LoggingPlugin,
    MemoryAdapter, MutationDraft, MutationOutcome, Query, SetupApi, TypedRequest, UpdateItemHook,
    UpdateItemRequest, Verb,
};
pub use layerstore_adapters::Result as AdapterResult;
pub use layerstore_cache::{
    CacheError, CacheStats, Layer, LayerChange, LayerId, LayerPosition, LayerStack, Lookup,
    StoreSnapshot,
};
pub use layerstore_kernel::{
    CacheEvent, Claim, HookBus, HookPosition, Item, ItemKind, ItemType, ItemTypeHandle,
    ItemTypeRegistry, ItemWatcher, KernelError, KeyExtractor, RequiredFields, ValidationSchema,
};
