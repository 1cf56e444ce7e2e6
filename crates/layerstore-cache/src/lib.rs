//! # layerstore-cache
//!
//! Layered cache engine for layerstore.
//!
//! The cache is an ordered stack of named layers: a base layer holding
//! confirmed state, plus optimistic overlays holding speculative writes.
//! Each layer carries item snapshots and deletion tombstones; reads see a
//! single merged view.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  LayerStack (merged view, events)       │
//! ├─────────────────────────────────────────┤
//! │  optimistic layers (push / commit /     │
//! │  rollback / skip)                       │
//! ├─────────────────────────────────────────┤
//! │  base layer (seed / export snapshot)    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```
//! use layerstore_cache::{Layer, LayerId, LayerPosition, LayerStack};
//! use layerstore_kernel::ChangeBus;
//! use serde_json::json;
//!
//! let stack = LayerStack::new(ChangeBus::new(64));
//! stack.write_item(&LayerId::base(), "Todo", "1", json!({"id": "1", "v": 1})).unwrap();
//!
//! let overlay = Layer::optimistic("edit").with_item("Todo", "1", json!({"id": "1", "v": 2}));
//! stack.push_layer(overlay, LayerPosition::Top).unwrap();
//! assert_eq!(stack.get("Todo", "1").unwrap()["v"], 2);
//!
//! stack.rollback_layer(&LayerId::new("edit"));
//! assert_eq!(stack.get("Todo", "1").unwrap()["v"], 1);
//! ```

pub mod error;
pub mod layer;
pub mod snapshot;
pub mod stack;
pub mod stats;
pub mod view;

// ── re-exports ───────────────────────────────────────────────────────

pub use error::{CacheError, CacheResult};
pub use layer::{Layer, LayerChange, LayerId, Resolution};
pub use snapshot::StoreSnapshot;
pub use stack::{LayerPosition, LayerStack};
pub use stats::CacheStats;
pub use view::{ListSnapshot, Lookup, Predicate};
