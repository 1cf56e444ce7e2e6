//! Cache change notifications.
//!
//! The change bus is the contract with the reactive binding layer: every
//! mutation that changes what a merged read returns publishes a
//! [`CacheEvent`].  It is built on [`tokio::sync::broadcast`]; events are
//! wrapped in [`Arc`] so that broadcasting to many subscribers does not clone
//! the payload.
//!
//! # Usage
//!
//! ```rust,no_run
//! # use layerstore_kernel::ipc::{ChangeBus, CacheEvent};
//! # async fn example() {
//! let bus = ChangeBus::new(256);
//! let mut rx = bus.subscribe();
//!
//! bus.publish(CacheEvent::item_changed("Todo", "1"));
//!
//! let event = rx.recv().await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// An event that flows through the change bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CacheEvent {
    /// The merged view of one item changed (written, deleted, or uncovered
    /// by a layer being added, removed, or toggled).
    ItemChanged {
        type_name: String,
        key: String,
        timestamp: DateTime<Utc>,
    },

    /// A list query settled and its results were written to the cache.
    QuerySettled {
        type_name: String,
        fingerprint: String,
        timestamp: DateTime<Utc>,
    },

    /// A layer was pushed onto the stack.
    LayerAdded { layer_id: String },

    /// A layer was removed from the stack (rollback or commit).
    LayerRemoved { layer_id: String },

    /// Cached state was cleared, for one type or for all of them.
    Cleared { type_name: Option<String> },
}

impl CacheEvent {
    pub fn item_changed(type_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self::ItemChanged {
            type_name: type_name.into(),
            key: key.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn query_settled(type_name: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self::QuerySettled {
            type_name: type_name.into(),
            fingerprint: fingerprint.into(),
            timestamp: Utc::now(),
        }
    }

    /// The item type this event concerns, if it is type-specific.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Self::ItemChanged { type_name, .. } | Self::QuerySettled { type_name, .. } => {
                Some(type_name)
            }
            Self::Cleared { type_name } => type_name.as_deref(),
            Self::LayerAdded { .. } | Self::LayerRemoved { .. } => None,
        }
    }

    /// Whether this event may change the merged value of `(type_name, key)`.
    pub fn affects(&self, type_name: &str, key: &str) -> bool {
        match self {
            Self::ItemChanged {
                type_name: t, key: k, ..
            } => t == type_name && k == key,
            Self::Cleared { type_name: None } => true,
            Self::Cleared { type_name: Some(t) } => t == type_name,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Change bus
// ---------------------------------------------------------------------------

/// Publish/subscribe event bus backed by [`tokio::sync::broadcast`].
///
/// The bus is cheaply cloneable (`Arc`-backed) and `Send + Sync`.  Subscribers
/// receive [`Arc<CacheEvent>`] references.
#[derive(Clone)]
pub struct ChangeBus {
    inner: Arc<ChangeBusInner>,
}

struct ChangeBusInner {
    sender: broadcast::Sender<Arc<CacheEvent>>,
}

impl ChangeBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// If a subscriber falls behind by more than `capacity` events, it will
    /// receive a [`RecvError::Lagged`] error indicating how many events were
    /// missed.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(ChangeBusInner { sender }),
        }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Returns the number of receivers that will observe this event.  With no
    /// subscribers the event is dropped, which is the normal state for a
    /// store nobody is watching.
    pub fn publish(&self, event: CacheEvent) -> usize {
        match self.inner.sender.send(Arc::new(event)) {
            Ok(n) => {
                tracing::trace!(receivers = n, "cache event published");
                n
            }
            Err(_) => 0,
        }
    }

    /// Create a new subscriber that will receive all future events.
    ///
    /// Events published *before* this call are **not** replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<CacheEvent>> {
        tracing::trace!("new cache subscriber created");
        self.inner.sender.subscribe()
    }

    /// Watch a single item.
    pub fn watch_item(&self, type_name: impl Into<String>, key: impl Into<String>) -> ItemWatcher {
        ItemWatcher {
            type_name: type_name.into(),
            key: key.into(),
            rx: self.subscribe(),
        }
    }

    /// Return the current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }
}

/// A subscription filtered down to one `(type, key)` pair.
pub struct ItemWatcher {
    type_name: String,
    key: String,
    rx: broadcast::Receiver<Arc<CacheEvent>>,
}

impl ItemWatcher {
    /// Wait until the watched item may have changed.
    ///
    /// A lagging receiver reports a change, since missed events could have
    /// concerned this item.  Returns `false` once the bus is gone.
    pub async fn changed(&mut self) -> bool {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.affects(&self.type_name, &self.key) => return true,
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, key = %self.key, "item watcher lagged");
                    return true;
                }
                Err(RecvError::Closed) => return false,
            }
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
