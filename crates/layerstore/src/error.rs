//! Store error types.
//!
//! [`StoreError`] wraps the errors of every lower layer and adds the
//! per-request failures only the store can detect.  It is `Clone` so one
//! failed fetch can be handed to every caller waiting on it.

use layerstore_adapters::{AdapterError, Verb};
use layerstore_cache::CacheError;
use layerstore_kernel::{Claim, KernelError};

/// Unified error type for the layerstore facade.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Adapter(AdapterError),

    /// The adapter reports that the item does not exist, or the cache holds
    /// a tombstone for it.
    #[error("`{type_name}` item not found: {key}")]
    NotFound { type_name: String, key: String },

    /// No installed adapter claimed the request.
    #[error("no adapter serves {verb} for `{type_name}`")]
    NoAdapter { verb: Verb, type_name: String },

    /// The operation makes no sense for this item type.
    #[error("{verb} is not supported for `{type_name}`: {reason}")]
    Unsupported {
        verb: Verb,
        type_name: String,
        reason: String,
    },

    /// An item could not be decoded into the requested Rust type.
    #[error("cannot decode `{type_name}` item: {reason}")]
    Decode { type_name: String, reason: String },

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Catch-all for unexpected internal errors.
    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn not_found(type_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            type_name: type_name.into(),
            key: key.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// The adapter error behind this failure, whether it was returned
    /// directly or raised inside a hook handler.
    pub fn adapter_error(&self) -> Option<AdapterError> {
        match self {
            Self::Adapter(err) => Some(err.clone()),
            Self::Kernel(err) => AdapterError::from_hook(err),
            _ => None,
        }
    }

    /// `true` if the backend call itself failed.
    pub fn is_transport(&self) -> bool {
        self.adapter_error().is_some_and(|e| e.is_transport())
    }
}

// Kernel and cache failures keep their own variant even when an adapter-side
// component (the cache writer, setup) reported them.
impl From<AdapterError> for StoreError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Kernel(err) => Self::Kernel(err),
            AdapterError::Cache(err) => Self::Cache(err),
            err => Self::Adapter(err),
        }
    }
}

/// Turn a claim chain outcome into the value the caller asked for.
pub(crate) fn expect_claim<T>(claim: Claim<T>, verb: Verb, type_name: &str, key: &str) -> Result<T> {
    match claim {
        Claim::Handled(value) => Ok(value),
        Claim::NotFound => Err(StoreError::not_found(type_name, key)),
        Claim::Pass => Err(StoreError::NoAdapter {
            verb,
            type_name: type_name.to_string(),
        }),
    }
}

/// Convenience alias used throughout the store.
pub type Result<T> = std::result::Result<T, StoreError>;
