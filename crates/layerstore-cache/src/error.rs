//! Error types for the layerstore-cache crate.
//!
//! All layer stack operations return [`CacheError`] via [`CacheResult`].

use thiserror::Error;

/// Alias for `Result<T, CacheError>`.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur in the layer stack.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// No layer with this id is on the stack.
    #[error("layer not found: {id}")]
    LayerNotFound { id: String },

    /// A layer with this id is already on the stack.
    #[error("layer already exists: {id}")]
    DuplicateLayer { id: String },

    /// The base layer cannot be removed, paused, or replaced.
    #[error("the base layer cannot be {operation}")]
    BaseLayerImmutable { operation: &'static str },

    /// A snapshot lists the same key as both present and deleted.
    #[error("snapshot lists `{type_name}/{key}` as both present and deleted")]
    SnapshotConflict { type_name: String, key: String },

    /// JSON serialization or deserialization of a snapshot failed.
    #[error("snapshot serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
