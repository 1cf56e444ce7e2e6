//! Adapter error types.
//!
//! All adapter subsystems surface errors through [`AdapterError`].  Errors
//! raised inside a claim handler travel through the hook bus boxed inside
//! [`KernelError::HookExecution`]; [`AdapterError::from_hook`] recovers them.

use std::sync::Arc;

use layerstore_cache::CacheError;
use layerstore_kernel::{KernelError, SharedError};

use crate::request::Verb;

/// Unified error type for layerstore adapters.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    /// Two adapters claimed the same verb for the same item type and scope.
    #[error(
        "adapter `{adapter}` cannot claim {verb} for `{type_name}` in scope `{scope}`: already claimed by `{existing}`"
    )]
    Conflict {
        verb: Verb,
        type_name: String,
        scope: String,
        existing: String,
        adapter: String,
    },

    /// An adapter with the same id is already installed.
    #[error("adapter already installed: {id}")]
    DuplicateAdapter { id: String },

    /// The backend call failed.  The cause is opaque to the store.
    #[error("transport error: {cause}")]
    Transport { cause: SharedError },

    /// The adapter answered with something the store cannot use.
    #[error("invalid response from adapter `{adapter_id}`: {reason}")]
    InvalidResponse { adapter_id: String, reason: String },

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl AdapterError {
    /// Wrap any backend error as a transport failure.
    pub fn transport<E>(cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport {
            cause: Arc::new(cause),
        }
    }

    /// Transport failure from a plain message.
    pub fn transport_msg(message: impl Into<String>) -> Self {
        Self::Transport {
            cause: Arc::new(TransportMessage(message.into())),
        }
    }

    /// The adapter error a hook handler failed with, if any.
    pub fn from_hook(err: &KernelError) -> Option<Self> {
        err.hook_cause()?.downcast_ref::<Self>().cloned()
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

#[derive(Debug)]
struct TransportMessage(String);

impl std::fmt::Display for TransportMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for TransportMessage {}

/// Convenience alias used throughout the adapters crate.
pub type Result<T> = std::result::Result<T, AdapterError>;
