//! Kernel error types.
//!
//! All kernel subsystems surface errors through [`KernelError`], which is the
//! single error type returned by every public API in this crate.  Each variant
//! carries enough context for callers to decide how to handle the failure
//! without inspecting opaque strings.
//!
//! The type is `Clone` so that one failure can be handed to every caller
//! waiting on the same request.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::hooks::HookKind;

/// Type-erased error produced by hook handlers and adapters.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shared form of [`BoxError`], cheap to clone.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Dotted path of the offending field (empty for the whole item).
    pub path: String,
    /// Human-readable reason.
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Unified error type for the layerstore kernel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KernelError {
    // -- Registry errors ----------------------------------------------------
    /// An item type with the same name is already registered.
    #[error("item type already registered: {name}")]
    DuplicateName { name: String },

    /// The requested item type is not registered.
    #[error("unknown item type: {name}")]
    UnknownType { name: String },

    /// The identity key could not be extracted from an item.
    #[error("item of type `{type_name}` has no usable identity key")]
    MissingKey { type_name: String },

    /// The item failed schema validation.
    #[error("validation failed for `{type_name}`: {}", join_field_errors(.errors))]
    Validation {
        type_name: String,
        errors: Vec<FieldError>,
    },

    // -- Hook errors --------------------------------------------------------
    /// A hook handler failed; the remaining handlers were skipped.
    #[error("hook `{hook}` failed: {cause}")]
    HookExecution { hook: String, cause: SharedError },

    /// A hook name is already bound to the other hook kind.
    #[error("hook `{hook}` is a {registered} hook, cannot register a {requested} handler")]
    HookKindMismatch {
        hook: String,
        registered: HookKind,
        requested: HookKind,
    },

    /// The claim hook is reserved; handlers go through its registrar.
    #[error("claim hook `{hook}` is reserved by the adapter host")]
    HookReserved { hook: String },

    // -- Generic ------------------------------------------------------------
    /// Catch-all for unexpected internal errors that don't fit a specific
    /// variant.  Prefer a typed variant whenever possible.
    #[error("internal kernel error: {0}")]
    Internal(String),
}

impl KernelError {
    /// Wrap a handler failure for the given hook.
    pub fn hook_execution(hook: impl Into<String>, cause: BoxError) -> Self {
        Self::HookExecution {
            hook: hook.into(),
            cause: Arc::from(cause),
        }
    }

    /// The underlying handler error, if this is a hook failure.
    pub fn hook_cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::HookExecution { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;
