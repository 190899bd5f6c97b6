//! Defines the custom error type for the `core` module.

use std::time::Duration;
use thiserror::Error;

/// The primary error type for the `core` module.
///
/// Failures are contained at the smallest enclosing unit (one resource type,
/// one scope, one node) and turned into data there. This enum names what was
/// contained so it can be logged or rendered.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An operation exceeded its deadline without being cancelled by the caller.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the operation. Not a failure; callers stop silently.
    #[error("Operation was cancelled")]
    Cancelled,

    /// The identity provider does not know this identity id.
    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),

    /// One identity, tenant or subscription could not be enumerated.
    #[error("Failed to enumerate {scope}: {source}")]
    ScopeEnumeration {
        scope: String,
        #[source]
        source: anyhow::Error,
    },

    /// One resource type could not be listed within a scope.
    #[error("Failed to list {resource_type} in {scope}: {source}")]
    ResourceListing {
        resource_type: String,
        scope: String,
        #[source]
        source: anyhow::Error,
    },

    /// Any other failure reported by an external collaborator.
    #[error("{0}")]
    Provider(#[from] anyhow::Error),

    /// A spawned task panicked or was aborted.
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl CoreError {
    /// Returns `true` if this is the silent cancellation path rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cancelled)
    }

    /// Returns `true` if this error came from an elapsed deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CoreError::Timeout(_))
    }

    /// Converts into a plain `anyhow` source, unwrapping collaborator errors
    /// so re-wrapping them with scope context does not nest their message.
    pub fn into_source(self) -> anyhow::Error {
        match self {
            CoreError::Provider(inner) => inner,
            other => anyhow::Error::new(other),
        }
    }
}
