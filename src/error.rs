//! Error types for the bare-metal infrastructure provider

use thiserror::Error;

/// Main error type for provider operations
///
/// Every variant is retried by the manager with exponential backoff. The
/// "treated as success" cases (object gone, owner not set, paused) are not
/// errors at all; they are [`crate::controller::Outcome`] values.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Object store could not serve the request
    #[error("object store unavailable: {0}")]
    StoreUnavailable(String),

    /// Object disappeared while being written
    #[error("{kind} {key} not found")]
    NotFound {
        /// Kind of the missing object
        kind: &'static str,
        /// namespace/name of the missing object
        key: String,
    },

    /// Optimistic-concurrency write lost against a newer resource version
    #[error("conflict writing {kind} {key}: resource version {expected} is stale")]
    Conflict {
        /// Kind of the object being written
        kind: &'static str,
        /// namespace/name of the object being written
        key: String,
        /// Resource version the write was based on
        expected: String,
    },

    /// Owner reference that claims control but cannot be followed
    #[error("malformed {kind} owner reference: {message}")]
    MalformedReference {
        /// Owner kind the reference claims to point at
        kind: &'static str,
        /// What is wrong with it
        message: String,
    },

    /// Corrective action failed
    #[error("provisioning error: {0}")]
    Provisioning(String),

    /// Invalid manager or controller configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a store-unavailable error with the given message
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Create a not-found error for a status write against a vanished object
    pub fn not_found(kind: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    /// Create a conflict error for a compare-and-swap write
    pub fn conflict(kind: &'static str, key: impl ToString, expected: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            key: key.to_string(),
            expected: expected.into(),
        }
    }

    /// Create a malformed-reference error for the given owner kind
    pub fn malformed_reference(kind: &'static str, msg: impl Into<String>) -> Self {
        Self::MalformedReference {
            kind,
            message: msg.into(),
        }
    }

    /// Create a provisioning error with the given message
    pub fn provisioning(msg: impl Into<String>) -> Self {
        Self::Provisioning(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns true when the error means the object is gone
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Kube(kube::Error::Api(ae)) => ae.code == 404,
            _ => false,
        }
    }

    /// Returns true when the error is a lost compare-and-swap
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Kube(kube::Error::Api(ae)) => ae.code == 409,
            _ => false,
        }
    }

    /// CamelCase reason used when the error is recorded in a status condition
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Kube(_) | Self::StoreUnavailable(_) => "StoreUnavailable",
            Self::NotFound { .. } => "NotFound",
            Self::Conflict { .. } => "ConflictOnWrite",
            Self::MalformedReference { .. } => "MalformedReference",
            Self::Provisioning(_) => "ProvisioningFailed",
            Self::Config(_) => "InvalidConfiguration",
        }
    }
}
