//! # Framework Errors
//!
//! This module defines the error taxonomy shared by the store, the repository and the
//! runtime. Errors are layered: backends speak [`StoreError`], the repository adds
//! codec failures and entity context ([`RepositoryError`]), and callers of the runtime
//! only ever see [`FrameworkError`].
//!
//! Business-level failures are **not** errors: a handler returns
//! [`ActionReply::Failure`](crate::reply::ActionReply::Failure) and the caller receives it
//! as a normal outcome.

use crate::store::Version;

/// Errors reported by a [`Store`](crate::store::Store) backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The stored version differs from the one the caller last observed.
    #[error("Version conflict: expected {expected:?}, found {actual:?}")]
    Conflict {
        expected: Option<Version>,
        actual: Option<Version>,
    },
    /// The backend call failed or timed out. Nothing was written.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Serialization failure raised by a [`Codec`](crate::codec::Codec).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Codec error: {0}")]
pub struct CodecError(pub String);

/// Errors reported by a [`Repository`](crate::repository::Repository).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("Persistence conflict for {entity_type}/{entity_id}: expected {expected:?}, found {actual:?}")]
    Conflict {
        entity_type: String,
        entity_id: String,
        expected: Option<Version>,
        actual: Option<Version>,
    },
    /// The stored bytes could not be decoded. Fatal for the id until remediated.
    #[error("Data corruption for {entity_type}/{entity_id}: {reason}")]
    DataCorruption {
        entity_type: String,
        entity_id: String,
        reason: String,
    },
    /// State could not be encoded before writing.
    #[error("Failed to encode state for {entity_type}/{entity_id}: {reason}")]
    Encode {
        entity_type: String,
        entity_id: String,
        reason: String,
    },
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur within the entity runtime itself.
///
/// Use [`FrameworkError::is_retryable`] to decide whether a caller may resend the
/// same command unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameworkError {
    /// Malformed command, rejected before it reached the handler.
    #[error("Invalid command for {entity_type}/{entity_id}: {reason}")]
    Validation {
        entity_type: String,
        entity_id: String,
        reason: String,
    },
    /// Optimistic-concurrency mismatch. The instance has been resynchronized.
    #[error("Persistence conflict for {entity_type}/{entity_id}: expected {expected:?}, found {actual:?}")]
    Conflict {
        entity_type: String,
        entity_id: String,
        expected: Option<Version>,
        actual: Option<Version>,
    },
    #[error("Data corruption for {entity_type}/{entity_id}: {reason}")]
    DataCorruption {
        entity_type: String,
        entity_id: String,
        reason: String,
    },
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    /// The runtime is shutting down and no longer accepts commands.
    #[error("Runtime unavailable: shutting down")]
    Unavailable,
    #[error("Entity type not registered: {0}")]
    UnknownEntityType(String),
    #[error("Service not registered: {0}")]
    UnknownService(String),
    #[error("Entity type already registered: {0}")]
    DuplicateEntityType(String),
    #[error("Invalid entity type name: {0:?}")]
    InvalidEntityType(String),
    #[error("Forward chain exceeded {0} hops")]
    ForwardLimitExceeded(usize),
    #[error("Codec error: {0}")]
    Codec(String),
    #[error("Service call failed: {0}")]
    ServiceFailed(String),
    /// The instance answered neither way; internal routing lost the command.
    #[error("Entity instance dropped response channel")]
    ActorDropped,
    /// The instance worker died while handling the command, which only a panicking
    /// handler causes. Resending the same command would panic again.
    #[error("Entity instance {entity_type}/{entity_id} stopped without replying")]
    InstancePanicked {
        entity_type: String,
        entity_id: String,
    },
}

impl FrameworkError {
    /// True when resending the same command may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FrameworkError::Conflict { .. }
                | FrameworkError::StoreUnavailable(_)
                | FrameworkError::Unavailable
                | FrameworkError::ActorDropped
        )
    }
}

impl From<RepositoryError> for FrameworkError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::Conflict {
                entity_type,
                entity_id,
                expected,
                actual,
            } => FrameworkError::Conflict {
                entity_type,
                entity_id,
                expected,
                actual,
            },
            RepositoryError::DataCorruption {
                entity_type,
                entity_id,
                reason,
            } => FrameworkError::DataCorruption {
                entity_type,
                entity_id,
                reason,
            },
            RepositoryError::Encode { reason, .. } => FrameworkError::Codec(reason),
            RepositoryError::Unavailable(reason) => FrameworkError::StoreUnavailable(reason),
        }
    }
}
