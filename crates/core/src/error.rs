//! Domain error model.
//!
//! Every failure leaving a repository is one of a handful of classes. Callers
//! map the class to a transport status; the message is for humans.

use thiserror::Error;

/// Result type used across all warden crates.
pub type DomainResult<T> = Result<T, DomainError>;

/// Classified failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input (empty id, invalid query, invalid event).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The current state does not allow the command.
    ///
    /// Also raised when a precondition is rejected at commit time or when the
    /// aggregate moved on since it was loaded.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// A member, provider or unique claim is already present.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// No events for the requested id, or the addressed sub-entity is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage, codec or other unexpected failures.
    #[error("internal error: {0}")]
    Internal(String),

    /// The command context was cancelled before the operation completed.
    #[error("operation cancelled")]
    Cancelled,
}

impl DomainError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn precondition_failed(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, Self::PreconditionFailed(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("codec: {err}"))
    }
}
