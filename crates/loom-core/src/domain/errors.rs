//! Errors - エラー型と分類
//!
//! ループ（Scheduler / Dispatcher）は `LoomError::action()` で
//! skip / backoff / abort を明示的に判断します。catch-all はしません。

use thiserror::Error;

use crate::ports::StoreError;
use crate::queue::QueueError;

/// Malformed candidate or payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation failed: {0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A collaborator call that failed after all retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{service} failed after {attempts} attempt(s): {message}")]
pub struct ExternalServiceError {
    pub service: String,
    pub attempts: u32,
    pub message: String,
}

impl ExternalServiceError {
    pub fn new(service: impl Into<String>, attempts: u32, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            attempts,
            message: message.into(),
        }
    }
}

/// Malformed API query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid filter `{field}`: {message}")]
pub struct FilterError {
    pub field: String,
    pub message: String,
}

impl FilterError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// What a worker loop does with a failed unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Drop the unit and carry on with the next one.
    Skip,
    /// Stop the current cycle; the next interval retries.
    Backoff,
    /// Leave the loop; the runtime shuts everything down.
    Abort,
}

#[derive(Debug, Error)]
pub enum LoomError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    External(#[from] ExternalServiceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl LoomError {
    pub fn action(&self) -> ErrorAction {
        match self {
            LoomError::Queue(_) | LoomError::Validation(_) | LoomError::Filter(_) => {
                ErrorAction::Skip
            }
            LoomError::External(_) => ErrorAction::Backoff,
            LoomError::Store(StoreError::Storage(_)) => ErrorAction::Backoff,
            LoomError::Store(_) => ErrorAction::Skip,
            LoomError::Internal(_) => ErrorAction::Abort,
        }
    }
}
