//! Error types for the message store.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Routing, pooling or statement failure in the core.
    #[error(transparent)]
    Core(#[from] corelib::Error),
    /// A result row did not have the message shape.
    #[error("malformed message row: expected {expected} columns, got {actual}")]
    MalformedRow { expected: usize, actual: usize },
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl StoreError {
    /// True if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Core(err) if err.is_retryable())
    }
}
