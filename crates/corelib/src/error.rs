//! Error types for the core library.

use thiserror::Error;

use crate::node::Host;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection open/close or socket failure.
    #[error("transport error on {host}: {reason}")]
    Transport { host: String, reason: String },
    /// Malformed or invalid request, or a malformed response from the store.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// No route to a replica could be produced.
    #[error(transparent)]
    Routing(#[from] RoutingError),
    /// The ring description could not be fetched or understood.
    #[error("topology refresh failed: {0}")]
    Refresh(#[source] Box<Error>),
    /// Backend deadline exceeded.
    #[error("backend deadline exceeded: {0}")]
    Timeout(String),
}

impl Error {
    pub fn transport(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Transport {
            host: host.into(),
            reason: reason.into(),
        }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// True for failures caused by the store being unreachable or slow, as
    /// opposed to a bad request or a broken topology.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::Timeout(_))
    }
}

/// Reasons a row key could not be mapped onto a pooled connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// The ring snapshot holds no ranges at all.
    #[error("ring is empty")]
    EmptyRing,
    /// No range covers the token (the ring has a gap).
    #[error("no range covers token {token}")]
    NoRange { token: i64 },
    /// The chosen replica has no registered connection pool.
    #[error("no connection pool registered for host {host}")]
    NoPool { host: Host },
    /// The host's pool was shut down, e.g. swept after the host left the
    /// ring.
    #[error("connection pool for host {host} is shut down")]
    PoolClosed { host: Host },
}
