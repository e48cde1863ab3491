//! Contracts with the backing store's client library.
//!
//! The wire protocol is not part of this crate. The router only needs three
//! capabilities from it: describing the ring, opening a connection to one
//! host (transport open plus keyspace selection), and running a statement on
//! an open connection. [`crate::memory`] implements all three in-process.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::node::Host;

/// One row of a statement result, one string per column.
pub type Row = Vec<String>;

/// Rows returned by a statement. Empty for writes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self { rows }
    }
}

/// A live connection to exactly one storage host.
pub trait Connection: Send + Sync + 'static {
    /// Runs one statement and returns its rows.
    fn execute(&mut self, query: &str) -> Result<QueryResult>;

    /// Closes the underlying transport. Further `execute` calls fail.
    fn close(&mut self) -> Result<()>;
}

/// Opens connections to storage hosts.
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    /// Opens a transport to `host:port` and selects `keyspace` on it.
    ///
    /// Fails with a transport error when the host is unreachable and with a
    /// protocol error when the handshake is rejected. A connection is only
    /// returned once it is fully usable.
    fn connect(&self, host: &Host, port: u16, keyspace: &str) -> Result<Self::Connection>;
}

/// Source of the current ring layout, normally the seed node.
pub trait RingDescriber: Send + Sync + 'static {
    /// Lists every token range of `keyspace` with its replica addresses, in
    /// replica preference order.
    fn describe_ring(&self, keyspace: &str) -> Result<Vec<TokenRangeDescription>>;
}

/// A token range as reported by the store: `(start_token, end_token]`
/// with tokens as decimal strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRangeDescription {
    pub start_token: String,
    pub end_token: String,
    pub endpoints: Vec<String>,
}

impl TokenRangeDescription {
    pub fn new<I, S>(start: i64, end: i64, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            start_token: start.to_string(),
            end_token: end.to_string(),
            endpoints: endpoints.into_iter().map(Into::into).collect(),
        }
    }
}
