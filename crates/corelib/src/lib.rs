//! Core library for token-ring routing and connection pooling.
//!
//! This crate provides the client-side pieces needed to talk to a token-ring
//! key-value store without knowing its topology:
//! - Murmur3 tokens and the partitioner computing them from row keys
//! - Wrap-aware token ranges and immutable ring snapshots
//! - Lock-free per-host connection pools
//! - A refreshable ring topology and the router on top of it
//! - An in-memory store implementing the client contracts, for tests and demos

pub mod config;
pub mod error;
pub mod memory;
pub mod network;
pub mod node;
pub mod partitioner;
pub mod pool;
pub mod ring;
pub mod router;
pub mod token;

pub use config::RouterConfig;
pub use error::{Error, Result, RoutingError};
pub use network::{Connection, Connector, QueryResult, RingDescriber, Row, TokenRangeDescription};
pub use node::{Host, HostId};
pub use partitioner::Partitioner;
pub use pool::{ConnectionId, ConnectionPool, PooledConnection};
pub use ring::{RingBuilder, RingSnapshot, RingTopology, TokenRange};
pub use router::Router;
pub use token::Token;
