//! Host abstractions for the token ring.
//!
//! A [`Host`] is the address of a storage node as reported by the ring
//! description. Inside a ring snapshot hosts are referred to by a compact
//! [`HostId`] index into the snapshot's host arena.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Address of a storage node.
///
/// Opaque to the core: it is compared, hashed and handed to the
/// [`Connector`](crate::network::Connector), never parsed.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Host(String);

impl Host {
    pub fn new(address: impl Into<String>) -> Self {
        Host(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Host {
    fn from(address: &str) -> Self {
        Host::new(address)
    }
}

impl From<String> for Host {
    fn from(address: String) -> Self {
        Host(address)
    }
}

/// Index of a host inside one ring snapshot.
///
/// Only meaningful together with the snapshot that issued it.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct HostId(pub u32);

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host#{}", self.0)
    }
}
