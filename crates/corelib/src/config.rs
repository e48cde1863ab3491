//! Router configuration.
//!
//! Supplied by the composing application; nothing in the core reads flags or
//! environment variables.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default storage port.
pub const DEFAULT_PORT: u16 = 9160;

/// Connections opened eagerly per host pool.
pub const DEFAULT_CONNECTIONS_PER_POOL: usize = 10;

/// Connection and ring settings for a [`Router`](crate::Router).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Node asked for the ring description.
    pub seed_node: String,
    /// Port used for every storage host.
    pub port: u16,
    /// Connections seeded into each host pool at construction.
    pub connections_per_pool: usize,
    /// Keyspace selected on every new connection and described on refresh.
    pub keyspace: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            seed_node: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connections_per_pool: DEFAULT_CONNECTIONS_PER_POOL,
            keyspace: "offline_keyspace".to_string(),
        }
    }
}

impl RouterConfig {
    pub fn new(seed_node: impl Into<String>, keyspace: impl Into<String>) -> Self {
        Self {
            seed_node: seed_node.into(),
            keyspace: keyspace.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connections_per_pool(mut self, count: usize) -> Self {
        self.connections_per_pool = count;
        self
    }

    /// Rejects settings no connection could be opened with.
    pub fn validate(&self) -> Result<()> {
        if self.seed_node.trim().is_empty() {
            return Err(Error::protocol("seed node must not be empty"));
        }
        if self.keyspace.trim().is_empty() {
            return Err(Error::protocol("keyspace must not be empty"));
        }
        if self.port == 0 {
            return Err(Error::protocol("port must not be zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RouterConfig::default();
        assert_eq!(config.port, 9160);
        assert_eq!(config.connections_per_pool, 10);
        assert_eq!(config.keyspace, "offline_keyspace");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_keyspace() {
        let config = RouterConfig::new("10.0.0.1", " ");
        assert!(matches!(config.validate(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RouterConfig =
            serde_json::from_str(r#"{"seed_node": "10.1.1.1", "connections_per_pool": 2}"#)
                .unwrap();
        assert_eq!(config.seed_node, "10.1.1.1");
        assert_eq!(config.connections_per_pool, 2);
        assert_eq!(config.port, DEFAULT_PORT);
    }
}
