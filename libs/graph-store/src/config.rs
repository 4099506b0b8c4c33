//! Graph backend connection configuration.

use serde::Deserialize;

/// Connection settings for the graph backend.
///
/// The connection fields (`host`, `port`, TLS, SASL credentials, pool sizing)
/// describe a wire backend such as a Gremlin Server; the embedded in-memory
/// engine ignores them. `backend` selects the engine at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Use WSS instead of WS when connecting to a wire backend.
    #[serde(default)]
    pub enable_ssl: bool,
    /// SASL username; empty disables authentication.
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Parallel backend connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Multiplexed in-flight requests per connection.
    #[serde(default = "default_max_in_process")]
    pub max_in_process_per_connection: u32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            host: default_host(),
            port: default_port(),
            enable_ssl: false,
            username: String::new(),
            password: String::new(),
            pool_size: default_pool_size(),
            max_in_process_per_connection: default_max_in_process(),
        }
    }
}

impl GraphConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("graph.host must not be empty".to_string());
        }
        if self.pool_size == 0 {
            return Err("graph.pool_size must be at least 1".to_string());
        }
        if self.max_in_process_per_connection == 0 {
            return Err("graph.max_in_process_per_connection must be at least 1".to_string());
        }
        Ok(())
    }
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8182
}

fn default_pool_size() -> u32 {
    16
}

fn default_max_in_process() -> u32 {
    64
}
