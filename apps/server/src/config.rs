//! Configuration management for the FHIR graph server.

use geflecht_graph::GraphConfig;
use serde::Deserialize;
use std::net::SocketAddr;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub fhir: FhirConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Externally visible base URL, used for `Location` headers and bundle
    /// `self` links.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Mount point of the FHIR endpoints.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Mount point of the graph-native endpoints.
    #[serde(default = "default_graph_base")]
    pub graph_base: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: default_base_url(),
            api_base: default_api_base(),
            graph_base: default_graph_base(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FhirConfig {
    /// Advertised in the CapabilityStatement.
    #[serde(default = "default_fhir_version")]
    pub version: String,
    /// Path to `fhir.schema.json`. Relative paths are tried against the
    /// working directory first, then the compile-time crate directory.
    #[serde(default = "default_schema_path")]
    pub schema_path: String,
    /// Materialize reference edges on writes unless the request says
    /// otherwise.
    #[serde(default = "default_true")]
    pub materialize_references: bool,
    /// Create placeholder vertices for unresolved reference targets.
    #[serde(default = "default_true")]
    pub allow_placeholders: bool,
    /// Conditional delete removes every match instead of failing on >1.
    #[serde(default)]
    pub conditional_delete_multiple: bool,
    #[serde(default = "default_search_page_size")]
    pub search_page_size: usize,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
    /// Default result cap for `$everything` traversals.
    #[serde(default = "default_everything_limit")]
    pub everything_limit: usize,
}

impl Default for FhirConfig {
    fn default() -> Self {
        Self {
            version: default_fhir_version(),
            schema_path: default_schema_path(),
            materialize_references: true,
            allow_placeholders: true,
            conditional_delete_multiple: false,
            search_page_size: default_search_page_size(),
            max_page_size: default_max_page_size(),
            everything_limit: default_everything_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON log lines instead of human-readable ones.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Layered load: optional `config.{toml,yaml,json}` file, then
    /// environment variables (`GEFLECHT__SERVER__PORT=8080` style).
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("GEFLECHT").separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must not be 0".to_string());
        }
        if !self.server.api_base.starts_with('/') {
            return Err("server.api_base must start with '/'".to_string());
        }
        if !self.server.graph_base.starts_with('/') {
            return Err("server.graph_base must start with '/'".to_string());
        }
        if self.fhir.search_page_size == 0 || self.fhir.search_page_size > self.fhir.max_page_size {
            return Err(format!(
                "fhir.search_page_size must be between 1 and {}",
                self.fhir.max_page_size
            ));
        }
        self.graph.validate()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| format!("invalid listen address: {e}"))
    }

    /// Absolute prefix of the FHIR endpoints, e.g.
    /// `http://localhost:8080/api/fhir/r6`.
    pub fn fhir_base_url(&self) -> String {
        format!(
            "{}{}",
            self.server.base_url.trim_end_matches('/'),
            self.server.api_base
        )
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_api_base() -> String {
    "/api/fhir/r6".to_string()
}

fn default_graph_base() -> String {
    "/api/graph".to_string()
}

fn default_fhir_version() -> String {
    "6.0.0-ballot3".to_string()
}

fn default_schema_path() -> String {
    "fhir.schema.json".to_string()
}

fn default_search_page_size() -> usize {
    50
}

fn default_max_page_size() -> usize {
    1000
}

fn default_everything_limit() -> usize {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}
