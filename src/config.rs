//! tunnelgate configuration management

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main tunnelgate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TunnelGateConfig {
    /// Broker HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Job relay configuration (proxy wait loop and garbage collection)
    #[serde(default)]
    pub relay: RelayConfig,

    /// Tunnel bootstrap page configuration
    #[serde(default)]
    pub tunnel: TunnelConfig,

    /// Content rewriting configuration
    #[serde(default)]
    pub rewrite: RewriteConfig,

    /// Reference agent configuration
    #[serde(default)]
    pub agent: AgentConfig,
}

impl TunnelGateConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Broker HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Allowed CORS origins (empty = any)
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            cors_origins: Vec::new(),
        }
    }
}

/// Job relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Interval between result store checks in the proxy wait loop
    pub poll_interval_ms: u64,

    /// Number of checks before the proxy gives up (interval x attempts = deadline)
    pub max_attempts: u32,

    /// Minimum time between two garbage collection sweeps
    pub gc_interval_secs: u64,

    /// Queued jobs and unconsumed results older than this are dropped
    pub max_age_secs: u64,
}

impl RelayConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Total time a proxy caller waits before receiving a gateway timeout
    pub fn deadline(&self) -> Duration {
        self.poll_interval() * self.max_attempts
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            max_attempts: 150,
            gc_interval_secs: 60,
            max_age_secs: 30,
        }
    }
}

/// Tunnel bootstrap page configuration
///
/// These values are rendered into the page script; the browser owns the
/// wait loop for navigation requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_attempts: 120,
        }
    }
}

/// Content rewriting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// Rewrite root-relative `url()` references in stylesheets served by the proxy
    pub proxy_css: bool,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self { proxy_css: true }
    }
}

/// Reference agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Public broker base URL
    pub broker_url: String,

    /// Private service base URL the agent fetches from
    pub target_url: String,

    /// Sleep between polls when the queue is empty
    pub poll_interval_ms: u64,

    /// Maximum upstream requests in flight
    pub max_concurrent: usize,

    /// Per-request timeout for broker and upstream calls
    pub request_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            broker_url: "http://127.0.0.1:3000".to_string(),
            target_url: "http://127.0.0.1:5000".to_string(),
            poll_interval_ms: 500,
            max_concurrent: 8,
            request_timeout_secs: 30,
        }
    }
}
