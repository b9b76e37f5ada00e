//! Configuration for the inference gateway.

use std::collections::HashMap;
use std::time::Duration;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Gateway configuration.
///
/// Keys map one-to-one onto un-prefixed environment variables
/// (`max_concurrent_requests` <- `MAX_CONCURRENT_REQUESTS`).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base URL of the inference backend.
    #[serde(default = "default_ollama_url")]
    pub ollama_base_url: String,
    /// Size of the dispatch worker pool.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    /// How long a caller waits for its request to be dispatched.
    #[serde(default = "default_queue_timeout")]
    pub queue_timeout_seconds: u64,
    /// Reject new requests once this many are waiting. Unset = unbounded.
    #[serde(default)]
    pub max_queue_depth: Option<usize>,
    /// Poll tick of idle workers, bounds how fast they observe shutdown.
    #[serde(default = "default_poll_interval")]
    pub worker_poll_interval_ms: u64,
    /// Timeout of the backend probe issued by `/health`.
    #[serde(default = "default_health_timeout")]
    pub health_timeout_seconds: u64,
    /// Chunks buffered between a worker and its caller.
    #[serde(default = "default_relay_buffer")]
    pub relay_buffer_chunks: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ollama_base_url: default_ollama_url(),
            max_concurrent_requests: default_max_concurrent(),
            queue_timeout_seconds: default_queue_timeout(),
            max_queue_depth: None,
            worker_poll_interval_ms: default_poll_interval(),
            health_timeout_seconds: default_health_timeout(),
            relay_buffer_chunks: default_relay_buffer(),
            log_level: default_log_level(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    11435
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_max_concurrent() -> usize {
    3
}
fn default_queue_timeout() -> u64 {
    300
}
fn default_poll_interval() -> u64 {
    5000
}
fn default_health_timeout() -> u64 {
    5
}
fn default_relay_buffer() -> usize {
    16
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (`MAX_CONCURRENT_REQUESTS`, `OLLAMA_BASE_URL`, ...)
    /// 2. gateway.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::build(Environment::default().try_parsing(true))
    }

    /// Load configuration from an explicit variable map instead of the process environment.
    pub fn from_env_map(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::build(
            Environment::default()
                .try_parsing(true)
                .source(Some(vars)),
        )
    }

    fn build(env: Environment) -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .add_source(File::with_name("gateway").required(false))
            .add_source(env)
            .build()?;

        config.try_deserialize()
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_timeout_seconds)
    }

    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_seconds)
    }

    /// Listen address in `host:port` form.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
