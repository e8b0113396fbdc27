//! Configuration management.
//!
//! Values come from an optional file and from `PARROT__`-prefixed
//! environment variables, e.g. `PARROT__AUTH__URL=http://auth:8080`.
//! Durations use humantime notation (`"5s"`, `"250ms"`).

use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

use crate::api::PipelineConfig;
use crate::middleware::introspection::DEFAULT_INTROSPECTION_PATH;
use crate::startup::RetryPolicy;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Token introspection authority
    pub auth: AuthConfig,

    /// Boot-time readiness probing
    #[serde(default)]
    pub startup: StartupConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Server-wide deadline for a single request
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Honor X-Forwarded-For / X-Real-IP
    #[serde(default)]
    pub trust_proxy_headers: bool,

    /// Buffered access log records before records are dropped
    #[serde(default = "default_access_log_capacity")]
    pub access_log_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
            trust_proxy_headers: false,
            access_log_capacity: default_access_log_capacity(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port).parse()?;
        Ok(addr)
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            request_timeout: self.request_timeout,
            trust_proxy_headers: self.trust_proxy_headers,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; `memory` selects the in-process store
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Bound on a single role lookup
    #[serde(default = "default_lookup_timeout", with = "humantime_serde")]
    pub lookup_timeout: Duration,
}

impl DatabaseConfig {
    pub fn is_in_memory(&self) -> bool {
        self.url == "memory"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Base URL of the introspection authority
    pub url: String,

    #[serde(default = "default_introspection_path")]
    pub introspection_path: String,

    #[serde(default = "default_introspection_timeout", with = "humantime_serde")]
    pub introspection_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartupConfig {
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub retry_interval: Duration,

    /// Unset retries forever
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            retry_interval: default_retry_interval(),
            max_attempts: None,
        }
    }
}

impl StartupConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            interval: self.retry_interval,
            max_attempts: self.max_attempts,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// OpenTelemetry OTLP endpoint
    pub otlp_endpoint: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: default_log_level(),
            json_logging: default_json_logging(),
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> Duration { Duration::from_secs(10) }
fn default_access_log_capacity() -> usize { crate::middleware::access_log::DEFAULT_CAPACITY }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_lookup_timeout() -> Duration { Duration::from_secs(2) }
fn default_introspection_path() -> String { DEFAULT_INTROSPECTION_PATH.to_string() }
fn default_introspection_timeout() -> Duration { Duration::from_secs(5) }
fn default_retry_interval() -> Duration { Duration::from_secs(5) }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }

const ENV_PREFIX: &str = "PARROT";

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with the environment layered on top.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}
