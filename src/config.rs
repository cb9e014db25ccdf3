//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::error::Result;

/// Prefix for environment variable overrides, e.g. `TOLLGATE__LIMITER__MAX_HITS=20`.
pub const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting policy configuration
    #[serde(default)]
    pub limiter: LimiterConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

/// Where the limiter takes a caller's key from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// The peer address of the connection.
    #[default]
    Peer,
    /// `X-Forwarded-For` / `X-Real-IP`, for deployments behind a proxy.
    ForwardedFor,
}

/// Rate limiting configuration.
///
/// Numeric fields are kept signed as read from the file. Zero or negative
/// values are replaced by defaults when the policy is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Window length in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: i64,

    /// Hits permitted per key per window
    #[serde(default = "default_max_hits")]
    pub max_hits: i64,

    /// Status code sent on rejection
    #[serde(default = "default_status_code")]
    pub status_code: i64,

    /// Body sent on rejection
    #[serde(default = "default_message")]
    pub message: String,

    /// How the key is derived from a request
    #[serde(default)]
    pub key_source: KeySource,

    /// Request path prefixes that skip limiting entirely
    #[serde(default)]
    pub bypass_paths: Vec<String>,

    /// Remove expired entries on sweep instead of zeroing them
    #[serde(default)]
    pub evict_expired: bool,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            max_hits: default_max_hits(),
            status_code: default_status_code(),
            message: default_message(),
            key_source: KeySource::default(),
            bypass_paths: Vec::new(),
            evict_expired: false,
        }
    }
}

fn default_window_seconds() -> i64 {
    crate::ratelimit::DEFAULT_WINDOW_SECONDS as i64
}

fn default_max_hits() -> i64 {
    crate::ratelimit::DEFAULT_MAX_HITS as i64
}

fn default_status_code() -> i64 {
    crate::ratelimit::DEFAULT_STATUS_CODE as i64
}

fn default_message() -> String {
    crate::ratelimit::DEFAULT_MESSAGE.to_string()
}

impl TollgateConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load layered configuration: defaults, then the optional YAML file,
    /// then `TOLLGATE__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("limiter.bypass_paths"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
