//! Client configuration.
//!
//! Configuration can be built in code, parsed from TOML or read from the
//! environment:
//! - `TRANSLOADIT_KEY` / `TRANSLOADIT_SECRET`: credentials (required)
//! - `TRANSLOADIT_ENDPOINT`: API base URL (optional)

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use transloadit_protocol::constants::{CLIENT_NAME, DEFAULT_ENDPOINT};
use transloadit_protocol::{Credentials, SignatureAlgorithm};

const ENV_KEY: &str = "TRANSLOADIT_KEY";
const ENV_SECRET: &str = "TRANSLOADIT_SECRET";
const ENV_ENDPOINT: &str = "TRANSLOADIT_ENDPOINT";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Client configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub auth_key: String,

    pub auth_secret: String,

    /// API base URL, without a trailing slash.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Retries after a rate-limited response before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between completion polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Completion wait timeout in seconds when a request sets none.
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,

    #[serde(default)]
    pub signature_algorithm: SignatureAlgorithm,

    /// Name sent in the client-identification header.
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.into()
}

fn default_max_retries() -> u32 {
    5
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_client_name() -> String {
    CLIENT_NAME.into()
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("auth_key", &self.auth_key)
            .field("auth_secret", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("max_retries", &self.max_retries)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("default_timeout_secs", &self.default_timeout_secs)
            .field("signature_algorithm", &self.signature_algorithm)
            .field("client_name", &self.client_name)
            .finish()
    }
}

impl ClientConfig {
    /// Creates a configuration with default settings.
    pub fn new(auth_key: impl Into<String>, auth_secret: impl Into<String>) -> Self {
        Self {
            auth_key: auth_key.into(),
            auth_secret: auth_secret.into(),
            endpoint: default_endpoint(),
            max_retries: default_max_retries(),
            poll_interval_ms: default_poll_interval_ms(),
            default_timeout_secs: None,
            signature_algorithm: SignatureAlgorithm::default(),
            client_name: default_client_name(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_signature_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.signature_algorithm = algorithm;
        self
    }

    /// Parses a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Reads credentials and endpoint from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key = lookup(ENV_KEY).ok_or(ConfigError::Missing(ENV_KEY))?;
        let secret = lookup(ENV_SECRET).ok_or(ConfigError::Missing(ENV_SECRET))?;
        let mut config = Self::new(key, secret);
        if let Some(endpoint) = lookup(ENV_ENDPOINT).filter(|e| !e.is_empty()) {
            config.endpoint = endpoint;
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks the settings a client cannot work without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth_key.is_empty() {
            return Err(ConfigError::Missing("auth_key"));
        }
        if self.auth_secret.is_empty() {
            return Err(ConfigError::Missing("auth_secret"));
        }
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                field: "endpoint",
                reason: format!("not an http(s) URL: {}", self.endpoint),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_ms",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            key: self.auth_key.clone(),
            secret: self.auth_secret.clone(),
        }
    }

    /// Endpoint with any trailing slash removed.
    pub fn base_url(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_secs.map(Duration::from_secs)
    }

    /// Value of the client-identification header.
    pub fn client_header_value(&self) -> String {
        format!("{}:{}", self.client_name, env!("CARGO_PKG_VERSION"))
    }
}
