//! Startup configuration for the chat relay.
//!
//! Everything is read from `CHAT_RELAY_*` environment variables once, at
//! startup. The completion API key, endpoint and model are required; a missing
//! or malformed value stops the process before the listener is bound.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::{RelayError, RelayResult};

/// Environment variable holding the completion API bearer token.
pub const API_KEY_ENV: &str = "CHAT_RELAY_API_KEY";
/// Environment variable holding the completion endpoint URL.
pub const API_URL_ENV: &str = "CHAT_RELAY_API_URL";
/// Environment variable holding the completion model name.
pub const MODEL_ENV: &str = "CHAT_RELAY_MODEL";
/// Environment variable overriding the completion request timeout (seconds).
pub const TIMEOUT_ENV: &str = "CHAT_RELAY_TIMEOUT_SECS";
/// Environment variable overriding the connect timeout (seconds).
pub const CONNECT_TIMEOUT_ENV: &str = "CHAT_RELAY_CONNECT_TIMEOUT_SECS";
/// Environment variable overriding the `SQLite` database path.
pub const DB_PATH_ENV: &str = "CHAT_RELAY_DB_PATH";
/// Environment variable overriding the listen port.
pub const PORT_ENV: &str = "CHAT_RELAY_PORT";
/// Environment variable selecting the upstream error policy.
pub const UPSTREAM_ERRORS_ENV: &str = "CHAT_RELAY_UPSTREAM_ERRORS";

/// Default completion request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Default connect timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default server port.
pub const DEFAULT_PORT: u16 = 8080;
/// Default database file.
const DEFAULT_DB_PATH: &str = "chat_relay.sqlite";

/// Top-level relay configuration.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Completion API settings.
    pub completion: CompletionConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// HTTP listener settings.
    pub server: ServerConfig,
    /// How upstream failures are reported to clients.
    pub upstream_errors: UpstreamErrorPolicy,
}

impl RelayConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    /// Returns an error if a required variable is missing or any value is invalid.
    pub fn from_env() -> RelayResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// # Errors
    /// Returns an error if a required key is missing or any value is invalid.
    pub fn from_lookup<F>(lookup: F) -> RelayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let require = |key: &str| {
            get(key).ok_or_else(|| RelayError::InvalidConfig(format!("{key} is required")))
        };

        let completion = CompletionConfig {
            endpoint: Url::parse(&require(API_URL_ENV)?)?,
            api_key: ApiKey::new(require(API_KEY_ENV)?),
            model: require(MODEL_ENV)?,
            request_timeout: parse_secs(get(TIMEOUT_ENV), TIMEOUT_ENV)?
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            connect_timeout: parse_secs(get(CONNECT_TIMEOUT_ENV), CONNECT_TIMEOUT_ENV)?
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        };

        let storage = StorageConfig {
            sqlite_path: get(DB_PATH_ENV).map_or_else(StorageConfig::default_path, PathBuf::from),
        };

        let port: u16 = match get(PORT_ENV) {
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                RelayError::InvalidConfig(format!("{PORT_ENV} is not a port: {raw}"))
            })?,
            None => DEFAULT_PORT,
        };

        let upstream_errors = match get(UPSTREAM_ERRORS_ENV) {
            Some(raw) => raw.parse::<UpstreamErrorPolicy>()?,
            None => UpstreamErrorPolicy::default(),
        };

        let config = Self {
            completion,
            storage,
            server: ServerConfig { port },
            upstream_errors,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> RelayResult<()> {
        if !matches!(self.completion.endpoint.scheme(), "http" | "https") {
            return Err(RelayError::InvalidConfig(format!(
                "{API_URL_ENV} must be an http(s) url"
            )));
        }

        if self.completion.request_timeout.is_zero() {
            return Err(RelayError::InvalidConfig(format!("{TIMEOUT_ENV} must be > 0")));
        }

        if self.completion.connect_timeout.is_zero() {
            return Err(RelayError::InvalidConfig(format!(
                "{CONNECT_TIMEOUT_ENV} must be > 0"
            )));
        }

        Ok(())
    }
}

fn parse_secs(raw: Option<String>, key: &str) -> RelayResult<Option<Duration>> {
    raw.map(|value| {
        value
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| RelayError::InvalidConfig(format!("{key} must be whole seconds: {value}")))
    })
    .transpose()
}

/// Completion API settings.
#[derive(Clone, Debug)]
pub struct CompletionConfig {
    /// Full URL the chat completion request is posted to.
    pub endpoint: Url,
    /// Bearer token.
    pub api_key: ApiKey,
    /// Model name sent with every request.
    pub model: String,
    /// Upper bound for one completion round trip.
    pub request_timeout: Duration,
    /// Upper bound for establishing the connection.
    pub connect_timeout: Duration,
}

impl CompletionConfig {
    /// Build completion settings with default timeouts.
    #[must_use]
    pub fn new(endpoint: Url, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint,
            api_key: ApiKey::new(api_key),
            model: model.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Bearer token whose `Debug` output never shows the secret.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a raw token.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the raw token for the `Authorization` header.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Storage configuration.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
}

impl StorageConfig {
    fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_DB_PATH)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: Self::default_path(),
        }
    }
}

/// HTTP listener configuration.
#[derive(Clone, Copy, Debug)]
pub struct ServerConfig {
    /// TCP port bound on all interfaces.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

/// How a failed completion call is reported on `POST /api/chat`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum UpstreamErrorPolicy {
    /// Non-2xx status with a JSON error body.
    #[default]
    Strict,
    /// HTTP 200 whose `reply` carries the legacy warning text.
    Compat,
}

impl FromStr for UpstreamErrorPolicy {
    type Err = RelayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "compat" => Ok(Self::Compat),
            other => Err(RelayError::InvalidConfig(format!(
                "{UPSTREAM_ERRORS_ENV} must be `strict` or `compat`, got `{other}`"
            ))),
        }
    }
}
