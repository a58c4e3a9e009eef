//! Client Configuration Settings
//!
//! Configuration types for the feed client, loaded from `FEED_CLIENT_*`
//! environment variables. Numeric settings that fail to parse fall back to
//! their defaults; URLs that fail to parse are errors.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use url::Url;

use crate::application::events::DEFAULT_EVENT_CAPACITY;
use crate::infrastructure::feed::connection::{ConnectionConfig, DEFAULT_CONNECT_TIMEOUT};
use crate::infrastructure::feed::heartbeat::HeartbeatConfig;
use crate::infrastructure::feed::outbox::DEFAULT_OUTBOX_CAPACITY;
use crate::infrastructure::feed::probe::derive_health_url;
use crate::infrastructure::feed::reconnect::ReconnectConfig;

const PREFIX: &str = "FEED_CLIENT_";

/// Server port settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

/// What the relay subscribes to on start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSettings {
    /// Identity to connect as (empty = read from the token).
    pub user_id: String,
    /// Symbols to subscribe.
    pub symbols: Vec<String>,
    /// Channels for those symbols.
    pub channels: Vec<String>,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            symbols: Vec::new(),
            channels: vec!["quotes".to_string()],
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Feed WebSocket URL.
    pub ws_url: Url,
    /// Explicit health endpoint; derived from `ws_url` when absent.
    pub health_url: Option<Url>,
    /// Whether to probe the health endpoint before connecting.
    pub probe_enabled: bool,
    /// Transport open timeout.
    pub connect_timeout: Duration,
    /// Backoff policy.
    pub reconnect: ReconnectConfig,
    /// Heartbeat timers.
    pub heartbeat: HeartbeatConfig,
    /// Outbound queue capacity.
    pub outbox_capacity: usize,
    /// Async event stream capacity.
    pub event_capacity: usize,
    /// Server port settings.
    pub server: ServerSettings,
    /// Startup subscriptions.
    pub subscriptions: SubscriptionSettings,
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `FEED_CLIENT_WS_URL` is missing or any URL is
    /// invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from a `.env` style file without touching the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the configuration is
    /// invalid.
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let vars = dotenvy::from_path_iter(path.as_ref())
            .map_err(|e| ConfigError::EnvFile(e.to_string()))?
            .collect::<Result<HashMap<_, _>, _>>()
            .map_err(|e| ConfigError::EnvFile(e.to_string()))?;
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    /// Create configuration from any key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the WebSocket URL is missing or any URL is
    /// invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let ws_url = env.required_url("WS_URL")?;
        let health_url = env.optional_url("HEALTH_URL")?;

        let reconnect_defaults = ReconnectConfig::default();
        let reconnect = ReconnectConfig {
            base_delay: env.duration_millis("RECONNECT_BASE_MS", reconnect_defaults.base_delay),
            max_delay: env.duration_millis("RECONNECT_MAX_MS", reconnect_defaults.max_delay),
            max_jitter: env.duration_millis("RECONNECT_JITTER_MS", reconnect_defaults.max_jitter),
            max_attempts: env.parse("RECONNECT_MAX_ATTEMPTS", reconnect_defaults.max_attempts),
        };

        let heartbeat_defaults = HeartbeatConfig::default();
        let heartbeat = HeartbeatConfig {
            ping_interval: env
                .duration_secs("PING_INTERVAL_SECS", heartbeat_defaults.ping_interval),
            check_interval: env.duration_secs(
                "HEALTH_CHECK_INTERVAL_SECS",
                heartbeat_defaults.check_interval,
            ),
            stale_threshold: env.duration_secs(
                "STALE_THRESHOLD_SECS",
                heartbeat_defaults.stale_threshold,
            ),
        };

        let subscription_defaults = SubscriptionSettings::default();
        let channels = env.list("CHANNELS");
        let subscriptions = SubscriptionSettings {
            user_id: env.get("USER_ID").unwrap_or_default(),
            symbols: env.list("SYMBOLS"),
            channels: if channels.is_empty() {
                subscription_defaults.channels
            } else {
                channels
            },
        };

        Ok(Self {
            ws_url,
            health_url,
            probe_enabled: env.flag("PROBE_ENABLED", false),
            connect_timeout: env.duration_secs("CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT),
            reconnect,
            heartbeat,
            outbox_capacity: env.parse("OUTBOX_CAPACITY", DEFAULT_OUTBOX_CAPACITY),
            event_capacity: env.parse("EVENT_CAPACITY", DEFAULT_EVENT_CAPACITY),
            server: ServerSettings {
                health_port: env.parse("HEALTH_PORT", ServerSettings::default().health_port),
            },
            subscriptions,
        })
    }

    /// Connection tuning derived from this configuration.
    #[must_use]
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.ws_url.clone(),
            connect_timeout: self.connect_timeout,
            reconnect: self.reconnect,
            heartbeat: self.heartbeat,
            outbox_capacity: self.outbox_capacity,
            event_capacity: self.event_capacity,
        }
    }

    /// Health endpoint to probe, or `None` when probing is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if no health URL is configured and none can be
    /// derived from the WebSocket URL.
    pub fn probe_url(&self) -> Result<Option<Url>, ConfigError> {
        if !self.probe_enabled {
            return Ok(None);
        }
        match &self.health_url {
            Some(url) => Ok(Some(url.clone())),
            None => derive_health_url(&self.ws_url)
                .map(Some)
                .map_err(|e| ConfigError::InvalidUrl {
                    key: format!("{PREFIX}HEALTH_URL"),
                    reason: e.to_string(),
                }),
        }
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable is not a valid URL.
    #[error("environment variable {key} is not a valid URL: {reason}")]
    InvalidUrl {
        /// Variable name.
        key: String,
        /// Parse failure.
        reason: String,
    },
    /// `.env` file could not be read.
    #[error("failed to read env file: {0}")]
    EnvFile(String),
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(&format!("{PREFIX}{name}"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required_url(&self, name: &str) -> Result<Url, ConfigError> {
        let key = format!("{PREFIX}{name}");
        match (self.0)(&key) {
            None => Err(ConfigError::MissingEnvVar(key)),
            Some(v) if v.trim().is_empty() => Err(ConfigError::EmptyValue(key)),
            Some(v) => Url::parse(v.trim()).map_err(|e| ConfigError::InvalidUrl {
                key,
                reason: e.to_string(),
            }),
        }
    }

    fn optional_url(&self, name: &str) -> Result<Option<Url>, ConfigError> {
        self.get(name)
            .map(|v| {
                Url::parse(&v).map_err(|e| ConfigError::InvalidUrl {
                    key: format!("{PREFIX}{name}"),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn parse<T: std::str::FromStr>(&self, name: &str, default: T) -> T {
        self.get(name)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn flag(&self, name: &str, default: bool) -> bool {
        self.get(name).map_or(default, |v| {
            matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
        })
    }

    fn duration_secs(&self, name: &str, default: Duration) -> Duration {
        self.get(name)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, name: &str, default: Duration) -> Duration {
        self.get(name)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn list(&self, name: &str) -> Vec<String> {
        self.get(name)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}
