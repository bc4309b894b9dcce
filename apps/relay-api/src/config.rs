use std::time::Duration;

use relay_common::MAX_WORKER_ID;

/// Relay configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// PostgreSQL connection string. When unset, messages are kept in memory.
    pub database_url: Option<String>,
    /// Base URL of the user directory used to resolve display names.
    pub directory_url: Option<String>,
    /// Origins allowed to open gateway connections and call the HTTP API.
    pub allowed_origins: Vec<String>,
    /// Upper bound on a single display-name lookup.
    pub identity_timeout: Duration,
    /// Maximum message body length in characters, after trimming.
    pub max_message_len: usize,
    /// Heartbeat interval advertised to clients in READY (ms).
    pub heartbeat_interval_ms: u64,
    /// Worker bits embedded in message ids.
    pub worker_id: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4000,
            database_url: None,
            directory_url: None,
            allowed_origins: vec!["http://localhost:5173".to_string()],
            identity_timeout: Duration::from_millis(2000),
            max_message_len: 4000,
            heartbeat_interval_ms: 41250,
            worker_id: 0,
        }
    }
}

/// A configuration value that is present but unusable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got {value:?}")]
    NotPositive { name: &'static str, value: String },
    #[error("WORKER_ID must be at most {max}, got {value}")]
    WorkerIdOutOfRange { value: u64, max: u16 },
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|s| !s.trim().is_empty());
        let parsed = |name: &str| var(name).and_then(|v| v.trim().parse::<u64>().ok());
        let positive = |name: &'static str| match parsed(name) {
            Some(0) => Err(ConfigError::NotPositive {
                name,
                value: var(name).unwrap_or_default(),
            }),
            other => Ok(other),
        };

        let worker_id = match parsed("WORKER_ID") {
            Some(value) => u16::try_from(value)
                .ok()
                .filter(|id| *id <= MAX_WORKER_ID)
                .ok_or(ConfigError::WorkerIdOutOfRange {
                    value,
                    max: MAX_WORKER_ID,
                })?,
            None => defaults.worker_id,
        };

        Ok(Self {
            port: var("PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.port),
            database_url: var("DATABASE_URL"),
            directory_url: var("DIRECTORY_URL"),
            allowed_origins: var("ALLOWED_ORIGINS")
                .map(|v| parse_origins(&v))
                .unwrap_or(defaults.allowed_origins),
            identity_timeout: positive("IDENTITY_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.identity_timeout),
            max_message_len: positive("MAX_MESSAGE_LEN")?
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(defaults.max_message_len),
            heartbeat_interval_ms: positive("HEARTBEAT_INTERVAL_MS")?
                .unwrap_or(defaults.heartbeat_interval_ms),
            worker_id,
        })
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
