//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use forum_core::domain::ReactionPolicy;
use forum_core::settings::ForumSettings;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which store implementation backs the service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("'{other}' is not one of postgres, memory")),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub store_backend: StoreBackend,
    /// Required for the postgres backend only.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub log_level: Level,
    pub jwt_secret: String,
    pub redis_url: Option<String>,
    pub cors_origin: Option<String>,
    pub store_timeout: Duration,
    pub cache_timeout: Duration,
    pub notifier_timeout: Duration,
    pub worker_partitions: u32,
    pub forum: ForumSettings,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // --- Server and Store ---
        let bind_address = parse_or(&lookup, "BIND_ADDRESS", SocketAddr::from(([0, 0, 0, 0], 3000)))?;
        let store_backend = parse_or(&lookup, "STORE_BACKEND", StoreBackend::Postgres)?;
        let database_url = lookup("DATABASE_URL");
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingVar("DATABASE_URL".to_string()));
        }
        let database_max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let jwt_secret = lookup("JWT_SECRET").ok_or_else(|| ConfigError::MissingVar("JWT_SECRET".to_string()))?;
        let redis_url = lookup("REDIS_URL");
        let cors_origin = lookup("CORS_ORIGIN");

        // --- Collaborator Timeouts ---
        let store_timeout = Duration::from_millis(parse_or(&lookup, "STORE_TIMEOUT_MS", 5_000)?);
        let cache_timeout = Duration::from_millis(parse_or(&lookup, "CACHE_TIMEOUT_MS", 500)?);
        let notifier_timeout = Duration::from_millis(parse_or(&lookup, "NOTIFIER_TIMEOUT_MS", 2_000)?);

        // --- Workers ---
        let worker_partitions: u32 = parse_or(&lookup, "WORKER_PARTITIONS", 4)?;
        if worker_partitions == 0 {
            return Err(ConfigError::InvalidValue(
                "WORKER_PARTITIONS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        // --- Discussion Tunables ---
        let mut forum = ForumSettings::default();
        forum.retry.max_attempts = parse_or(&lookup, "WORKER_MAX_ATTEMPTS", forum.retry.max_attempts)?;
        if let Some(minutes) = parse_opt::<i64>(&lookup, "VIEW_DEDUPE_MINUTES")? {
            forum.view_dedupe_window = chrono::Duration::minutes(minutes);
        }
        forum.max_body_bytes = parse_or(&lookup, "MAX_BODY_BYTES", forum.max_body_bytes)?;
        forum.auto_topic_category_id = parse_opt(&lookup, "AUTO_TOPIC_CATEGORY_ID")?;
        forum.system_user_id = parse_or(&lookup, "SYSTEM_USER_ID", forum.system_user_id)?;
        if let Some(policy) = lookup("REACTION_POLICY") {
            forum.reaction_policy = policy
                .parse::<ReactionPolicy>()
                .map_err(|e| ConfigError::InvalidValue("REACTION_POLICY".to_string(), e.to_string()))?;
        }
        if let Some(minutes) = parse_opt::<i64>(&lookup, "QUEUE_STALE_MINUTES")? {
            forum.queue_stale_after = chrono::Duration::minutes(minutes);
        }
        if let Some(minutes) = parse_opt::<i64>(&lookup, "TRUST_RECALC_MINUTES")? {
            forum.trust.recalculation_interval = chrono::Duration::minutes(minutes);
        }

        Ok(Self {
            bind_address,
            store_backend,
            database_url,
            database_max_connections,
            log_level,
            jwt_secret,
            redis_url,
            cors_origin,
            store_timeout,
            cache_timeout,
            notifier_timeout,
            worker_partitions,
            forum,
        })
    }
}

fn parse_opt<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
        })
        .transpose()
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_opt(lookup, name)?.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn memory_backend_needs_no_database() {
        let config = load(&[("STORE_BACKEND", "memory"), ("JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.worker_partitions, 4);
        assert_eq!(config.bind_address.port(), 3000);
    }

    #[test]
    fn postgres_backend_requires_a_database_url() {
        let err = load(&[("JWT_SECRET", "s3cret")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(var) if var == "DATABASE_URL"));
    }

    #[test]
    fn discussion_overrides_reach_the_settings() {
        let config = load(&[
            ("STORE_BACKEND", "memory"),
            ("JWT_SECRET", "s3cret"),
            ("VIEW_DEDUPE_MINUTES", "5"),
            ("AUTO_TOPIC_CATEGORY_ID", "12"),
            ("REACTION_POLICY", "singleKind"),
            ("WORKER_MAX_ATTEMPTS", "8"),
        ])
        .unwrap();
        assert_eq!(config.forum.view_dedupe_window, chrono::Duration::minutes(5));
        assert_eq!(config.forum.auto_topic_category_id, Some(12));
        assert_eq!(config.forum.reaction_policy, ReactionPolicy::SingleKind);
        assert_eq!(config.forum.retry.max_attempts, 8);
    }

    #[test]
    fn malformed_values_name_the_variable() {
        let err = load(&[("STORE_BACKEND", "memory"), ("JWT_SECRET", "x"), ("WORKER_PARTITIONS", "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(var, _) if var == "WORKER_PARTITIONS"));
    }

    #[test]
    fn unset_tunables_fall_back_to_defaults() {
        let config = load(&[("STORE_BACKEND", "memory"), ("JWT_SECRET", "x")]).unwrap();
        assert_eq!(config.bind_address, SocketAddr::from(([0, 0, 0, 0], 3000)));
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.store_timeout, Duration::from_millis(5_000));
        assert_eq!(config.cache_timeout, Duration::from_millis(500));
        assert_eq!(config.notifier_timeout, Duration::from_millis(2_000));
        assert_eq!(config.forum.max_body_bytes, ForumSettings::default().max_body_bytes);

        let config = load(&[
            ("STORE_BACKEND", "memory"),
            ("JWT_SECRET", "x"),
            ("BIND_ADDRESS", "127.0.0.1:8080"),
            ("CACHE_TIMEOUT_MS", "250"),
        ])
        .unwrap();
        assert_eq!(config.bind_address.port(), 8080);
        assert_eq!(config.cache_timeout, Duration::from_millis(250));
    }
}
