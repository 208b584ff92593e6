//! services/api/src/error.rs
//!
//! Startup and infrastructure failures of the discussion service. Request-level
//! failures never reach this type; handlers answer with the HTTP error envelope.

use crate::config::ConfigError;
use forum_core::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An adapter could not be built, e.g. the Redis pool.
    #[error("Adapter error: {0}")]
    Port(#[from] PortError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Binding the listener or serving connections.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("The {0} backend needs {1}")]
    Backend(&'static str, &'static str),
}
