//! services/api/src/adapters/mod.rs
//!
//! Concrete implementations of the ports declared in `forum_core::ports`.

pub mod auth;
pub mod cache;
pub mod clock;
pub mod db;
pub mod directory;
pub mod memory;
pub mod notifier;

pub use auth::JwtAuthenticator;
pub use cache::{MemoryCache, TimedCache};
pub use clock::ManualClock;
pub use db::PgStore;
pub use directory::StaticDirectory;
pub use memory::MemoryStore;
pub use notifier::{LogNotifier, RecordingNotifier, TimedNotifier};

#[cfg(feature = "redis")]
pub use cache::RedisCache;

use forum_core::ports::{PortError, PortResult};
use std::future::Future;
use std::time::Duration;

/// Runs `fut` under a deadline; an elapsed deadline becomes `PortError::Timeout`.
pub(crate) async fn with_timeout<T>(
    what: &str,
    limit: Duration,
    fut: impl Future<Output = PortResult<T>>,
) -> PortResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(PortError::Timeout(what.to_string())),
    }
}
