//! services/api/src/adapters/cache.rs
//!
//! Implementations of the `CacheService` port: a process-local cache for a
//! single instance, a Redis-backed one shared between instances, and a
//! timeout decorator for either.

use async_trait::async_trait;
use dashmap::DashMap;
use forum_core::ports::{CacheService, PortResult, RateDecision, TokenBucket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

//=========================================================================================
// In-Process Cache
//=========================================================================================

/// Writes between two sweeps of expired entries.
const SWEEP_EVERY: u64 = 1024;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
    /// Instant at which the bucket is back to capacity.
    full_at: Instant,
}

/// Markers, locks and token buckets held in concurrent maps.
#[derive(Default)]
pub struct MemoryCache {
    markers: DashMap<String, Instant>,
    buckets: DashMap<String, Bucket>,
    writes: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops expired markers and buckets that have refilled, returning how many went.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.markers.len() + self.buckets.len();
        self.markers.retain(|_, expires_at| *expires_at > now);
        self.buckets.retain(|_, bucket| bucket.full_at > now);
        before.saturating_sub(self.markers.len() + self.buckets.len())
    }

    /// Called with no map guard held.
    fn note_write(&self) {
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            let evicted = self.evict_expired();
            tracing::trace!(evicted, "Swept in-process cache.");
        }
    }

    fn claim(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut created = false;
        self.markers
            .entry(key.to_string())
            .and_modify(|expires_at| {
                if *expires_at <= now {
                    *expires_at = now + ttl;
                    created = true;
                }
            })
            .or_insert_with(|| {
                created = true;
                now + ttl
            });
        self.note_write();
        created
    }

    fn take(&self, key: &str, bucket: TokenBucket) -> RateDecision {
        let now = Instant::now();
        let capacity = f64::from(bucket.capacity);
        let per_token = bucket.refill_interval_secs();
        let mut state = self.buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: capacity,
            refilled_at: now,
            full_at: now,
        });

        let elapsed = now.duration_since(state.refilled_at).as_secs_f64();
        if per_token > 0.0 {
            state.tokens = (state.tokens + elapsed / per_token).min(capacity);
        }
        state.refilled_at = now;

        let decision = if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            RateDecision { allowed: true, retry_after_secs: 0 }
        } else {
            RateDecision {
                allowed: false,
                retry_after_secs: ((1.0 - state.tokens) * per_token).ceil() as u64,
            }
        };
        let missing = ((capacity - state.tokens) * per_token).max(0.0);
        state.full_at = now + Duration::from_secs_f64(missing);
        decision
    }
}

#[async_trait]
impl CacheService for MemoryCache {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> PortResult<bool> {
        Ok(self.claim(key, ttl))
    }

    async fn take_token(&self, key: &str, bucket: TokenBucket) -> PortResult<RateDecision> {
        let decision = self.take(key, bucket);
        self.note_write();
        Ok(decision)
    }

    async fn try_lock(&self, key: &str, ttl: Duration) -> PortResult<bool> {
        Ok(self.claim(&format!("lock:{key}"), ttl))
    }

    async fn unlock(&self, key: &str) -> PortResult<()> {
        self.markers.remove(&format!("lock:{key}"));
        Ok(())
    }
}

//=========================================================================================
// Redis Cache
//=========================================================================================

#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;

#[cfg(feature = "redis")]
mod redis_cache {
    use super::*;
    use deadpool_redis::redis::cmd;
    use forum_core::ports::PortError;
    use deadpool_redis::{Config as PoolConfig, Connection, Pool, Runtime};

    /// Shared cache. Token buckets are approximated by a counter per window.
    #[derive(Clone)]
    pub struct RedisCache {
        pool: Pool,
    }

    impl RedisCache {
        pub fn connect(url: &str) -> PortResult<Self> {
            let pool = PoolConfig::from_url(url)
                .create_pool(Some(Runtime::Tokio1))
                .map_err(|e| PortError::Unavailable(format!("redis pool: {e}")))?;
            Ok(Self { pool })
        }

        async fn conn(&self) -> PortResult<Connection> {
            self.pool
                .get()
                .await
                .map_err(|e| PortError::Unavailable(format!("redis connection: {e}")))
        }

        async fn set_nx(&self, key: &str, ttl: Duration) -> PortResult<bool> {
            let mut conn = self.conn().await?;
            let reply: Option<String> = cmd("SET")
                .arg(key)
                .arg(1)
                .arg("NX")
                .arg("PX")
                .arg(ttl.as_millis().max(1) as u64)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;
            Ok(reply.is_some())
        }
    }

    fn unavailable(err: deadpool_redis::redis::RedisError) -> PortError {
        PortError::Unavailable(format!("redis: {err}"))
    }

    #[async_trait]
    impl CacheService for RedisCache {
        async fn set_if_absent(&self, key: &str, ttl: Duration) -> PortResult<bool> {
            self.set_nx(key, ttl).await
        }

        async fn take_token(&self, key: &str, bucket: TokenBucket) -> PortResult<RateDecision> {
            let mut conn = self.conn().await?;
            let key = format!("bucket:{key}");
            let count: u64 = cmd("INCR").arg(&key).query_async(&mut conn).await.map_err(unavailable)?;
            if count == 1 {
                let _: i64 = cmd("PEXPIRE")
                    .arg(&key)
                    .arg(bucket.window.as_millis() as u64)
                    .query_async(&mut conn)
                    .await
                    .map_err(unavailable)?;
            }
            if count <= u64::from(bucket.capacity) {
                return Ok(RateDecision { allowed: true, retry_after_secs: 0 });
            }
            let ttl_ms: i64 = cmd("PTTL").arg(&key).query_async(&mut conn).await.map_err(unavailable)?;
            Ok(RateDecision {
                allowed: false,
                retry_after_secs: (ttl_ms.max(0) as u64).div_ceil(1000),
            })
        }

        async fn try_lock(&self, key: &str, ttl: Duration) -> PortResult<bool> {
            self.set_nx(&format!("lock:{key}"), ttl).await
        }

        async fn unlock(&self, key: &str) -> PortResult<()> {
            let mut conn = self.conn().await?;
            let _: i64 = cmd("DEL")
                .arg(format!("lock:{key}"))
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;
            Ok(())
        }
    }
}

//=========================================================================================
// Timeout Decorator
//=========================================================================================

/// Bounds every cache call; an elapsed deadline surfaces as `PortError::Timeout`.
pub struct TimedCache {
    inner: Arc<dyn CacheService>,
    timeout: Duration,
}

impl TimedCache {
    pub fn new(inner: Arc<dyn CacheService>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl CacheService for TimedCache {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> PortResult<bool> {
        super::with_timeout("cache", self.timeout, self.inner.set_if_absent(key, ttl)).await
    }

    async fn take_token(&self, key: &str, bucket: TokenBucket) -> PortResult<RateDecision> {
        super::with_timeout("cache", self.timeout, self.inner.take_token(key, bucket)).await
    }

    async fn try_lock(&self, key: &str, ttl: Duration) -> PortResult<bool> {
        super::with_timeout("cache", self.timeout, self.inner.try_lock(key, ttl)).await
    }

    async fn unlock(&self, key: &str) -> PortResult<()> {
        super::with_timeout("cache", self.timeout, self.inner.unlock(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn markers_are_created_once_until_they_expire() {
        let cache = MemoryCache::new();
        assert!(cache.set_if_absent("view:1:2", Duration::from_secs(60)).await.unwrap());
        assert!(!cache.set_if_absent("view:1:2", Duration::from_secs(60)).await.unwrap());

        assert!(cache.set_if_absent("short", Duration::ZERO).await.unwrap());
        assert!(cache.set_if_absent("short", Duration::ZERO).await.unwrap());
    }

    #[tokio::test]
    async fn bucket_runs_dry_and_reports_a_wait() {
        let cache = MemoryCache::new();
        let bucket = TokenBucket::per_hour(2);
        assert!(cache.take_token("rate:1:report", bucket).await.unwrap().allowed);
        assert!(cache.take_token("rate:1:report", bucket).await.unwrap().allowed);

        let denied = cache.take_token("rate:1:report", bucket).await.unwrap();
        assert!(!denied.allowed);
        assert!(denied.retry_after_secs > 0 && denied.retry_after_secs <= 1800);

        assert!(cache.take_token("rate:2:report", bucket).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn locks_are_exclusive_until_released() {
        let cache = MemoryCache::new();
        assert!(cache.try_lock("trust:7", Duration::from_secs(30)).await.unwrap());
        assert!(!cache.try_lock("trust:7", Duration::from_secs(30)).await.unwrap());
        cache.unlock("trust:7").await.unwrap();
        assert!(cache.try_lock("trust:7", Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    async fn expired_markers_do_not_accumulate() {
        let cache = MemoryCache::new();
        for n in 0..10_000 {
            cache.set_if_absent(&format!("view:1:{n}"), Duration::ZERO).await.unwrap();
        }
        assert!(cache.markers.len() < SWEEP_EVERY as usize);

        cache.set_if_absent("view:2:1", Duration::from_secs(60)).await.unwrap();
        cache.evict_expired();
        assert_eq!(cache.markers.len(), 1);
        assert!(cache.markers.contains_key("view:2:1"));
    }

    #[tokio::test]
    async fn drained_buckets_survive_a_sweep_until_refilled() {
        let cache = MemoryCache::new();
        let bucket = TokenBucket::per_hour(1);
        assert!(cache.take_token("rate:1:topic", bucket).await.unwrap().allowed);
        cache.evict_expired();
        assert!(!cache.take_token("rate:1:topic", bucket).await.unwrap().allowed);

        let instant = TokenBucket {
            capacity: 1,
            window: Duration::ZERO,
        };
        cache.take_token("rate:2:topic", instant).await.unwrap();
        cache.evict_expired();
        assert!(cache.buckets.contains_key("rate:1:topic"));
        assert!(!cache.buckets.contains_key("rate:2:topic"));
    }
}
