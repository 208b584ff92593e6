//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{JwtAuthenticator, LogNotifier, MemoryCache, MemoryStore, PgStore, StaticDirectory, TimedCache, TimedNotifier},
    config::{Config, StoreBackend},
    error::ApiError,
    web::{self, state::AppState},
    workers::{spawn_workers, WorkerIntervals},
};
use chrono::Utc;
use forum_core::ports::{
    AttachmentInspector, CacheService, ContentMetadataService, DiscussionStore, SystemClock, UserDirectory,
};
use forum_core::{Forum, Ports};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The store plus the identity and book-content collaborators that come with it.
struct Backend {
    store: Arc<dyn DiscussionStore>,
    users: Arc<dyn UserDirectory>,
    content: Arc<dyn ContentMetadataService>,
    attachments: Arc<dyn AttachmentInspector>,
}

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!(backend = ?config.store_backend, "Configuration loaded. Starting server...");

    // --- 2. Open the Store ---
    let backend = open_backend(&config).await?;

    // --- 3. Cache and Delivery ---
    let cache = TimedCache::new(shared_cache(&config)?, config.cache_timeout);
    let notifier = TimedNotifier::new(Arc::new(LogNotifier), config.notifier_timeout);

    // --- 4. Assemble the Discussion Core ---
    let ports = Ports {
        store: backend.store,
        cache: Arc::new(cache),
        notifier: Arc::new(notifier),
        content: backend.content,
        users: backend.users,
        attachments: backend.attachments,
        clock: Arc::new(SystemClock),
    };
    let forum = Forum::new(ports, config.forum.clone());

    // --- 5. Background Workers ---
    let shutdown = CancellationToken::new();
    let workers = spawn_workers(
        forum.clone(),
        config.worker_partitions,
        WorkerIntervals::default(),
        shutdown.clone(),
    );

    // --- 6. Create the Web Router ---
    let app_state = Arc::new(AppState {
        forum,
        auth: Arc::new(JwtAuthenticator::new(&config.jwt_secret)),
        config: config.clone(),
    });
    let app = web::router(app_state);

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!("Swagger UI available at http://{}/swagger-ui", config.bind_address);
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Could not listen for the shutdown signal");
            }
            info!("Shutdown requested");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    for outcome in futures::future::join_all(workers).await {
        if let Err(e) = outcome {
            warn!(error = %e, "Worker ended abnormally");
        }
    }
    info!("Server stopped");
    Ok(())
}

async fn open_backend(config: &Config) -> Result<Backend, ApiError> {
    match config.store_backend {
        StoreBackend::Memory => {
            warn!("Using the in-memory store; all data is lost on exit");
            let directory = Arc::new(StaticDirectory::permissive(Utc::now()));
            Ok(Backend {
                store: Arc::new(MemoryStore::new()),
                users: directory.clone(),
                content: directory.clone(),
                attachments: directory,
            })
        }
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or(ApiError::Backend("postgres", "DATABASE_URL"))?;
            info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .acquire_timeout(config.store_timeout)
                .connect(url)
                .await?;
            let store = Arc::new(PgStore::new(pool));
            info!("Running database migrations...");
            store.run_migrations().await?;
            info!("Database migrations complete.");
            Ok(Backend {
                store: store.clone(),
                users: store.clone(),
                content: store,
                attachments: Arc::new(StaticDirectory::new()),
            })
        }
    }
}

#[cfg(feature = "redis")]
fn shared_cache(config: &Config) -> Result<Arc<dyn CacheService>, ApiError> {
    match config.redis_url.as_deref() {
        Some(url) => {
            info!("Using Redis for the cache and rate limits");
            Ok(Arc::new(api_lib::adapters::RedisCache::connect(url)?))
        }
        None => Ok(Arc::new(MemoryCache::new())),
    }
}

#[cfg(not(feature = "redis"))]
fn shared_cache(config: &Config) -> Result<Arc<dyn CacheService>, ApiError> {
    if config.redis_url.is_some() {
        warn!("REDIS_URL is set but the `redis` feature is disabled; using the in-memory cache");
    }
    Ok(Arc::new(MemoryCache::new()))
}
