//! threadit backend
//!
//! REST backend for a link aggregator: communities, posts, comments and votes,
//! persisted in SQLite, with popular posts snapshotted to Redis.

mod api;
mod auth;
mod cache;
mod config;
mod db;
mod errors;
mod models;
mod validation;
mod votes;

use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cache::{CacheStore, MemoryCache, RedisCache};
use config::{Config, LogFormat};
use db::StoreHandle;
use votes::VoteLocks;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: StoreHandle,
    pub cache: Arc<dyn CacheStore>,
    pub vote_locks: Arc<VoteLocks>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.log_format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }

    tracing::info!("Starting threadit backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Store mode: {:?}", config.store_mode);
    tracing::info!("Bind address: {}", config.bind_addr);
    tracing::info!(
        "Posts are cached above {} votes",
        config.cache_after_upvotes
    );

    // Initialize database
    let store = StoreHandle::open(&config.db_path, config.store_mode).await?;

    // Initialize cache
    let cache: Arc<dyn CacheStore> = match &config.redis_url {
        Some(url) => match RedisCache::connect(url).await {
            Ok(redis) => {
                tracing::info!("Connected to Redis cache");
                Arc::new(redis)
            }
            Err(e) => {
                tracing::warn!("Redis unavailable ({}), using in-process cache", e);
                Arc::new(MemoryCache::new())
            }
        },
        None => {
            tracing::warn!("No THREADIT_REDIS_URL configured, using in-process cache");
            Arc::new(MemoryCache::new())
        }
    };

    // Create application state
    let state = AppState {
        store,
        cache,
        vote_locks: Arc::new(VoteLocks::new()),
        config: Arc::new(config.clone()),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shut down");
    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // API routes
    let api_routes = Router::new()
        // Subreddits
        .route("/subreddit", post(api::create_subreddit))
        .route("/subreddit/{name}", get(api::get_subreddit))
        .route("/subreddit/subscribe", post(api::subscribe))
        .route("/subreddit/unsubscribe", post(api::unsubscribe))
        // Posts
        .route("/subreddit/post/create", post(api::create_post))
        .route("/subreddit/post/vote", patch(api::vote_post))
        .route("/subreddit/post/comment", patch(api::create_comment))
        .route("/posts", get(api::list_posts))
        .route("/posts/{id}", get(api::get_post))
        .route("/posts/{id}/comments", get(api::list_comments));

    // Health check
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
