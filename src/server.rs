//! # Server Module
//!
//! Application state, router assembly and the HTTP server lifecycle.

use anyhow::{Context, Result};
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::get,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::jwt::JwtService;
use crate::auth::middleware::AuthMiddleware;
use crate::config::{Config, StorageBackend};
use crate::database::{DatabaseConfig, DatabaseConnection};
use crate::error::ApiError;
use crate::routes::{attributes, health::ping, recipes, users};
use crate::services::images::ImageStorage;
use crate::services::users::ensure_superuser;
use crate::store::{MemoryStore, Store};

/// Application state shared across all route handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub jwt_service: Arc<JwtService>,
    pub images: Arc<ImageStorage>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn Store>) -> Self {
        let jwt_service = JwtService::new(&config.auth.jwt_secret, config.auth.token_ttl_hours);
        let images = ImageStorage::new(&config.media);
        Self {
            config: Arc::new(config),
            store,
            jwt_service: Arc::new(jwt_service),
            images: Arc::new(images),
        }
    }
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
        ])
        .allow_credentials(true) // Allow cookies for auth
}

/// Assemble every route over the given state
pub fn build_router(state: AppState) -> Router {
    // Everything except registration, login and /ping requires a token.
    // The 405 fallback is set before the auth layer so it runs after authentication.
    let private_routes = Router::new()
        .merge(users::private_routes())
        .merge(attributes::create_routes())
        .merge(recipes::create_routes(state.config.media.max_upload_bytes))
        .method_not_allowed_fallback(method_not_allowed)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            AuthMiddleware::validate_token,
        ));

    Router::new()
        .route("/ping", get(ping))
        .merge(users::public_routes())
        .merge(private_routes)
        .method_not_allowed_fallback(method_not_allowed)
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config.server.cors_origins)),
        )
        .with_state(state)
}

async fn connect_store(config: &Config) -> Result<Arc<dyn Store>> {
    match config.storage {
        StorageBackend::Memory => {
            tracing::warn!("Using the in-memory store, data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageBackend::Postgres => {
            let db_config = DatabaseConfig::from_settings(&config.database)?;
            let db = DatabaseConnection::new(db_config)
                .await
                .context("Failed to connect to the database")?;
            db.migrate().await?;

            let stats = db.stats();
            tracing::info!("Database pool ready (size={}, idle={})", stats.size, stats.idle);
            Ok(Arc::new(db))
        }
    }
}

/// Starts the recipe API server.
///
/// Loads configuration, connects the store, creates the configured superuser
/// and serves until the process is terminated.
pub async fn start() -> Result<()> {
    let config = Config::from_env()?;

    let store = connect_store(&config).await?;
    if let Some(superuser) = &config.superuser {
        ensure_superuser(store.as_ref(), superuser).await?;
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(config, store);
    let app = build_router(state);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}, the port may already be in use"))?;

    tracing::info!("Listening on http://{}", addr);
    tracing::info!("Health check available at http://{}/ping", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
