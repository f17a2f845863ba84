//! # Recipe Server
//!
//! REST backend for personal recipe collections, built with Axum and Tokio.
//! Users register, obtain a token and manage their own recipes, tags and
//! ingredients. Nothing one user creates is visible to another.
//!
//! ## Architecture
//! - `server`: application state, router and server lifecycle
//! - `config`: environment variable configuration
//! - `auth`: password hashing, tokens and the auth middleware
//! - `store`: storage traits with postgres and in-memory backends
//! - `database`: connection pool, row models and migrations
//! - `services`: user accounts and recipe image storage
//! - `routes`: HTTP handlers per resource
//!
//! ## Running the Server
//! ```bash
//! cp .env.example .env
//! cargo run
//! ```
//!
//! Set `STORAGE_BACKEND=memory` to run without PostgreSQL.

mod auth;
mod config;
mod database;
mod error;
mod routes;
mod server;
mod services;
mod store;

#[cfg(test)]
mod test_support;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false) // Don't show module targets for cleaner output
                .compact(),
        )
        .init();

    tracing::info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    tracing::info!("Build profile: {}", if cfg!(debug_assertions) { "debug" } else { "release" });

    if let Err(e) = server::start().await {
        tracing::error!("Server failed: {:#}", e);
        std::process::exit(1);
    }
}
