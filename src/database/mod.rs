//! # Database Module
//!
//! PostgreSQL integration using tokio-postgres and deadpool.
//! Includes connection management, row models, and refinery migrations.

pub mod connection;
pub mod models;
pub mod migrations;

pub use connection::{DatabaseConfig, DatabaseConnection};
