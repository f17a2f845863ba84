//! # Services Module
//!
//! Domain logic shared by the route handlers:
//! - `users`: registration, authentication and profile updates
//! - `images`: recipe image validation and storage

pub mod images;
pub mod users;
