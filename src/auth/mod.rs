//! # Authentication Module
//!
//! Password hashing, token issuance and validation, and the middleware that
//! resolves the requesting user for protected endpoints.

pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
