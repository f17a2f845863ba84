// # Routes Module
//
// HTTP route handlers, grouped by the resource they serve.
// Each module exposes its handlers plus a function returning its `Router`,
// which `server.rs` merges into the application router.

/// Health check endpoint
pub mod health;

/// Registration, token issuance and the self-profile
pub mod users;

/// Tags and ingredients
pub mod attributes;

/// Recipes and recipe images
pub mod recipes;
