//! Authentication Models
//!
//! Data structures for authentication requests, responses, and user information.

use serde::{Deserialize, Serialize};

use crate::database::models::User;

/// Authenticated user resolved from the request token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: i64,
    pub email: String,
}

impl From<&User> for AuthUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
        }
    }
}

/// Token request payload; fields are optional so missing ones become field errors
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Token response after successful authentication
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}
