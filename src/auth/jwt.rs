//! JWT Token Service
//!
//! Issues and validates the signed tokens handed out by the token endpoint.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, TokenData, Validation, decode, encode};
use serde::{Deserialize, Serialize};

const ISSUER: &str = "recipe-server";

/// JWT Claims structure containing user information and token metadata
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// User id, as a string
    pub sub: String,
    /// User email at issue time
    pub email: String,
    /// Token issued at timestamp
    pub iat: i64,
    /// Token expiration timestamp
    pub exp: i64,
    /// Token issuer
    pub iss: String,
}

impl Claims {
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

/// JWT Service for token operations
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl JwtService {
    /// Create a new JWT service with the provided secret and token lifetime
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        let encoding_key = EncodingKey::from_secret(secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(secret.as_bytes());

        let mut validation = Validation::default();
        validation.set_issuer(&[ISSUER]);

        Self {
            encoding_key,
            decoding_key,
            validation,
            ttl: Duration::hours(ttl_hours),
        }
    }

    /// Token lifetime in seconds
    pub fn ttl_seconds(&self) -> i64 {
        self.ttl.num_seconds()
    }

    /// Generate a JWT token for a user
    pub fn create_token(&self, user_id: i64, email: &str) -> Result<String> {
        let now = Utc::now();
        let expiration = now + self.ttl;

        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            iat: now.timestamp(),
            exp: expiration.timestamp(),
            iss: ISSUER.to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .context("Failed to encode JWT token")
    }

    /// Validate and decode a JWT token
    pub fn validate_token(&self, token: &str) -> Result<TokenData<Claims>> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .context("Failed to validate JWT token")
    }

    pub fn decode_claims(&self, token: &str) -> Result<Claims> {
        let token_data = self.validate_token(token)?;
        Ok(token_data.claims)
    }
}
