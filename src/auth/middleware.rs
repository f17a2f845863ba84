//! Authentication Middleware
//!
//! Axum middleware for token validation and user authentication.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use crate::auth::models::AuthUser;
use crate::error::ApiError;
use crate::server::AppState;

/// Cookie set by the token endpoint and accepted as a header fallback
pub const TOKEN_COOKIE: &str = "access_token";

/// Authentication middleware that validates tokens and injects user info
pub struct AuthMiddleware;

impl AuthMiddleware {
    /// Middleware function for validating tokens.
    ///
    /// Rejects with 401 unless the token is valid and names an existing, active user.
    pub async fn validate_token(
        State(state): State<AppState>,
        mut req: Request,
        next: Next,
    ) -> Result<Response, ApiError> {
        let Some(token) = extract_token(req.headers()) else {
            tracing::debug!("[AuthMiddleware] No credentials on {} {}", req.method(), req.uri());
            return Err(ApiError::Unauthorized(
                "Authentication credentials were not provided.",
            ));
        };

        let claims = state.jwt_service.decode_claims(&token).map_err(|e| {
            tracing::warn!("[AuthMiddleware] Token validation failed: {:#}", e);
            ApiError::Unauthorized("Invalid token.")
        })?;

        let user_id = claims
            .user_id()
            .ok_or(ApiError::Unauthorized("Invalid token."))?;

        let user = match state.store.user_by_id(user_id).await? {
            Some(user) if user.is_active => user,
            _ => return Err(ApiError::Unauthorized("User inactive or deleted.")),
        };

        let auth_user = AuthUser::from(&user);
        tracing::debug!("[AuthMiddleware] Authenticated user id={}", auth_user.id);

        // Insert the user into request extensions for downstream handlers
        req.extensions_mut().insert(auth_user);

        Ok(next.run(req).await)
    }
}

/// Token from `Authorization: Bearer|Token <token>`, falling back to the cookie
fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("Token "))
        })
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .or_else(|| {
            CookieJar::from_headers(headers)
                .get(TOKEN_COOKIE)
                .map(|cookie| cookie.value().to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(name: header::HeaderName, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn reads_bearer_and_token_schemes() {
        assert_eq!(
            extract_token(&headers(header::AUTHORIZATION, "Bearer abc")).as_deref(),
            Some("abc")
        );
        assert_eq!(
            extract_token(&headers(header::AUTHORIZATION, "Token xyz")).as_deref(),
            Some("xyz")
        );
    }

    #[test]
    fn falls_back_to_cookie() {
        assert_eq!(
            extract_token(&headers(header::COOKIE, "theme=dark; access_token=from-cookie"))
                .as_deref(),
            Some("from-cookie")
        );
    }

    #[test]
    fn ignores_unknown_schemes() {
        assert!(extract_token(&headers(header::AUTHORIZATION, "Basic dXNlcjpwdw==")).is_none());
        assert!(extract_token(&HeaderMap::new()).is_none());
    }
}
