//! User routes for registration, token issuance and the self-profile

use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::TOKEN_COOKIE;
use crate::auth::models::{AuthUser, TokenRequest, TokenResponse};
use crate::database::models::User;
use crate::error::{ApiError, ApiJson, FieldErrors};
use crate::server::AppState;
use crate::services::users::{self, BLANK, ProfileUpdate, REQUIRED};
use crate::store::RecipeFilter;

/// Registration payload
#[derive(Debug, Default, Deserialize)]
pub struct CreateUserRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
}

/// Profile payload for PUT and PATCH on `/me`
#[derive(Debug, Default, Deserialize)]
pub struct ProfileRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
}

/// Public user representation; the password never leaves the server
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub email: String,
    pub name: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            email: user.email,
            name: user.name,
        }
    }
}

/// Record "required" for every listed field that is absent
fn require(errors: &mut FieldErrors, fields: &[(&str, bool)]) {
    for (field, present) in fields {
        if !present {
            errors.add(field, REQUIRED);
        }
    }
}

/// Names are optional in storage but may not be submitted blank
fn check_name(errors: &mut FieldErrors, name: Option<&str>) {
    if name.map(str::trim) == Some("") {
        errors.add("name", BLANK);
    }
}

/// POST /api/users/create
pub async fn create_user(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let mut errors = FieldErrors::new();
    require(
        &mut errors,
        &[
            ("email", payload.email.is_some()),
            ("password", payload.password.is_some()),
            ("name", payload.name.is_some()),
        ],
    );
    check_name(&mut errors, payload.name.as_deref());
    errors.into_result()?;

    let user = users::create_user(
        state.store.as_ref(),
        payload.email.as_deref().unwrap_or_default(),
        payload.password.as_deref().unwrap_or_default(),
        payload.name.as_deref().unwrap_or_default(),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(user.into())))
}

/// POST /api/users/token
///
/// Bad credentials are a 400, like any other invalid form submission.
pub async fn create_token(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<TokenRequest>,
) -> Result<(CookieJar, Json<TokenResponse>), ApiError> {
    let mut errors = FieldErrors::new();
    for (field, value) in [("email", &payload.email), ("password", &payload.password)] {
        match value.as_deref().map(str::trim) {
            None => errors.add(field, REQUIRED),
            Some("") => errors.add(field, BLANK),
            Some(_) => {}
        }
    }
    errors.into_result()?;

    let user = users::authenticate(
        state.store.as_ref(),
        payload.email.as_deref().unwrap_or_default(),
        payload.password.as_deref().unwrap_or_default(),
    )
    .await?;

    let token = state.jwt_service.create_token(user.id, &user.email)?;
    tracing::info!("Issued token for user id={}", user.id);

    let mut cookie = Cookie::new(TOKEN_COOKIE, token.clone());
    cookie.set_http_only(true);
    cookie.set_secure(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_path("/");
    cookie.set_max_age(time::Duration::seconds(state.jwt_service.ttl_seconds()));

    Ok((CookieJar::new().add(cookie), Json(TokenResponse { token })))
}

/// GET /api/users/me
pub async fn me(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state
        .store
        .user_by_id(auth_user.id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(user.into()))
}

/// PUT /api/users/me
pub async fn replace_me(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    ApiJson(payload): ApiJson<ProfileRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let mut errors = FieldErrors::new();
    require(
        &mut errors,
        &[
            ("email", payload.email.is_some()),
            ("password", payload.password.is_some()),
            ("name", payload.name.is_some()),
        ],
    );
    errors.into_result()?;

    update_me(state, auth_user, payload).await
}

/// PATCH /api/users/me
pub async fn patch_me(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    ApiJson(payload): ApiJson<ProfileRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    update_me(state, auth_user, payload).await
}

async fn update_me(
    state: AppState,
    auth_user: AuthUser,
    payload: ProfileRequest,
) -> Result<Json<UserResponse>, ApiError> {
    let mut errors = FieldErrors::new();
    check_name(&mut errors, payload.name.as_deref());
    errors.into_result()?;

    let user = users::update_profile(
        state.store.as_ref(),
        auth_user.id,
        ProfileUpdate {
            email: payload.email,
            password: payload.password,
            name: payload.name,
        },
    )
    .await?;
    tracing::info!("Updated profile for user id={}", user.id);
    Ok(Json(user.into()))
}

/// DELETE /api/users/me
///
/// Owned tags, ingredients and recipes are removed with the account.
pub async fn delete_me(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<StatusCode, ApiError> {
    let recipes = state
        .store
        .list_recipes(auth_user.id, &RecipeFilter::default())
        .await?;

    state.store.delete_user(auth_user.id).await?;

    for image in recipes.into_iter().filter_map(|r| r.image) {
        state.images.remove(&image).await;
    }
    tracing::info!("Deleted user id={}", auth_user.id);
    Ok(StatusCode::NO_CONTENT)
}

/// Routes that do not require a token
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/api/users/create", post(create_user))
        .route("/api/users/token", post(create_token))
}

/// Routes behind the auth middleware
pub fn private_routes() -> Router<AppState> {
    Router::new().route(
        "/api/users/me",
        get(me).put(replace_me).patch(patch_me).delete(delete_me),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::verify_password;
    use crate::test_support::TestApp;
    use axum::http::{Method, header};
    use serde_json::json;

    #[tokio::test]
    async fn create_user_succeeds_without_echoing_password() {
        let app = TestApp::new();
        let payload = json!({
            "email": "testemail@gmail.com",
            "password": "test_password",
            "name": "test_name",
        });

        let (status, body) = app.send(Method::POST, "/api/users/create", None, Some(payload)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, json!({"email": "testemail@gmail.com", "name": "test_name"}));

        let user = app.state.store.user_by_email("testemail@gmail.com").await.unwrap().unwrap();
        assert!(verify_password("test_password", &user.password_hash).unwrap());
    }

    #[tokio::test]
    async fn creating_an_existing_user_fails_and_keeps_the_original() {
        let app = TestApp::new();
        app.create_user("testemail@gmail.com", "test_password").await;

        let payload = json!({
            "email": "testemail@gmail.com",
            "password": "other_password",
            "name": "other_name",
        });
        let (status, body) = app.send(Method::POST, "/api/users/create", None, Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.get("email").is_some());

        let user = app.state.store.user_by_email("testemail@gmail.com").await.unwrap().unwrap();
        assert!(verify_password("test_password", &user.password_hash).unwrap());
    }

    #[tokio::test]
    async fn too_short_password_creates_nothing() {
        let app = TestApp::new();
        let payload = json!({"email": "testemail@gmail.com", "password": "short", "name": "n"});

        let (status, body) = app.send(Method::POST, "/api/users/create", None, Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.get("password").is_some());
        assert!(app.state.store.user_by_email("testemail@gmail.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_email_is_a_field_error() {
        let app = TestApp::new();
        let (status, body) = app
            .send(Method::POST, "/api/users/create", None, Some(json!({"password": "password"})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["email"][0], REQUIRED);
    }

    #[tokio::test]
    async fn name_is_required_and_not_blank() {
        let app = TestApp::new();
        let (status, body) = app
            .send(
                Method::POST,
                "/api/users/create",
                None,
                Some(json!({"email": "testemail@gmail.com", "password": "test_password"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["name"][0], REQUIRED);

        let payload = json!({"email": "testemail@gmail.com", "password": "test_password", "name": "  "});
        let (status, body) = app.send(Method::POST, "/api/users/create", None, Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["name"][0], BLANK);
        assert!(app.state.store.user_by_email("testemail@gmail.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn token_is_issued_for_valid_credentials() {
        let app = TestApp::new();
        app.create_user("testemail@gmail.com", "test_password").await;

        let payload = json!({"email": "testemail@GMAIL.com", "password": "test_password"});
        let (status, body) = app.send(Method::POST, "/api/users/token", None, Some(payload)).await;
        assert_eq!(status, StatusCode::OK);

        let token = body["token"].as_str().unwrap();
        let claims = app.state.jwt_service.decode_claims(token).unwrap();
        assert_eq!(claims.email, "testemail@gmail.com");
    }

    #[tokio::test]
    async fn token_response_sets_cookie() {
        let app = TestApp::new();
        app.create_user("testemail@gmail.com", "test_password").await;

        let payload = json!({"email": "testemail@gmail.com", "password": "test_password"});
        let response = app
            .request(Method::POST, "/api/users/token", None, Some(payload))
            .await;
        let cookie = response.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("access_token="));
        assert!(cookie.contains("HttpOnly"));
    }

    #[tokio::test]
    async fn bad_credentials_get_no_token() {
        let app = TestApp::new();
        app.create_user("testemail@gmail.com", "test_password").await;

        for payload in [
            json!({"email": "testemail@gmail.com", "password": "bad_password"}),
            json!({"email": "otheremail@gmail.com", "password": "test_password"}),
            json!({"email": "testemail@gmail.com", "password": ""}),
            json!({"email": "", "password": "test_password"}),
            json!({"email": "testemail@gmail.com"}),
        ] {
            let (status, body) = app.send(Method::POST, "/api/users/token", None, Some(payload)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body.get("token").is_none());
        }
    }

    #[tokio::test]
    async fn me_requires_authentication() {
        let app = TestApp::new();
        let (status, _) = app.send(Method::GET, "/api/users/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app
            .send(Method::GET, "/api/users/me", Some("not-a-token"), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn me_returns_profile() {
        let app = TestApp::new();
        let (user, token) = app.login("test@gmail.com", "test_password").await;

        let (status, body) = app.send(Method::GET, "/api/users/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"email": user.email, "name": user.name}));
    }

    #[tokio::test]
    async fn post_on_me_is_not_allowed() {
        let app = TestApp::new();
        let (_, token) = app.login("test@gmail.com", "test_password").await;

        let (status, _) = app
            .send(Method::POST, "/api/users/me", Some(&token), Some(json!({})))
            .await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn unsupported_method_without_token_is_unauthorized() {
        let app = TestApp::new();
        let (status, _) = app
            .send(Method::POST, "/api/users/me", None, Some(json!({})))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn patch_updates_profile_and_password() {
        let app = TestApp::new();
        let (user, token) = app.login("test@gmail.com", "test_password").await;

        let payload = json!({
            "email": "newemail@gmail.com",
            "password": "new_password",
            "name": "new_name",
        });
        let (status, body) = app
            .send(Method::PATCH, "/api/users/me", Some(&token), Some(payload))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"email": "newemail@gmail.com", "name": "new_name"}));

        let stored = app.state.store.user_by_id(user.id).await.unwrap().unwrap();
        assert!(verify_password("new_password", &stored.password_hash).unwrap());
    }

    #[tokio::test]
    async fn put_requires_all_credentials() {
        let app = TestApp::new();
        let (_, token) = app.login("test@gmail.com", "test_password").await;

        let (status, body) = app
            .send(Method::PUT, "/api/users/me", Some(&token), Some(json!({"name": "x"})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["email"][0], REQUIRED);
        assert_eq!(body["password"][0], REQUIRED);
        assert!(body.get("name").is_none());

        let (status, body) = app
            .send(Method::PATCH, "/api/users/me", Some(&token), Some(json!({"name": ""})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["name"][0], BLANK);
    }

    #[tokio::test]
    async fn deleting_account_revokes_token_and_cascades() {
        let app = TestApp::new();
        let (user, token) = app.login("test@gmail.com", "test_password").await;
        app.send(
            Method::POST,
            "/api/recipes/tags",
            Some(&token),
            Some(json!({"name": "Vegan"})),
        )
        .await;

        let (status, _) = app.send(Method::DELETE, "/api/users/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = app.send(Method::GET, "/api/recipes/tags", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(app.state.store.user_by_id(user.id).await.unwrap().is_none());
    }
}
