//! # Tag & Ingredient Routes
//!
//! Both resources support list and create only, scoped to the requesting user.
//! One pair of handlers serves both, parameterized by [`AttributeKind`].

use axum::{Extension, Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Deserialize;

use crate::auth::models::AuthUser;
use crate::database::models::{Attribute, AttributeKind};
use crate::error::{ApiError, ApiJson};
use crate::server::AppState;
use crate::services::users::{BLANK, MAX_FIELD_LENGTH, REQUIRED};

#[derive(Debug, Default, Deserialize)]
pub struct AttributeRequest {
    pub name: Option<String>,
}

fn validate_name(name: Option<&str>) -> Result<String, ApiError> {
    let name = name.map(str::trim).ok_or_else(|| ApiError::validation("name", REQUIRED))?;
    if name.is_empty() {
        return Err(ApiError::validation("name", BLANK));
    }
    if name.chars().count() > MAX_FIELD_LENGTH {
        return Err(ApiError::validation(
            "name",
            format!("Ensure this field has no more than {MAX_FIELD_LENGTH} characters."),
        ));
    }
    Ok(name.to_string())
}

async fn list(
    state: &AppState,
    kind: AttributeKind,
    auth_user: &AuthUser,
) -> Result<Json<Vec<Attribute>>, ApiError> {
    let attributes = state.store.list_attributes(kind, auth_user.id).await?;
    Ok(Json(attributes))
}

async fn create(
    state: &AppState,
    kind: AttributeKind,
    auth_user: &AuthUser,
    payload: AttributeRequest,
) -> Result<(StatusCode, Json<Attribute>), ApiError> {
    let name = validate_name(payload.name.as_deref())?;
    let attribute = state.store.insert_attribute(kind, auth_user.id, &name).await?;
    tracing::info!(
        "Created {} id={} for user id={}",
        kind.table(),
        attribute.id,
        auth_user.id
    );
    Ok((StatusCode::CREATED, Json(attribute)))
}

/// GET /api/recipes/tags
pub async fn list_tags(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<Vec<Attribute>>, ApiError> {
    list(&state, AttributeKind::Tag, &auth_user).await
}

/// POST /api/recipes/tags
pub async fn create_tag(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    ApiJson(payload): ApiJson<AttributeRequest>,
) -> Result<(StatusCode, Json<Attribute>), ApiError> {
    create(&state, AttributeKind::Tag, &auth_user, payload).await
}

/// GET /api/recipes/ingredients
pub async fn list_ingredients(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<Vec<Attribute>>, ApiError> {
    list(&state, AttributeKind::Ingredient, &auth_user).await
}

/// POST /api/recipes/ingredients
pub async fn create_ingredient(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    ApiJson(payload): ApiJson<AttributeRequest>,
) -> Result<(StatusCode, Json<Attribute>), ApiError> {
    create(&state, AttributeKind::Ingredient, &auth_user, payload).await
}

pub fn create_routes() -> Router<AppState> {
    Router::new()
        .route("/api/recipes/tags", get(list_tags).post(create_tag))
        .route(
            "/api/recipes/ingredients",
            get(list_ingredients).post(create_ingredient),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestApp;
    use axum::http::Method;
    use serde_json::json;

    #[tokio::test]
    async fn login_required() {
        let app = TestApp::new();
        for uri in ["/api/recipes/tags", "/api/recipes/ingredients"] {
            let (status, _) = app.send(Method::GET, uri, None, None).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn vegan_tag_is_visible_only_to_its_owner() {
        let app = TestApp::new();
        let (_, token) = app.login("test@gmail.com", "password").await;
        let (_, other_token) = app.login("other@gmail.com", "password").await;

        let (status, body) = app
            .send(
                Method::POST,
                "/api/recipes/tags",
                Some(&token),
                Some(json!({"name": "Vegan"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["name"], "Vegan");
        assert!(body.get("user_id").is_none());

        let (status, body) = app.send(Method::GET, "/api/recipes/tags", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let tags = body.as_array().unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0]["name"], "Vegan");

        let (_, body) = app
            .send(Method::GET, "/api/recipes/tags", Some(&other_token), None)
            .await;
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tags_are_listed_by_name_descending() {
        let app = TestApp::new();
        let (_, token) = app.login("test@gmail.com", "password").await;
        for name in ["Dessert", "Vegan", "Breakfast"] {
            app.send(
                Method::POST,
                "/api/recipes/tags",
                Some(&token),
                Some(json!({"name": name})),
            )
            .await;
        }

        let (_, body) = app.send(Method::GET, "/api/recipes/tags", Some(&token), None).await;
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|tag| tag["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Vegan", "Dessert", "Breakfast"]);
    }

    #[tokio::test]
    async fn ingredients_are_scoped_to_owner() {
        let app = TestApp::new();
        let (_, token) = app.login("test@gmail.com", "password").await;
        let (_, other_token) = app.login("other@gmail.com", "password").await;

        app.send(
            Method::POST,
            "/api/recipes/ingredients",
            Some(&other_token),
            Some(json!({"name": "Salt"})),
        )
        .await;
        let (status, _) = app
            .send(
                Method::POST,
                "/api/recipes/ingredients",
                Some(&token),
                Some(json!({"name": "Tomato"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, body) = app
            .send(Method::GET, "/api/recipes/ingredients", Some(&token), None)
            .await;
        assert_eq!(body, json!([{"id": body[0]["id"], "name": "Tomato"}]));
    }

    #[tokio::test]
    async fn empty_names_are_rejected() {
        let app = TestApp::new();
        let (_, token) = app.login("test@gmail.com", "password").await;

        for uri in ["/api/recipes/tags", "/api/recipes/ingredients"] {
            let (status, body) = app
                .send(Method::POST, uri, Some(&token), Some(json!({"name": ""})))
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["name"][0], BLANK);

            let (status, _) = app.send(Method::POST, uri, Some(&token), Some(json!({}))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }

        let (_, body) = app.send(Method::GET, "/api/recipes/tags", Some(&token), None).await;
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn attributes_cannot_be_deleted() {
        let app = TestApp::new();
        let (_, token) = app.login("test@gmail.com", "password").await;
        let (status, _) = app
            .send(Method::DELETE, "/api/recipes/tags", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, _) = app.send(Method::DELETE, "/api/recipes/tags", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
