//! # Recipe Routes
//!
//! Full CRUD over the requesting user's recipes plus image upload.
//! A recipe owned by someone else is reported as 404.

use axum::{
    Extension, Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::auth::models::AuthUser;
use crate::database::models::{Attribute, AttributeKind, Recipe, RecipeDetail};
use crate::error::{ApiError, ApiJson, FieldErrors};
use crate::server::AppState;
use crate::services::users::{BLANK, MAX_FIELD_LENGTH, REQUIRED};
use crate::store::{NewRecipe, RecipeChanges, RecipeFilter, normalize_ids};

/// Largest price a NUMERIC(5, 2) column holds is 999.99
const MAX_PRICE_DIGITS: u32 = 5;
const PRICE_DECIMAL_PLACES: u32 = 2;

// --- Request structs ---

/// Recipe body for POST, PUT and PATCH. Every field is optional here;
/// which ones are required depends on the method.
#[derive(Debug, Default, Deserialize)]
pub struct RecipeRequest {
    pub title: Option<String>,
    pub time_minutes: Option<i64>,
    /// String or number, parsed as a decimal
    pub price: Option<Value>,
    pub link: Option<String>,
    pub tags: Option<Vec<i64>>,
    pub ingredients: Option<Vec<i64>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecipeListQuery {
    /// Comma-separated tag ids
    pub tags: Option<String>,
    /// Comma-separated ingredient ids
    pub ingredients: Option<String>,
}

// --- Response structs ---

#[derive(Debug, Serialize)]
pub struct RecipeResponse {
    pub id: i64,
    pub title: String,
    pub ingredients: Vec<i64>,
    pub tags: Vec<i64>,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: String,
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecipeDetailResponse {
    pub id: i64,
    pub title: String,
    pub ingredients: Vec<Attribute>,
    pub tags: Vec<Attribute>,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: String,
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecipeImageResponse {
    pub id: i64,
    pub image: Option<String>,
}

impl RecipeResponse {
    fn new(state: &AppState, recipe: Recipe) -> Self {
        Self {
            id: recipe.id,
            image: recipe.image.as_deref().map(|path| state.images.url_for(path)),
            title: recipe.title,
            ingredients: recipe.ingredients,
            tags: recipe.tags,
            time_minutes: recipe.time_minutes,
            price: recipe.price,
            link: recipe.link,
        }
    }
}

impl RecipeDetailResponse {
    fn new(state: &AppState, detail: RecipeDetail) -> Self {
        let recipe = detail.recipe;
        Self {
            id: recipe.id,
            image: recipe.image.as_deref().map(|path| state.images.url_for(path)),
            title: recipe.title,
            ingredients: detail.ingredients,
            tags: detail.tags,
            time_minutes: recipe.time_minutes,
            price: recipe.price,
            link: recipe.link,
        }
    }
}

// --- Validation ---

fn parse_price(value: &Value) -> Result<Decimal, String> {
    let parsed = match value {
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        _ => None,
    };
    let mut price = parsed.ok_or_else(|| "A valid number is required.".to_string())?;

    if price.is_sign_negative() && !price.is_zero() {
        return Err("Ensure this value is greater than or equal to 0.".to_string());
    }
    price = price.normalize();
    if price.scale() > PRICE_DECIMAL_PLACES {
        return Err(format!(
            "Ensure that there are no more than {PRICE_DECIMAL_PLACES} decimal places."
        ));
    }
    let limit = Decimal::from(10i64.pow(MAX_PRICE_DIGITS - PRICE_DECIMAL_PLACES));
    if price >= limit {
        return Err(format!(
            "Ensure that there are no more than {MAX_PRICE_DIGITS} digits in total."
        ));
    }
    price.rescale(PRICE_DECIMAL_PLACES);
    Ok(price)
}

/// Comma-separated id list from a query parameter; blank means "no filter"
fn parse_ids(field: &str, raw: Option<&str>) -> Result<Option<Vec<i64>>, ApiError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    raw.split(',')
        .map(|part| part.trim().parse::<i64>())
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
        .map_err(|_| ApiError::validation(field, "Expected a comma-separated list of ids."))
}

fn check_length(errors: &mut FieldErrors, field: &str, value: &str) {
    if value.chars().count() > MAX_FIELD_LENGTH {
        errors.add(
            field,
            format!("Ensure this field has no more than {MAX_FIELD_LENGTH} characters."),
        );
    }
}

/// Validate field formats. With `partial` unset, title, time and price are required.
fn validate_fields(request: RecipeRequest, partial: bool) -> Result<RecipeChanges, ApiError> {
    let mut errors = FieldErrors::new();
    let mut changes = RecipeChanges::default();

    match request.title.as_deref().map(str::trim) {
        Some("") => errors.add("title", BLANK),
        Some(title) => {
            check_length(&mut errors, "title", title);
            changes.title = Some(title.to_string());
        }
        None if !partial => errors.add("title", REQUIRED),
        None => {}
    }

    match request.time_minutes {
        Some(minutes) if minutes < 0 => {
            errors.add("time_minutes", "Ensure this value is greater than or equal to 0.")
        }
        Some(minutes) => match i32::try_from(minutes) {
            Ok(minutes) => changes.time_minutes = Some(minutes),
            Err(_) => errors.add("time_minutes", "Ensure this value is less than or equal to 2147483647."),
        },
        None if !partial => errors.add("time_minutes", REQUIRED),
        None => {}
    }

    match request.price.as_ref() {
        Some(value) => match parse_price(value) {
            Ok(price) => changes.price = Some(price),
            Err(msg) => errors.add("price", msg),
        },
        None if !partial => errors.add("price", REQUIRED),
        None => {}
    }

    if let Some(link) = request.link {
        let link = link.trim().to_string();
        check_length(&mut errors, "link", &link);
        changes.link = Some(link);
    }

    changes.tags = request.tags.map(|ids| normalize_ids(&ids));
    changes.ingredients = request.ingredients.map(|ids| normalize_ids(&ids));

    errors.into_result()?;
    Ok(changes)
}

/// Every linked id must name one of the requester's own tags or ingredients
async fn check_links(
    state: &AppState,
    owner: i64,
    changes: &RecipeChanges,
) -> Result<(), ApiError> {
    let mut errors = FieldErrors::new();
    for (kind, ids) in [
        (AttributeKind::Tag, &changes.tags),
        (AttributeKind::Ingredient, &changes.ingredients),
    ] {
        let Some(ids) = ids else { continue };
        let owned = state.store.owned_attribute_ids(kind, owner, ids).await?;
        for id in ids.iter().filter(|id| !owned.contains(id)) {
            errors.add(kind.field(), format!("Invalid pk \"{id}\" - object does not exist."));
        }
    }
    errors.into_result()
}

// --- Handlers ---

/// GET /api/recipes/recipes
pub async fn list_recipes(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<RecipeListQuery>,
) -> Result<Json<Vec<RecipeResponse>>, ApiError> {
    let filter = RecipeFilter {
        tags: parse_ids("tags", query.tags.as_deref())?,
        ingredients: parse_ids("ingredients", query.ingredients.as_deref())?,
    };

    let recipes = state.store.list_recipes(auth_user.id, &filter).await?;
    Ok(Json(
        recipes
            .into_iter()
            .map(|recipe| RecipeResponse::new(&state, recipe))
            .collect(),
    ))
}

/// POST /api/recipes/recipes
pub async fn create_recipe(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    ApiJson(payload): ApiJson<RecipeRequest>,
) -> Result<(StatusCode, Json<RecipeResponse>), ApiError> {
    let changes = validate_fields(payload, false)?;
    check_links(&state, auth_user.id, &changes).await?;

    let (Some(title), Some(time_minutes), Some(price)) =
        (changes.title, changes.time_minutes, changes.price)
    else {
        return Err(ApiError::validation("title", REQUIRED));
    };
    let new_recipe = NewRecipe {
        title,
        time_minutes,
        price,
        link: changes.link.unwrap_or_default(),
        tags: changes.tags.unwrap_or_default(),
        ingredients: changes.ingredients.unwrap_or_default(),
    };

    let recipe = state.store.insert_recipe(auth_user.id, new_recipe).await?;
    tracing::info!("Created recipe id={} for user id={}", recipe.id, auth_user.id);
    Ok((StatusCode::CREATED, Json(RecipeResponse::new(&state, recipe))))
}

/// GET /api/recipes/recipes/{id}
pub async fn retrieve_recipe(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<RecipeDetailResponse>, ApiError> {
    let detail = state.store.get_recipe_detail(auth_user.id, id).await?;
    Ok(Json(RecipeDetailResponse::new(&state, detail)))
}

/// PUT /api/recipes/recipes/{id}
///
/// Replaces every writable field; omitted links and link text are cleared.
pub async fn update_recipe(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<i64>,
    ApiJson(payload): ApiJson<RecipeRequest>,
) -> Result<Json<RecipeResponse>, ApiError> {
    let mut changes = validate_fields(payload, false)?;
    changes.link.get_or_insert_with(String::new);
    changes.tags.get_or_insert_with(Vec::new);
    changes.ingredients.get_or_insert_with(Vec::new);

    apply_changes(state, auth_user, id, changes).await
}

/// PATCH /api/recipes/recipes/{id}
pub async fn partial_update_recipe(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<i64>,
    ApiJson(payload): ApiJson<RecipeRequest>,
) -> Result<Json<RecipeResponse>, ApiError> {
    let changes = validate_fields(payload, true)?;
    apply_changes(state, auth_user, id, changes).await
}

async fn apply_changes(
    state: AppState,
    auth_user: AuthUser,
    id: i64,
    changes: RecipeChanges,
) -> Result<Json<RecipeResponse>, ApiError> {
    // 404 for someone else's recipe before reporting link errors
    state.store.get_recipe(auth_user.id, id).await?;
    check_links(&state, auth_user.id, &changes).await?;

    let recipe = state.store.update_recipe(auth_user.id, id, changes).await?;
    tracing::info!("Updated recipe id={} for user id={}", recipe.id, auth_user.id);
    Ok(Json(RecipeResponse::new(&state, recipe)))
}

/// DELETE /api/recipes/recipes/{id}
pub async fn delete_recipe(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let recipe = state.store.delete_recipe(auth_user.id, id).await?;
    if let Some(image) = recipe.image {
        state.images.remove(&image).await;
    }
    tracing::info!("Deleted recipe id={} for user id={}", id, auth_user.id);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/recipes/recipes/{id}/upload-image
///
/// Expects a multipart `image` field. The previous image, if any, is removed.
pub async fn upload_image(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<i64>,
    mut multipart: Multipart,
) -> Result<Json<RecipeImageResponse>, ApiError> {
    let recipe = state.store.get_recipe(auth_user.id, id).await?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("image") {
            upload = Some(field.bytes().await?);
            break;
        }
    }
    let Some(bytes) = upload else {
        return Err(ApiError::validation("image", "No file was submitted."));
    };

    let stored = state.images.save(bytes).await?;
    let updated = match state
        .store
        .set_recipe_image(auth_user.id, id, Some(stored.clone()))
        .await
    {
        Ok(updated) => updated,
        Err(e) => {
            state.images.remove(&stored).await;
            return Err(e.into());
        }
    };

    if let Some(previous) = recipe.image {
        state.images.remove(&previous).await;
    }

    Ok(Json(RecipeImageResponse {
        id: updated.id,
        image: updated.image.as_deref().map(|path| state.images.url_for(path)),
    }))
}

pub fn create_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/api/recipes/recipes", get(list_recipes).post(create_recipe))
        .route(
            "/api/recipes/recipes/{id}",
            get(retrieve_recipe)
                .put(update_recipe)
                .patch(partial_update_recipe)
                .delete(delete_recipe),
        )
        .route(
            "/api/recipes/recipes/{id}/upload-image",
            post(upload_image).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
}
