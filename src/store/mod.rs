//! # Store Module
//!
//! Storage traits for users, recipe attributes and recipes. Every recipe and
//! attribute operation takes the owner id and never returns rows owned by
//! anyone else; a row owned by another user reads as [`StoreError::NotFound`].
//!
//! Two backends implement the traits:
//! - `postgres`: [`DatabaseConnection`](crate::database::DatabaseConnection)
//! - `memory`: [`MemoryStore`], for development and tests

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::database::models::{Attribute, AttributeKind, Recipe, RecipeDetail, User};

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("a user with this email already exists")]
    DuplicateEmail,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Fields of a user row about to be inserted
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub is_staff: bool,
    pub is_superuser: bool,
}

/// Profile fields to overwrite; `None` leaves the column untouched
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub name: Option<String>,
}

/// A validated recipe ready to be inserted
#[derive(Debug, Clone)]
pub struct NewRecipe {
    pub title: String,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: String,
    pub tags: Vec<i64>,
    pub ingredients: Vec<i64>,
}

/// Recipe fields to overwrite; a `Some` link list replaces the whole set
#[derive(Debug, Clone, Default)]
pub struct RecipeChanges {
    pub title: Option<String>,
    pub time_minutes: Option<i32>,
    pub price: Option<Decimal>,
    pub link: Option<String>,
    pub tags: Option<Vec<i64>>,
    pub ingredients: Option<Vec<i64>>,
}

/// Recipe list filters. Each present set matches recipes linked to at least
/// one of its ids; all present sets must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipeFilter {
    pub tags: Option<Vec<i64>>,
    pub ingredients: Option<Vec<i64>>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with [`StoreError::DuplicateEmail`] when the email is taken.
    async fn insert_user(&self, user: NewUser) -> StoreResult<User>;

    async fn user_by_id(&self, id: i64) -> StoreResult<Option<User>>;

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn update_user(&self, id: i64, changes: UserChanges) -> StoreResult<User>;

    async fn record_login(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()>;

    /// Removes the user and everything it owns.
    async fn delete_user(&self, id: i64) -> StoreResult<()>;
}

#[async_trait]
pub trait AttributeStore: Send + Sync {
    /// Owner's attributes, name descending.
    async fn list_attributes(&self, kind: AttributeKind, owner: i64) -> StoreResult<Vec<Attribute>>;

    async fn insert_attribute(
        &self,
        kind: AttributeKind,
        owner: i64,
        name: &str,
    ) -> StoreResult<Attribute>;

    /// The subset of `ids` that exist and belong to `owner`.
    async fn owned_attribute_ids(
        &self,
        kind: AttributeKind,
        owner: i64,
        ids: &[i64],
    ) -> StoreResult<Vec<i64>>;
}

#[async_trait]
pub trait RecipeStore: Send + Sync {
    /// Owner's recipes, title descending.
    async fn list_recipes(&self, owner: i64, filter: &RecipeFilter) -> StoreResult<Vec<Recipe>>;

    async fn get_recipe(&self, owner: i64, id: i64) -> StoreResult<Recipe>;

    async fn get_recipe_detail(&self, owner: i64, id: i64) -> StoreResult<RecipeDetail>;

    async fn insert_recipe(&self, owner: i64, recipe: NewRecipe) -> StoreResult<Recipe>;

    async fn update_recipe(&self, owner: i64, id: i64, changes: RecipeChanges)
    -> StoreResult<Recipe>;

    async fn set_recipe_image(
        &self,
        owner: i64,
        id: i64,
        image: Option<String>,
    ) -> StoreResult<Recipe>;

    /// Returns the removed recipe so its image can be cleaned up.
    async fn delete_recipe(&self, owner: i64, id: i64) -> StoreResult<Recipe>;
}

/// Everything the HTTP layer needs from a backend
pub trait Store: UserStore + AttributeStore + RecipeStore {}

impl<T> Store for T where T: UserStore + AttributeStore + RecipeStore {}

/// Sorted, de-duplicated copy of an id list
pub(crate) fn normalize_ids(ids: &[i64]) -> Vec<i64> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}
