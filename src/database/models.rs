// Database Models
//
// Row types for users, tags, ingredients and recipes, shared by every store backend.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;

/// Trait for converting from tokio-postgres Row
pub trait FromRow {
    fn from_row(row: &Row) -> Result<Self, tokio_postgres::Error>
    where
        Self: Sized;
}

// ============================================================================
// USER & AUTH MODELS
// ============================================================================

/// User account information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl FromRow for User {
    fn from_row(row: &Row) -> Result<Self, tokio_postgres::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            name: row.try_get("name")?,
            is_active: row.try_get("is_active")?,
            is_staff: row.try_get("is_staff")?,
            is_superuser: row.try_get("is_superuser")?,
            date_joined: row.try_get("date_joined")?,
            last_login: row.try_get("last_login")?,
        })
    }
}

// ============================================================================
// RECIPE ATTRIBUTES (TAGS & INGREDIENTS)
// ============================================================================

/// The two owner-scoped label tables a recipe links to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Tag,
    Ingredient,
}

impl AttributeKind {
    pub fn table(self) -> &'static str {
        match self {
            AttributeKind::Tag => "tags",
            AttributeKind::Ingredient => "ingredients",
        }
    }

    /// Join table linking recipes to this kind
    pub fn link_table(self) -> &'static str {
        match self {
            AttributeKind::Tag => "recipe_tags",
            AttributeKind::Ingredient => "recipe_ingredients",
        }
    }

    /// Column in the join table that references this kind
    pub fn link_column(self) -> &'static str {
        match self {
            AttributeKind::Tag => "tag_id",
            AttributeKind::Ingredient => "ingredient_id",
        }
    }

    /// Field name used in request and response bodies
    pub fn field(self) -> &'static str {
        match self {
            AttributeKind::Tag => "tags",
            AttributeKind::Ingredient => "ingredients",
        }
    }
}

/// A tag or an ingredient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: i64,
    pub name: String,
    #[serde(skip)]
    pub user_id: i64,
}

impl FromRow for Attribute {
    fn from_row(row: &Row) -> Result<Self, tokio_postgres::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            user_id: row.try_get("user_id")?,
        })
    }
}

// ============================================================================
// RECIPES
// ============================================================================

/// Recipe with the ids of its linked tags and ingredients
#[derive(Debug, Clone, PartialEq)]
pub struct Recipe {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: String,
    /// Path relative to the media root
    pub image: Option<String>,
    pub tags: Vec<i64>,
    pub ingredients: Vec<i64>,
}

impl FromRow for Recipe {
    /// Links are loaded separately, so both id lists start empty.
    fn from_row(row: &Row) -> Result<Self, tokio_postgres::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            title: row.try_get("title")?,
            time_minutes: row.try_get("time_minutes")?,
            price: row.try_get("price")?,
            link: row.try_get("link")?,
            image: row.try_get("image")?,
            tags: Vec::new(),
            ingredients: Vec::new(),
        })
    }
}

/// Recipe with its tags and ingredients expanded
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeDetail {
    pub recipe: Recipe,
    pub tags: Vec<Attribute>,
    pub ingredients: Vec<Attribute>,
}
