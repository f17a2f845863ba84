//! PostgreSQL store backend, implemented directly on [`DatabaseConnection`].

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{GenericClient, Object};
use std::collections::HashMap;
use tokio_postgres::error::SqlState;

use super::{
    AttributeStore, NewRecipe, NewUser, RecipeChanges, RecipeFilter, RecipeStore, StoreError,
    StoreResult, UserChanges, UserStore, normalize_ids,
};
use crate::database::DatabaseConnection;
use crate::database::models::{
    Attribute, AttributeKind, FromRow, Recipe, RecipeDetail, User,
};

const USER_COLUMNS: &str =
    "id, email, password_hash, name, is_active, is_staff, is_superuser, date_joined, last_login";
const RECIPE_COLUMNS: &str = "id, user_id, title, time_minutes, price, link, image";

fn is_unique_violation(err: &tokio_postgres::Error) -> bool {
    err.code() == Some(&SqlState::UNIQUE_VIOLATION)
}

fn row_error(err: tokio_postgres::Error) -> StoreError {
    StoreError::Backend(anyhow::Error::new(err).context("Failed to decode row"))
}

impl DatabaseConnection {
    async fn client(&self) -> StoreResult<Object> {
        Ok(self
            .pool()
            .get()
            .await
            .context("Failed to get DB connection")?)
    }
}

/// Recipe ids → linked attribute ids, for one kind
async fn load_links<C: GenericClient + Sync>(
    client: &C,
    kind: AttributeKind,
    recipe_ids: &[i64],
) -> StoreResult<HashMap<i64, Vec<i64>>> {
    let column = kind.link_column();
    let sql = format!(
        "SELECT recipe_id, {column} FROM {} WHERE recipe_id = ANY($1) ORDER BY {column}",
        kind.link_table()
    );
    let rows = client
        .query(sql.as_str(), &[&recipe_ids])
        .await
        .context("Failed to query recipe links")?;

    let mut links: HashMap<i64, Vec<i64>> = HashMap::new();
    for row in rows {
        let recipe_id: i64 = row.try_get(0).map_err(row_error)?;
        let attribute_id: i64 = row.try_get(1).map_err(row_error)?;
        links.entry(recipe_id).or_default().push(attribute_id);
    }
    Ok(links)
}

/// Fill in `tags` and `ingredients` for freshly loaded recipe rows
async fn attach_links<C: GenericClient + Sync>(client: &C, recipes: &mut [Recipe]) -> StoreResult<()> {
    let ids: Vec<i64> = recipes.iter().map(|r| r.id).collect();
    let mut tags = load_links(client, AttributeKind::Tag, &ids).await?;
    let mut ingredients = load_links(client, AttributeKind::Ingredient, &ids).await?;

    for recipe in recipes.iter_mut() {
        recipe.tags = tags.remove(&recipe.id).unwrap_or_default();
        recipe.ingredients = ingredients.remove(&recipe.id).unwrap_or_default();
    }
    Ok(())
}

/// Replace the set of attributes linked to a recipe
async fn replace_links<C: GenericClient + Sync>(
    client: &C,
    kind: AttributeKind,
    recipe_id: i64,
    ids: &[i64],
) -> StoreResult<()> {
    let table = kind.link_table();
    client
        .execute(format!("DELETE FROM {table} WHERE recipe_id = $1").as_str(), &[&recipe_id])
        .await
        .context("Failed to clear recipe links")?;

    let ids = normalize_ids(ids);
    if !ids.is_empty() {
        let sql = format!(
            "INSERT INTO {table} (recipe_id, {}) SELECT $1, UNNEST($2::BIGINT[])",
            kind.link_column()
        );
        client
            .execute(sql.as_str(), &[&recipe_id, &ids])
            .await
            .context("Failed to insert recipe links")?;
    }
    Ok(())
}

async fn fetch_recipe<C: GenericClient + Sync>(client: &C, owner: i64, id: i64) -> StoreResult<Recipe> {
    let sql = format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE id = $1 AND user_id = $2");
    let row = client
        .query_opt(sql.as_str(), &[&id, &owner])
        .await
        .context("Failed to query recipe")?
        .ok_or(StoreError::NotFound)?;

    let mut recipes = [Recipe::from_row(&row).map_err(row_error)?];
    attach_links(client, &mut recipes).await?;
    let [recipe] = recipes;
    Ok(recipe)
}

async fn fetch_attributes<C: GenericClient + Sync>(
    client: &C,
    kind: AttributeKind,
    ids: &[i64],
) -> StoreResult<Vec<Attribute>> {
    let sql = format!(
        "SELECT id, name, user_id FROM {} WHERE id = ANY($1) ORDER BY id",
        kind.table()
    );
    let rows = client
        .query(sql.as_str(), &[&ids])
        .await
        .context("Failed to query recipe attributes")?;
    rows.iter()
        .map(|row| Attribute::from_row(row).map_err(row_error))
        .collect()
}

#[async_trait]
impl UserStore for DatabaseConnection {
    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        let client = self.client().await?;
        let sql = format!(
            "INSERT INTO users (email, password_hash, name, is_staff, is_superuser) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        );
        let row = client
            .query_one(
                sql.as_str(),
                &[
                    &user.email,
                    &user.password_hash,
                    &user.name,
                    &user.is_staff,
                    &user.is_superuser,
                ],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::DuplicateEmail
                } else {
                    StoreError::Backend(anyhow::Error::new(e).context("Failed to insert user"))
                }
            })?;
        User::from_row(&row).map_err(row_error)
    }

    async fn user_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        let client = self.client().await?;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = client
            .query_opt(sql.as_str(), &[&id])
            .await
            .context("Failed to query user by id")?;
        row.map(|r| User::from_row(&r).map_err(row_error)).transpose()
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let client = self.client().await?;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = client
            .query_opt(sql.as_str(), &[&email])
            .await
            .context("Failed to query user by email")?;
        row.map(|r| User::from_row(&r).map_err(row_error)).transpose()
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> StoreResult<User> {
        let client = self.client().await?;
        let sql = format!(
            "UPDATE users SET \
                email = COALESCE($2, email), \
                password_hash = COALESCE($3, password_hash), \
                name = COALESCE($4, name) \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let row = client
            .query_opt(
                sql.as_str(),
                &[&id, &changes.email, &changes.password_hash, &changes.name],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::DuplicateEmail
                } else {
                    StoreError::Backend(anyhow::Error::new(e).context("Failed to update user"))
                }
            })?
            .ok_or(StoreError::NotFound)?;
        User::from_row(&row).map_err(row_error)
    }

    async fn record_login(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let client = self.client().await?;
        let n = client
            .execute("UPDATE users SET last_login = $2 WHERE id = $1", &[&id, &at])
            .await
            .context("Failed to record login")?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_user(&self, id: i64) -> StoreResult<()> {
        let client = self.client().await?;
        // Owned tags, ingredients and recipes go with it via ON DELETE CASCADE
        let n = client
            .execute("DELETE FROM users WHERE id = $1", &[&id])
            .await
            .context("Failed to delete user")?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl AttributeStore for DatabaseConnection {
    async fn list_attributes(&self, kind: AttributeKind, owner: i64) -> StoreResult<Vec<Attribute>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT id, name, user_id FROM {} WHERE user_id = $1 ORDER BY name DESC, id DESC",
            kind.table()
        );
        let rows = client
            .query(sql.as_str(), &[&owner])
            .await
            .context("Failed to list attributes")?;
        rows.iter()
            .map(|row| Attribute::from_row(row).map_err(row_error))
            .collect()
    }

    async fn insert_attribute(
        &self,
        kind: AttributeKind,
        owner: i64,
        name: &str,
    ) -> StoreResult<Attribute> {
        let client = self.client().await?;
        let sql = format!(
            "INSERT INTO {} (name, user_id) VALUES ($1, $2) RETURNING id, name, user_id",
            kind.table()
        );
        let row = client
            .query_one(sql.as_str(), &[&name, &owner])
            .await
            .context("Failed to insert attribute")?;
        Attribute::from_row(&row).map_err(row_error)
    }

    async fn owned_attribute_ids(
        &self,
        kind: AttributeKind,
        owner: i64,
        ids: &[i64],
    ) -> StoreResult<Vec<i64>> {
        let ids = normalize_ids(ids);
        if ids.is_empty() {
            return Ok(ids);
        }

        let client = self.client().await?;
        let sql = format!(
            "SELECT id FROM {} WHERE user_id = $1 AND id = ANY($2) ORDER BY id",
            kind.table()
        );
        let rows = client
            .query(sql.as_str(), &[&owner, &ids])
            .await
            .context("Failed to check attribute ownership")?;
        rows.iter()
            .map(|row| row.try_get::<_, i64>(0).map_err(row_error))
            .collect()
    }
}

#[async_trait]
impl RecipeStore for DatabaseConnection {
    async fn list_recipes(&self, owner: i64, filter: &RecipeFilter) -> StoreResult<Vec<Recipe>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes r \
             WHERE r.user_id = $1 \
               AND ($2::BIGINT[] IS NULL OR EXISTS ( \
                    SELECT 1 FROM recipe_tags rt WHERE rt.recipe_id = r.id AND rt.tag_id = ANY($2))) \
               AND ($3::BIGINT[] IS NULL OR EXISTS ( \
                    SELECT 1 FROM recipe_ingredients ri \
                    WHERE ri.recipe_id = r.id AND ri.ingredient_id = ANY($3))) \
             ORDER BY r.title DESC, r.id DESC"
        );
        let rows = client
            .query(sql.as_str(), &[&owner, &filter.tags, &filter.ingredients])
            .await
            .context("Failed to list recipes")?;

        let mut recipes = rows
            .iter()
            .map(|row| Recipe::from_row(row).map_err(row_error))
            .collect::<StoreResult<Vec<_>>>()?;
        attach_links(&client, &mut recipes).await?;
        Ok(recipes)
    }

    async fn get_recipe(&self, owner: i64, id: i64) -> StoreResult<Recipe> {
        let client = self.client().await?;
        fetch_recipe(&client, owner, id).await
    }

    async fn get_recipe_detail(&self, owner: i64, id: i64) -> StoreResult<RecipeDetail> {
        let client = self.client().await?;
        let recipe = fetch_recipe(&client, owner, id).await?;
        let tags = fetch_attributes(&client, AttributeKind::Tag, &recipe.tags).await?;
        let ingredients =
            fetch_attributes(&client, AttributeKind::Ingredient, &recipe.ingredients).await?;
        Ok(RecipeDetail {
            recipe,
            tags,
            ingredients,
        })
    }

    async fn insert_recipe(&self, owner: i64, recipe: NewRecipe) -> StoreResult<Recipe> {
        let mut client = self.client().await?;
        let tx = client
            .transaction()
            .await
            .context("Failed to start transaction")?;

        let row = tx
            .query_one(
                "INSERT INTO recipes (user_id, title, time_minutes, price, link) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING id",
                &[
                    &owner,
                    &recipe.title,
                    &recipe.time_minutes,
                    &recipe.price,
                    &recipe.link,
                ],
            )
            .await
            .context("Failed to insert recipe")?;
        let id: i64 = row.try_get(0).map_err(row_error)?;

        replace_links(&tx, AttributeKind::Tag, id, &recipe.tags).await?;
        replace_links(&tx, AttributeKind::Ingredient, id, &recipe.ingredients).await?;
        let created = fetch_recipe(&tx, owner, id).await?;

        tx.commit().await.context("Failed to commit recipe")?;
        Ok(created)
    }

    async fn update_recipe(
        &self,
        owner: i64,
        id: i64,
        changes: RecipeChanges,
    ) -> StoreResult<Recipe> {
        let mut client = self.client().await?;
        let tx = client
            .transaction()
            .await
            .context("Failed to start transaction")?;

        let n = tx
            .execute(
                "UPDATE recipes SET \
                    title = COALESCE($3, title), \
                    time_minutes = COALESCE($4, time_minutes), \
                    price = COALESCE($5, price), \
                    link = COALESCE($6, link) \
                 WHERE id = $1 AND user_id = $2",
                &[
                    &id,
                    &owner,
                    &changes.title,
                    &changes.time_minutes,
                    &changes.price,
                    &changes.link,
                ],
            )
            .await
            .context("Failed to update recipe")?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }

        if let Some(tags) = &changes.tags {
            replace_links(&tx, AttributeKind::Tag, id, tags).await?;
        }
        if let Some(ingredients) = &changes.ingredients {
            replace_links(&tx, AttributeKind::Ingredient, id, ingredients).await?;
        }
        let updated = fetch_recipe(&tx, owner, id).await?;

        tx.commit().await.context("Failed to commit recipe update")?;
        Ok(updated)
    }

    async fn set_recipe_image(
        &self,
        owner: i64,
        id: i64,
        image: Option<String>,
    ) -> StoreResult<Recipe> {
        let client = self.client().await?;
        let n = client
            .execute(
                "UPDATE recipes SET image = $3 WHERE id = $1 AND user_id = $2",
                &[&id, &owner, &image],
            )
            .await
            .context("Failed to update recipe image")?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        fetch_recipe(&client, owner, id).await
    }

    async fn delete_recipe(&self, owner: i64, id: i64) -> StoreResult<Recipe> {
        let client = self.client().await?;
        let recipe = fetch_recipe(&client, owner, id).await?;
        client
            .execute(
                "DELETE FROM recipes WHERE id = $1 AND user_id = $2",
                &[&id, &owner],
            )
            .await
            .context("Failed to delete recipe")?;
        Ok(recipe)
    }
}
