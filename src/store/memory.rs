//! In-process store backend.
//!
//! All tables sit behind one lock so cascades and link rewrites are atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::{
    AttributeStore, NewRecipe, NewUser, RecipeChanges, RecipeFilter, RecipeStore, StoreError,
    StoreResult, UserChanges, UserStore, normalize_ids,
};
use crate::database::models::{Attribute, AttributeKind, Recipe, RecipeDetail, User};

#[derive(Debug, Default)]
struct Tables {
    last_id: i64,
    users: BTreeMap<i64, User>,
    tags: BTreeMap<i64, Attribute>,
    ingredients: BTreeMap<i64, Attribute>,
    recipes: BTreeMap<i64, Recipe>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn attributes(&self, kind: AttributeKind) -> &BTreeMap<i64, Attribute> {
        match kind {
            AttributeKind::Tag => &self.tags,
            AttributeKind::Ingredient => &self.ingredients,
        }
    }

    fn attributes_mut(&mut self, kind: AttributeKind) -> &mut BTreeMap<i64, Attribute> {
        match kind {
            AttributeKind::Tag => &mut self.tags,
            AttributeKind::Ingredient => &mut self.ingredients,
        }
    }

    fn owned_recipe_mut(&mut self, owner: i64, id: i64) -> StoreResult<&mut Recipe> {
        self.recipes
            .get_mut(&id)
            .filter(|recipe| recipe.user_id == owner)
            .ok_or(StoreError::NotFound)
    }

    fn expand(&self, kind: AttributeKind, ids: &[i64]) -> Vec<Attribute> {
        let attributes = self.attributes(kind);
        ids.iter().filter_map(|id| attributes.get(id).cloned()).collect()
    }
}

/// Store backed by in-memory maps
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn links_match(links: &[i64], wanted: Option<&Vec<i64>>) -> bool {
    match wanted {
        Some(wanted) => links.iter().any(|id| wanted.contains(id)),
        None => true,
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        let mut tables = self.tables.write();
        if tables.users.values().any(|existing| existing.email == user.email) {
            return Err(StoreError::DuplicateEmail);
        }

        let id = tables.next_id();
        let user = User {
            id,
            email: user.email,
            password_hash: user.password_hash,
            name: user.name,
            is_active: true,
            is_staff: user.is_staff,
            is_superuser: user.is_superuser,
            date_joined: Utc::now(),
            last_login: None,
        };
        tables.users.insert(id, user.clone());
        Ok(user)
    }

    async fn user_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(self.tables.read().users.get(&id).cloned())
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .tables
            .read()
            .users
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> StoreResult<User> {
        let mut tables = self.tables.write();
        if let Some(email) = &changes.email {
            if tables
                .users
                .values()
                .any(|other| other.id != id && &other.email == email)
            {
                return Err(StoreError::DuplicateEmail);
            }
        }

        let user = tables.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(password_hash) = changes.password_hash {
            user.password_hash = password_hash;
        }
        if let Some(name) = changes.name {
            user.name = name;
        }
        Ok(user.clone())
    }

    async fn record_login(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let user = tables.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.last_login = Some(at);
        Ok(())
    }

    async fn delete_user(&self, id: i64) -> StoreResult<()> {
        let mut tables = self.tables.write();
        tables.users.remove(&id).ok_or(StoreError::NotFound)?;
        tables.recipes.retain(|_, recipe| recipe.user_id != id);
        tables.tags.retain(|_, tag| tag.user_id != id);
        tables.ingredients.retain(|_, ingredient| ingredient.user_id != id);
        Ok(())
    }
}

#[async_trait]
impl AttributeStore for MemoryStore {
    async fn list_attributes(&self, kind: AttributeKind, owner: i64) -> StoreResult<Vec<Attribute>> {
        let tables = self.tables.read();
        let mut attributes: Vec<Attribute> = tables
            .attributes(kind)
            .values()
            .filter(|attribute| attribute.user_id == owner)
            .cloned()
            .collect();
        attributes.sort_by(|a, b| b.name.cmp(&a.name).then(b.id.cmp(&a.id)));
        Ok(attributes)
    }

    async fn insert_attribute(
        &self,
        kind: AttributeKind,
        owner: i64,
        name: &str,
    ) -> StoreResult<Attribute> {
        let mut tables = self.tables.write();
        if !tables.users.contains_key(&owner) {
            return Err(StoreError::NotFound);
        }

        let id = tables.next_id();
        let attribute = Attribute {
            id,
            name: name.to_string(),
            user_id: owner,
        };
        tables.attributes_mut(kind).insert(id, attribute.clone());
        Ok(attribute)
    }

    async fn owned_attribute_ids(
        &self,
        kind: AttributeKind,
        owner: i64,
        ids: &[i64],
    ) -> StoreResult<Vec<i64>> {
        let tables = self.tables.read();
        let attributes = tables.attributes(kind);
        Ok(normalize_ids(ids)
            .into_iter()
            .filter(|id| attributes.get(id).is_some_and(|a| a.user_id == owner))
            .collect())
    }
}

#[async_trait]
impl RecipeStore for MemoryStore {
    async fn list_recipes(&self, owner: i64, filter: &RecipeFilter) -> StoreResult<Vec<Recipe>> {
        let tables = self.tables.read();
        let mut recipes: Vec<Recipe> = tables
            .recipes
            .values()
            .filter(|recipe| recipe.user_id == owner)
            .filter(|recipe| links_match(&recipe.tags, filter.tags.as_ref()))
            .filter(|recipe| links_match(&recipe.ingredients, filter.ingredients.as_ref()))
            .cloned()
            .collect();
        recipes.sort_by(|a, b| b.title.cmp(&a.title).then(b.id.cmp(&a.id)));
        Ok(recipes)
    }

    async fn get_recipe(&self, owner: i64, id: i64) -> StoreResult<Recipe> {
        self.tables
            .read()
            .recipes
            .get(&id)
            .filter(|recipe| recipe.user_id == owner)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_recipe_detail(&self, owner: i64, id: i64) -> StoreResult<RecipeDetail> {
        let tables = self.tables.read();
        let recipe = tables
            .recipes
            .get(&id)
            .filter(|recipe| recipe.user_id == owner)
            .cloned()
            .ok_or(StoreError::NotFound)?;

        Ok(RecipeDetail {
            tags: tables.expand(AttributeKind::Tag, &recipe.tags),
            ingredients: tables.expand(AttributeKind::Ingredient, &recipe.ingredients),
            recipe,
        })
    }

    async fn insert_recipe(&self, owner: i64, recipe: NewRecipe) -> StoreResult<Recipe> {
        let mut tables = self.tables.write();
        if !tables.users.contains_key(&owner) {
            return Err(StoreError::NotFound);
        }

        let id = tables.next_id();
        let recipe = Recipe {
            id,
            user_id: owner,
            title: recipe.title,
            time_minutes: recipe.time_minutes,
            price: recipe.price,
            link: recipe.link,
            image: None,
            tags: normalize_ids(&recipe.tags),
            ingredients: normalize_ids(&recipe.ingredients),
        };
        tables.recipes.insert(id, recipe.clone());
        Ok(recipe)
    }

    async fn update_recipe(
        &self,
        owner: i64,
        id: i64,
        changes: RecipeChanges,
    ) -> StoreResult<Recipe> {
        let mut tables = self.tables.write();
        let recipe = tables.owned_recipe_mut(owner, id)?;

        if let Some(title) = changes.title {
            recipe.title = title;
        }
        if let Some(time_minutes) = changes.time_minutes {
            recipe.time_minutes = time_minutes;
        }
        if let Some(price) = changes.price {
            recipe.price = price;
        }
        if let Some(link) = changes.link {
            recipe.link = link;
        }
        if let Some(tags) = changes.tags {
            recipe.tags = normalize_ids(&tags);
        }
        if let Some(ingredients) = changes.ingredients {
            recipe.ingredients = normalize_ids(&ingredients);
        }
        Ok(recipe.clone())
    }

    async fn set_recipe_image(
        &self,
        owner: i64,
        id: i64,
        image: Option<String>,
    ) -> StoreResult<Recipe> {
        let mut tables = self.tables.write();
        let recipe = tables.owned_recipe_mut(owner, id)?;
        recipe.image = image;
        Ok(recipe.clone())
    }

    async fn delete_recipe(&self, owner: i64, id: i64) -> StoreResult<Recipe> {
        let mut tables = self.tables.write();
        tables.owned_recipe_mut(owner, id)?;
        tables.recipes.remove(&id).ok_or(StoreError::NotFound)
    }
}
