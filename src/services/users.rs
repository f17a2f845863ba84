//! User accounts: registration, credential checks and profile updates.

use anyhow::Context;
use chrono::Utc;

use crate::auth::password::{hash_password, verify_password};
use crate::config::SuperuserConfig;
use crate::database::models::User;
use crate::error::{ApiError, FieldErrors, NON_FIELD_ERRORS};
use crate::store::{NewUser, Store, UserChanges};

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_FIELD_LENGTH: usize = 255;

pub const REQUIRED: &str = "This field is required.";
pub const BLANK: &str = "This field may not be blank.";
const BAD_CREDENTIALS: &str = "Unable to authenticate with provided credentials.";

/// Trim and lowercase the domain part; the local part keeps its case.
pub fn normalize_email(email: &str) -> String {
    let email = email.trim();
    match email.rsplit_once('@') {
        Some((local, domain)) => format!("{}@{}", local, domain.to_lowercase()),
        None => email.to_string(),
    }
}

/// Normalized email, or the message explaining why it is unusable
pub fn validate_email(email: &str) -> Result<String, String> {
    let email = normalize_email(email);
    if email.is_empty() {
        return Err(BLANK.to_string());
    }
    if email.chars().count() > MAX_FIELD_LENGTH {
        return Err(format!(
            "Ensure this field has no more than {MAX_FIELD_LENGTH} characters."
        ));
    }

    let valid = match email.rsplit_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(email)
    } else {
        Err("Enter a valid email address.".to_string())
    }
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err(BLANK.to_string());
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Ensure this field has at least {MIN_PASSWORD_LENGTH} characters."
        ));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<String, String> {
    let name = name.trim();
    if name.chars().count() > MAX_FIELD_LENGTH {
        return Err(format!(
            "Ensure this field has no more than {MAX_FIELD_LENGTH} characters."
        ));
    }
    Ok(name.to_string())
}

/// Register a regular user
pub async fn create_user(
    store: &dyn Store,
    email: &str,
    password: &str,
    name: &str,
) -> Result<User, ApiError> {
    insert_validated(store, email, password, name, false).await
}

/// Register a user with staff and superuser flags set
pub async fn create_superuser(
    store: &dyn Store,
    email: &str,
    password: &str,
) -> Result<User, ApiError> {
    insert_validated(store, email, password, "", true).await
}

async fn insert_validated(
    store: &dyn Store,
    email: &str,
    password: &str,
    name: &str,
    superuser: bool,
) -> Result<User, ApiError> {
    let mut errors = FieldErrors::new();
    let email = validate_email(email).unwrap_or_else(|msg| {
        errors.add("email", msg);
        String::new()
    });
    if let Err(msg) = validate_password(password) {
        errors.add("password", msg);
    }
    let name = validate_name(name).unwrap_or_else(|msg| {
        errors.add("name", msg);
        String::new()
    });
    errors.into_result()?;

    let password_hash = hash_password(password)?;
    let user = store
        .insert_user(NewUser {
            email,
            password_hash,
            name,
            is_staff: superuser,
            is_superuser: superuser,
        })
        .await?;

    tracing::info!("Created user id={} superuser={}", user.id, superuser);
    Ok(user)
}

/// Create the configured superuser unless an account already holds that email
pub async fn ensure_superuser(store: &dyn Store, config: &SuperuserConfig) -> anyhow::Result<()> {
    let email = normalize_email(&config.email);
    if store
        .user_by_email(&email)
        .await
        .context("Failed to look up superuser")?
        .is_some()
    {
        tracing::info!("Superuser {} already exists", email);
        return Ok(());
    }

    create_superuser(store, &email, &config.password)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create superuser {}: {}", email, e))?;
    Ok(())
}

/// Check credentials and record the login time
pub async fn authenticate(store: &dyn Store, email: &str, password: &str) -> Result<User, ApiError> {
    let email = normalize_email(email);
    let Some(user) = store.user_by_email(&email).await? else {
        tracing::debug!("Login attempt for unknown email");
        return Err(ApiError::validation(NON_FIELD_ERRORS, BAD_CREDENTIALS));
    };

    if !user.is_active || !verify_password(password, &user.password_hash)? {
        tracing::debug!("Rejected login for user id={}", user.id);
        return Err(ApiError::validation(NON_FIELD_ERRORS, BAD_CREDENTIALS));
    }

    store.record_login(user.id, Utc::now()).await?;
    Ok(user)
}

/// Profile fields supplied by the client; `None` means untouched
#[derive(Debug, Default, Clone)]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
}

/// Apply a self-service profile update; a new password is re-hashed
pub async fn update_profile(
    store: &dyn Store,
    user_id: i64,
    update: ProfileUpdate,
) -> Result<User, ApiError> {
    let mut errors = FieldErrors::new();
    let mut changes = UserChanges::default();

    if let Some(email) = &update.email {
        match validate_email(email) {
            Ok(email) => changes.email = Some(email),
            Err(msg) => errors.add("email", msg),
        }
    }
    if let Some(password) = &update.password {
        if let Err(msg) = validate_password(password) {
            errors.add("password", msg);
        }
    }
    if let Some(name) = &update.name {
        match validate_name(name) {
            Ok(name) => changes.name = Some(name),
            Err(msg) => errors.add("name", msg),
        }
    }
    errors.into_result()?;

    if let Some(password) = &update.password {
        changes.password_hash = Some(hash_password(password)?);
    }

    Ok(store.update_user(user_id, changes).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, UserStore};

    #[test]
    fn email_domain_is_lowercased() {
        assert_eq!(normalize_email("test@GmAiL.com"), "test@gmail.com");
        assert_eq!(normalize_email("  Test.User@Example.COM "), "Test.User@example.com");
    }

    #[test]
    fn malformed_emails_are_rejected() {
        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@gmail.com").is_err());
        assert!(validate_email("test@localhost").is_err());
        assert!(validate_email("te st@gmail.com").is_err());
        assert_eq!(validate_email("test@GMAIL.com").unwrap(), "test@gmail.com");
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("").is_err());
        assert!(validate_password("password").is_ok());
    }

    #[tokio::test]
    async fn created_user_password_is_hashed() {
        let store = MemoryStore::new();
        let user = create_user(&store, "test@gmail.com", "password", "Test").await.unwrap();

        assert_eq!(user.email, "test@gmail.com");
        assert_ne!(user.password_hash, "password");
        assert!(verify_password("password", &user.password_hash).unwrap());
        assert!(!user.is_staff);
        assert!(!user.is_superuser);
    }

    #[tokio::test]
    async fn differently_cased_domains_are_one_identity() {
        let store = MemoryStore::new();
        let user = create_user(&store, "test@GmAiL.com", "password", "").await.unwrap();
        assert_eq!(user.email, "test@gmail.com");

        let err = create_user(&store, "test@gmail.com", "password", "").await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(ref e) if e.contains("email")));

        let found = store.user_by_email("test@gmail.com").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
    }

    #[tokio::test]
    async fn superusers_get_staff_flags() {
        let store = MemoryStore::new();
        let user = create_superuser(&store, "admin@gmail.com", "password123").await.unwrap();
        assert!(user.is_staff);
        assert!(user.is_superuser);
    }

    #[tokio::test]
    async fn ensure_superuser_is_idempotent() {
        let store = MemoryStore::new();
        let config = SuperuserConfig {
            email: "admin@Gmail.com".to_string(),
            password: "password123".to_string(),
        };
        ensure_superuser(&store, &config).await.unwrap();
        ensure_superuser(&store, &config).await.unwrap();

        let admin = store.user_by_email("admin@gmail.com").await.unwrap().unwrap();
        assert!(admin.is_superuser);
    }

    #[tokio::test]
    async fn authenticate_checks_password_and_records_login() {
        let store = MemoryStore::new();
        create_user(&store, "test@gmail.com", "password", "").await.unwrap();

        assert!(authenticate(&store, "test@gmail.com", "wrong_password").await.is_err());
        assert!(authenticate(&store, "other@gmail.com", "password").await.is_err());

        let user = authenticate(&store, "test@GMAIL.com", "password").await.unwrap();
        let stored = store.user_by_id(user.id).await.unwrap().unwrap();
        assert!(stored.last_login.is_some());
    }

    #[tokio::test]
    async fn profile_update_rehashes_password() {
        let store = MemoryStore::new();
        let user = create_user(&store, "test@gmail.com", "password", "old").await.unwrap();

        let updated = update_profile(
            &store,
            user.id,
            ProfileUpdate {
                email: Some("new@Gmail.com".to_string()),
                password: Some("new_password".to_string()),
                name: Some("new".to_string()),
            },
        )
        .await
        .unwrap();

        assert_eq!(updated.email, "new@gmail.com");
        assert_eq!(updated.name, "new");
        assert!(verify_password("new_password", &updated.password_hash).unwrap());
        assert!(!verify_password("password", &updated.password_hash).unwrap());
    }

    #[tokio::test]
    async fn profile_update_rejects_taken_email() {
        let store = MemoryStore::new();
        create_user(&store, "taken@gmail.com", "password", "").await.unwrap();
        let user = create_user(&store, "test@gmail.com", "password", "").await.unwrap();

        let err = update_profile(
            &store,
            user.id,
            ProfileUpdate {
                email: Some("taken@gmail.com".to_string()),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
