//! Configuration module for environment variables and application settings

use anyhow::{Result, anyhow};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Which store backend the server runs against
    pub storage: StorageBackend,

    /// Database configuration, only read by the postgres backend
    pub database: DatabaseSettings,

    /// Token signing configuration
    pub auth: AuthConfig,

    /// Uploaded media configuration
    pub media: MediaConfig,

    /// Optional superuser created at startup
    pub superuser: Option<SuperuserConfig>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow!("unknown STORAGE_BACKEND '{}', expected postgres or memory", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: usize,
    pub ssl: bool,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Directory uploaded files are written under
    pub root: PathBuf,
    /// Public prefix prepended to stored paths in responses
    pub url: String,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct SuperuserConfig {
    pub email: String,
    pub password: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let storage = env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()?;

        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ => {
                tracing::warn!("JWT_SECRET not set, falling back to an insecure development secret");
                "dev_secret".to_string()
            }
        };

        let superuser = match (env::var("SUPERUSER_EMAIL"), env::var("SUPERUSER_PASSWORD")) {
            (Ok(email), Ok(password)) if !email.is_empty() => Some(SuperuserConfig { email, password }),
            _ => None,
        };

        Ok(Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                // $PORT wins so the server runs unchanged on PaaS hosts
                port: env::var("PORT")
                    .or_else(|_| env::var("SERVER_PORT"))
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(3000),
                cors_origins: env::var("CORS_ORIGINS")
                    .map(|origins| split_list(&origins))
                    .unwrap_or_else(|_| vec!["http://localhost:3001".to_string()]),
            },

            storage,

            database: DatabaseSettings {
                url: env::var("DATABASE_URL").ok(),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(16),
                ssl: env::var("DATABASE_SSL")
                    .map(|v| parse_bool(&v))
                    .unwrap_or(false),
            },

            auth: AuthConfig {
                jwt_secret,
                token_ttl_hours: env::var("JWT_EXPIRY_HOURS")
                    .ok()
                    .and_then(|h| h.parse().ok())
                    .unwrap_or(24),
            },

            media: MediaConfig {
                root: env::var("MEDIA_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("media")),
                url: env::var("MEDIA_URL").unwrap_or_else(|_| "/media/".to_string()),
                max_upload_bytes: env::var("MAX_UPLOAD_BYTES")
                    .ok()
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(10 * 1024 * 1024),
            },

            superuser,
        })
    }

    /// Configuration used by the test suite: memory store, media in a scratch directory
    #[cfg(test)]
    pub fn for_tests(media_root: PathBuf) -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                cors_origins: Vec::new(),
            },
            storage: StorageBackend::Memory,
            database: DatabaseSettings {
                url: None,
                max_connections: 1,
                ssl: false,
            },
            auth: AuthConfig {
                jwt_secret: "test_secret".to_string(),
                token_ttl_hours: 1,
            },
            media: MediaConfig {
                root: media_root,
                url: "/media/".to_string(),
                max_upload_bytes: 1024 * 1024,
            },
            superuser: None,
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on" | "require")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_backend_parses_known_names() {
        assert_eq!("postgres".parse::<StorageBackend>().unwrap(), StorageBackend::Postgres);
        assert_eq!(" Memory ".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert!("sqlite".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn origin_lists_skip_blanks() {
        assert_eq!(
            split_list("http://a.test, ,http://b.test"),
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
    }

    #[test]
    fn ssl_flag_accepts_common_truthy_values() {
        assert!(parse_bool("true"));
        assert!(parse_bool("require"));
        assert!(!parse_bool("off"));
    }
}
