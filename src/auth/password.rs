//! Password hashing and verification using Argon2id.

use anyhow::{Result, anyhow};
use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

/// Hash a plaintext password into a PHC-format string
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow!("Failed to hash password: {}", e))
}

/// Verify a plaintext password against a stored PHC hash.
///
/// Returns `Ok(false)` on mismatch and an error only when the stored hash is malformed.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| anyhow!("Invalid password hash format: {}", e))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow!("Password verification failed: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_not_plaintext_and_verifies() {
        let hash = hash_password("test_password").unwrap();
        assert_ne!(hash, "test_password");
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("test_password", &hash).unwrap());
    }

    #[test]
    fn wrong_password_does_not_match() {
        let hash = hash_password("test_password").unwrap();
        assert!(!verify_password("bad_password", &hash).unwrap());
    }

    #[test]
    fn same_password_hashes_differently() {
        assert_ne!(hash_password("password").unwrap(), hash_password("password").unwrap());
    }

    #[test]
    fn malformed_hash_returns_error() {
        assert!(verify_password("pw", "not-a-hash").is_err());
    }
}
