//! Password hashing and verification.
//!
//! The chosen algorithm is recorded in the hash encoding itself: Argon2id
//! produces PHC strings (`$argon2id$...`), bcrypt produces `$2b$...`.
//! Verification dispatches on the prefix, so legacy bcrypt hashes keep
//! working after a deployment switches to Argon2id and are upgraded on the
//! next successful login.

use argon2::Argon2;
use argon2::password_hash::{
    PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString, rand_core::OsRng,
};

use crate::config::PasswordScheme;
use crate::error::AuthError;

const BCRYPT_COST: u32 = 12;

/// Hash a password under the given scheme.
pub fn hash_password(password: &str, scheme: PasswordScheme) -> Result<String, AuthError> {
    match scheme {
        PasswordScheme::Argon2id => {
            let salt = SaltString::generate(&mut OsRng);
            Argon2::default()
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| AuthError::Hashing(e.to_string()))
        }
        PasswordScheme::Bcrypt => {
            bcrypt::hash(password, BCRYPT_COST).map_err(|e| AuthError::Hashing(e.to_string()))
        }
    }
}

/// Verify a password against a stored hash of either scheme.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    if stored_hash.starts_with("$argon2") {
        match PasswordHash::new(stored_hash) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    } else if stored_hash.starts_with("$2") {
        bcrypt::verify(password, stored_hash).unwrap_or(false)
    } else {
        false
    }
}

/// Whether the stored hash was produced under a different scheme than the
/// configured preference and should be re-hashed on the next login.
pub fn needs_rehash(stored_hash: &str, preferred: PasswordScheme) -> bool {
    match preferred {
        PasswordScheme::Argon2id => !stored_hash.starts_with("$argon2id"),
        PasswordScheme::Bcrypt => !stored_hash.starts_with("$2"),
    }
}
