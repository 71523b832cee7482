//! Authentication configuration.

use chrono::Duration;

/// Password hashing scheme.
///
/// The scheme is recorded implicitly in the hash encoding, so verification
/// accepts either scheme regardless of the configured preference and
/// `needs_rehash` detects hashes produced under the non-preferred one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PasswordScheme {
    /// Argon2id with the crate defaults (preferred)
    #[default]
    Argon2id,
    /// bcrypt at cost 12 (fallback)
    Bcrypt,
}

/// Tunables for the authentication manager.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Default session lifetime
    pub session_lifetime: Duration,
    /// Failed attempts tolerated per throttle key before lockout
    pub max_login_attempts: u32,
    /// Window within which failed attempts count toward the lockout
    pub lockout_window: Duration,
    /// Preferred password hashing scheme
    pub password_scheme: PasswordScheme,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_lifetime: Duration::hours(24),
            max_login_attempts: 5,
            lockout_window: Duration::minutes(5),
            password_scheme: PasswordScheme::default(),
        }
    }
}
