//! Authentication Manager
//!
//! Central manager for user accounts, credentials, and sessions. All shared
//! state lives behind a single `RwLock`; password hashing runs on the
//! blocking pool so the lock is never held across CPU-heavy work.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use warden_events::EventBus;

use crate::config::{AuthConfig, PasswordScheme};
use crate::error::{AuthError, AuthResult};
use crate::password;
use crate::session::{Session, SessionOptions};
use crate::user::{NewUser, User, UserUpdate};

const SOURCE: &str = "auth";

#[derive(Default)]
struct AuthState {
    users: HashMap<Uuid, User>,
    /// Lowercased username -> user id
    username_index: HashMap<String, Uuid>,
    /// Lowercased email -> user id
    email_index: HashMap<String, Uuid>,
    sessions: HashMap<Uuid, Session>,
    user_sessions: HashMap<Uuid, HashSet<Uuid>>,
    /// Throttle key (`lower(identifier):ip`) -> failed attempt timestamps
    login_attempts: HashMap<String, Vec<DateTime<Utc>>>,
}

/// Manager for users, credentials, and sessions.
pub struct AuthenticationManager {
    config: AuthConfig,
    state: RwLock<AuthState>,
    bus: Arc<EventBus>,
}

impl AuthenticationManager {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self::with_config(bus, AuthConfig::default())
    }

    pub fn with_config(bus: Arc<EventBus>, config: AuthConfig) -> Self {
        Self {
            config,
            state: RwLock::new(AuthState::default()),
            bus,
        }
    }

    /// Register a new user account.
    ///
    /// Username and email collisions are detected case-insensitively.
    pub async fn register_user(&self, new_user: NewUser) -> AuthResult<User> {
        let username_key = new_user.username.to_lowercase();
        let email_key = new_user.email.to_lowercase();

        {
            let state = self.state.read().await;
            Self::check_unique(&state, &new_user.username, &new_user.email)?;
        }

        let password_hash =
            Self::hash_blocking(new_user.password.clone(), self.config.password_scheme).await?;

        let user = User {
            user_id: Uuid::new_v4(),
            username: new_user.username.clone(),
            email: new_user.email.clone(),
            password_hash,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            active: true,
            verified: false,
            created_at: Utc::now(),
            last_login: None,
            mfa_enabled: false,
            mfa_methods: Default::default(),
            metadata: new_user.metadata,
        };

        {
            let mut state = self.state.write().await;
            // Uniqueness is only authoritative under the write lock
            Self::check_unique(&state, &user.username, &user.email)?;
            state.username_index.insert(username_key, user.user_id);
            state.email_index.insert(email_key, user.user_id);
            state.users.insert(user.user_id, user.clone());
        }

        info!(target: "warden::auth", user = %user.label(), "user registered");
        self.bus
            .emit_new(
                "user.registered",
                SOURCE,
                json!({
                    "user_id": user.user_id,
                    "username": user.username,
                    "email": user.email,
                }),
            )
            .await;
        Ok(user)
    }

    /// Authenticate with username or email plus password.
    ///
    /// Failed attempts are throttled per `lower(identifier):ip` key: after
    /// `max_login_attempts` failures inside `lockout_window`, further
    /// attempts fail with [`AuthError::RateLimited`] until the window
    /// drains, even with the correct password.
    pub async fn authenticate(
        &self,
        username_or_email: &str,
        password: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> AuthResult<User> {
        let throttle_key = format!(
            "{}:{}",
            username_or_email.to_lowercase(),
            ip_address.unwrap_or("unknown")
        );

        {
            let mut state = self.state.write().await;
            if self.is_rate_limited(&mut state, &throttle_key) {
                warn!(
                    target: "warden::auth",
                    identifier = %username_or_email,
                    ip = ?ip_address,
                    "login attempt rejected: rate limited"
                );
                return Err(AuthError::RateLimited);
            }
        }

        let user = {
            let state = self.state.read().await;
            Self::find_by_username_or_email(&state, username_or_email)
        };
        let Some(user) = user else {
            self.record_failed_attempt(&throttle_key).await;
            return Err(AuthError::InvalidCredentials);
        };

        if !user.active {
            return Err(AuthError::AccountDisabled);
        }

        let verified =
            Self::verify_blocking(password.to_string(), user.password_hash.clone()).await?;
        if !verified {
            self.record_failed_attempt(&throttle_key).await;
            return Err(AuthError::InvalidCredentials);
        }

        // Upgrade hashes produced under an outdated scheme.
        let rehashed = if password::needs_rehash(&user.password_hash, self.config.password_scheme) {
            Some(Self::hash_blocking(password.to_string(), self.config.password_scheme).await?)
        } else {
            None
        };

        let user = {
            let mut state = self.state.write().await;
            state.login_attempts.remove(&throttle_key);
            let stored = state
                .users
                .get_mut(&user.user_id)
                .ok_or(AuthError::InvalidCredentials)?;
            if let Some(hash) = rehashed {
                stored.password_hash = hash;
            }
            stored.last_login = Some(Utc::now());
            stored.clone()
        };

        info!(target: "warden::auth", user = %user.label(), ip = ?ip_address, "login succeeded");
        self.bus
            .emit_new(
                "user.login",
                SOURCE,
                json!({
                    "user_id": user.user_id,
                    "username": user.username,
                    "ip_address": ip_address,
                    "user_agent": user_agent,
                }),
            )
            .await;
        Ok(user)
    }

    /// Create a session for a user.
    pub async fn create_session(
        &self,
        user_id: Uuid,
        options: SessionOptions,
    ) -> AuthResult<Session> {
        let now = Utc::now();
        let lifetime = options.lifetime.unwrap_or(self.config.session_lifetime);
        let session = Session {
            session_id: Uuid::new_v4(),
            user_id,
            created_at: now,
            expires_at: now + lifetime,
            ip_address: options.ip_address,
            user_agent: options.user_agent,
            active: true,
            metadata: options.metadata,
        };

        {
            let mut state = self.state.write().await;
            if !state.users.contains_key(&user_id) {
                return Err(AuthError::UserNotFound(user_id.to_string()));
            }
            state.sessions.insert(session.session_id, session.clone());
            state
                .user_sessions
                .entry(user_id)
                .or_default()
                .insert(session.session_id);
        }

        self.bus
            .emit_new(
                "session.created",
                SOURCE,
                json!({
                    "session_id": session.session_id,
                    "user_id": user_id,
                    "ip_address": session.ip_address,
                    "expires_at": session.expires_at,
                }),
            )
            .await;
        Ok(session)
    }

    /// Validate a session, lazily deactivating it when expired or orphaned.
    ///
    /// Returns `Some((user, session))` iff the session is active, unexpired,
    /// and belongs to an active user.
    pub async fn validate_session(&self, session_id: Uuid) -> Option<(User, Session)> {
        let mut state = self.state.write().await;
        let session = state.sessions.get(&session_id)?.clone();
        if !session.active {
            return None;
        }
        if session.is_expired() {
            if let Some(stored) = state.sessions.get_mut(&session_id) {
                stored.active = false;
            }
            return None;
        }
        let Some(user) = state.users.get(&session.user_id).cloned() else {
            // Orphaned: its user is gone
            if let Some(stored) = state.sessions.get_mut(&session_id) {
                stored.active = false;
            }
            return None;
        };
        if !user.active {
            if let Some(stored) = state.sessions.get_mut(&session_id) {
                stored.active = false;
            }
            return None;
        }
        Some((user, session))
    }

    /// Invalidate a single session. Idempotent; returns `false` only for an
    /// unknown session id.
    pub async fn invalidate_session(&self, session_id: Uuid) -> bool {
        let payload = {
            let mut state = self.state.write().await;
            match state.sessions.get_mut(&session_id) {
                None => return false,
                Some(session) if !session.active => None,
                Some(session) => {
                    session.active = false;
                    Some(json!({
                        "session_ids": [session_id],
                        "user_id": session.user_id,
                        "reason": "invalidated",
                    }))
                }
            }
        };
        if let Some(payload) = payload {
            self.bus.emit_new("session.invalidated", SOURCE, payload).await;
        }
        true
    }

    /// Invalidate every active session of a user. Returns how many were
    /// deactivated by this call.
    pub async fn invalidate_all_user_sessions(&self, user_id: Uuid) -> usize {
        let invalidated = {
            let mut state = self.state.write().await;
            Self::deactivate_user_sessions(&mut state, user_id)
        };
        if !invalidated.is_empty() {
            self.bus
                .emit_new(
                    "session.invalidated",
                    SOURCE,
                    json!({
                        "session_ids": invalidated,
                        "user_id": user_id,
                        "reason": "bulk_invalidation",
                    }),
                )
                .await;
        }
        invalidated.len()
    }

    /// Change a password, verifying the current one first.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> AuthResult<()> {
        let user = self
            .get_user_by_id(user_id)
            .await
            .ok_or_else(|| AuthError::UserNotFound(user_id.to_string()))?;
        let verified =
            Self::verify_blocking(current_password.to_string(), user.password_hash).await?;
        if !verified {
            return Err(AuthError::InvalidCredentials);
        }

        let new_hash =
            Self::hash_blocking(new_password.to_string(), self.config.password_scheme).await?;
        {
            let mut state = self.state.write().await;
            let stored = state
                .users
                .get_mut(&user_id)
                .ok_or_else(|| AuthError::UserNotFound(user_id.to_string()))?;
            stored.password_hash = new_hash;
        }

        self.bus
            .emit_new("user.password_changed", SOURCE, json!({"user_id": user_id}))
            .await;
        Ok(())
    }

    /// Administrative password reset. Invalidates all of the user's
    /// sessions; returns how many were deactivated.
    pub async fn reset_password(&self, user_id: Uuid, new_password: &str) -> AuthResult<usize> {
        let new_hash =
            Self::hash_blocking(new_password.to_string(), self.config.password_scheme).await?;
        let invalidated = {
            let mut state = self.state.write().await;
            let stored = state
                .users
                .get_mut(&user_id)
                .ok_or_else(|| AuthError::UserNotFound(user_id.to_string()))?;
            stored.password_hash = new_hash;
            Self::deactivate_user_sessions(&mut state, user_id)
        };

        self.bus
            .emit_new(
                "user.password_reset",
                SOURCE,
                json!({
                    "user_id": user_id,
                    "sessions_invalidated": invalidated.len(),
                }),
            )
            .await;
        Ok(invalidated.len())
    }

    /// Apply a partial update, rewriting the username/email indices as
    /// needed. Deactivating a user invalidates all of its sessions.
    pub async fn update_user(&self, user_id: Uuid, update: UserUpdate) -> AuthResult<User> {
        let changed_fields = update.changed_fields();
        let user = {
            let mut state = self.state.write().await;
            if !state.users.contains_key(&user_id) {
                return Err(AuthError::UserNotFound(user_id.to_string()));
            }

            if let Some(username) = &update.username {
                let new_key = username.to_lowercase();
                if state
                    .username_index
                    .get(&new_key)
                    .is_some_and(|id| *id != user_id)
                {
                    return Err(AuthError::DuplicateUsername(username.clone()));
                }
                let old_key = state.users[&user_id].username.to_lowercase();
                state.username_index.remove(&old_key);
                state.username_index.insert(new_key, user_id);
            }
            if let Some(email) = &update.email {
                let new_key = email.to_lowercase();
                if state
                    .email_index
                    .get(&new_key)
                    .is_some_and(|id| *id != user_id)
                {
                    return Err(AuthError::DuplicateEmail(email.clone()));
                }
                let old_key = state.users[&user_id].email.to_lowercase();
                state.email_index.remove(&old_key);
                state.email_index.insert(new_key, user_id);
            }

            let deactivated = update.active == Some(false);
            {
                let user = state
                    .users
                    .get_mut(&user_id)
                    .ok_or_else(|| AuthError::UserNotFound(user_id.to_string()))?;
                if let Some(username) = update.username {
                    user.username = username;
                }
                if let Some(email) = update.email {
                    user.email = email;
                }
                if let Some(first_name) = update.first_name {
                    user.first_name = Some(first_name);
                }
                if let Some(last_name) = update.last_name {
                    user.last_name = Some(last_name);
                }
                if let Some(active) = update.active {
                    user.active = active;
                }
                if let Some(verified) = update.verified {
                    user.verified = verified;
                }
                if let Some(metadata) = update.metadata {
                    user.metadata = metadata;
                }
            }
            if deactivated {
                Self::deactivate_user_sessions(&mut state, user_id);
            }
            state.users[&user_id].clone()
        };

        self.bus
            .emit_new(
                "user.updated",
                SOURCE,
                json!({"user_id": user_id, "fields": changed_fields}),
            )
            .await;
        Ok(user)
    }

    /// Delete a user along with its indices and sessions.
    pub async fn delete_user(&self, user_id: Uuid) -> bool {
        let removed = {
            let mut state = self.state.write().await;
            let Some(user) = state.users.remove(&user_id) else {
                return false;
            };
            state.username_index.remove(&user.username.to_lowercase());
            state.email_index.remove(&user.email.to_lowercase());
            if let Some(session_ids) = state.user_sessions.remove(&user_id) {
                for session_id in session_ids {
                    state.sessions.remove(&session_id);
                }
            }
            user
        };

        self.bus
            .emit_new(
                "user.deleted",
                SOURCE,
                json!({"user_id": user_id, "username": removed.username}),
            )
            .await;
        true
    }

    /// Mirror MFA method state onto the user record (wiring from the MFA
    /// manager; emits no event of its own).
    pub async fn set_mfa_state(
        &self,
        user_id: Uuid,
        methods: std::collections::BTreeSet<String>,
    ) -> AuthResult<()> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AuthError::UserNotFound(user_id.to_string()))?;
        user.mfa_enabled = !methods.is_empty();
        user.mfa_methods = methods;
        Ok(())
    }

    /// Drop expired sessions entirely. Returns how many were removed.
    pub async fn cleanup_expired_sessions(&self) -> usize {
        let mut state = self.state.write().await;
        let expired: Vec<Uuid> = state
            .sessions
            .values()
            .filter(|s| s.is_expired())
            .map(|s| s.session_id)
            .collect();
        for session_id in &expired {
            if let Some(session) = state.sessions.remove(session_id) {
                if let Some(ids) = state.user_sessions.get_mut(&session.user_id) {
                    ids.remove(session_id);
                }
            }
        }
        expired.len()
    }

    pub async fn get_user_by_id(&self, user_id: Uuid) -> Option<User> {
        self.state.read().await.users.get(&user_id).cloned()
    }

    pub async fn get_user_by_username(&self, username: &str) -> Option<User> {
        let state = self.state.read().await;
        let user_id = state.username_index.get(&username.to_lowercase())?;
        state.users.get(user_id).cloned()
    }

    pub async fn get_user_by_email(&self, email: &str) -> Option<User> {
        let state = self.state.read().await;
        let user_id = state.email_index.get(&email.to_lowercase())?;
        state.users.get(user_id).cloned()
    }

    pub async fn get_session(&self, session_id: Uuid) -> Option<Session> {
        self.state.read().await.sessions.get(&session_id).cloned()
    }

    pub async fn get_user_sessions(&self, user_id: Uuid) -> Vec<Session> {
        let state = self.state.read().await;
        state
            .user_sessions
            .get(&user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.sessions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn list_users(&self) -> Vec<User> {
        self.state.read().await.users.values().cloned().collect()
    }

    fn check_unique(state: &AuthState, username: &str, email: &str) -> AuthResult<()> {
        if state.username_index.contains_key(&username.to_lowercase()) {
            return Err(AuthError::DuplicateUsername(username.to_string()));
        }
        if state.email_index.contains_key(&email.to_lowercase()) {
            return Err(AuthError::DuplicateEmail(email.to_string()));
        }
        Ok(())
    }

    fn find_by_username_or_email(state: &AuthState, identifier: &str) -> Option<User> {
        let key = identifier.to_lowercase();
        let user_id = state
            .username_index
            .get(&key)
            .or_else(|| state.email_index.get(&key))?;
        state.users.get(user_id).cloned()
    }

    /// Prune stale attempts and report whether the key is locked out.
    fn is_rate_limited(&self, state: &mut AuthState, key: &str) -> bool {
        let Some(attempts) = state.login_attempts.get_mut(key) else {
            return false;
        };
        let cutoff = Utc::now() - self.config.lockout_window;
        attempts.retain(|t| *t > cutoff);
        attempts.len() >= self.config.max_login_attempts as usize
    }

    async fn record_failed_attempt(&self, key: &str) {
        let mut state = self.state.write().await;
        state
            .login_attempts
            .entry(key.to_string())
            .or_default()
            .push(Utc::now());
    }

    fn deactivate_user_sessions(state: &mut AuthState, user_id: Uuid) -> Vec<Uuid> {
        let Some(session_ids) = state.user_sessions.get(&user_id) else {
            return Vec::new();
        };
        let ids: Vec<Uuid> = session_ids.iter().copied().collect();
        let mut invalidated = Vec::new();
        for id in ids {
            if let Some(session) = state.sessions.get_mut(&id)
                && session.active
            {
                session.active = false;
                invalidated.push(id);
            }
        }
        invalidated
    }

    async fn hash_blocking(password: String, scheme: PasswordScheme) -> AuthResult<String> {
        tokio::task::spawn_blocking(move || password::hash_password(&password, scheme))
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?
    }

    async fn verify_blocking(password: String, stored_hash: String) -> AuthResult<bool> {
        tokio::task::spawn_blocking(move || password::verify_password(&password, &stored_hash))
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))
    }
}
