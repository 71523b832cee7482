//! Single-use backup codes.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use warden_core::token;

use super::{MfaChallenge, MfaProvider, SetupMaterial, SetupParams};
use crate::error::{AuthError, AuthResult};

const DEFAULT_CODE_COUNT: usize = 10;
const DEFAULT_CODE_LENGTH: usize = 8;
const CHALLENGE_TTL_MINUTES: i64 = 15;

struct PendingChallenge {
    user_id: Uuid,
    expires_at: DateTime<Utc>,
}

/// Backup-code provider: a fixed set of single-use codes generated at
/// setup. Regeneration replaces the entire set.
pub struct BackupCodesProvider {
    code_count: usize,
    code_length: usize,
    /// user -> code -> used
    codes: RwLock<HashMap<Uuid, HashMap<String, bool>>>,
    pending: RwLock<HashMap<Uuid, PendingChallenge>>,
}

impl Default for BackupCodesProvider {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_COUNT, DEFAULT_CODE_LENGTH)
    }
}

impl BackupCodesProvider {
    pub fn new(code_count: usize, code_length: usize) -> Self {
        Self {
            code_count,
            code_length,
            codes: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
        }
    }

    fn generate_set(&self) -> Vec<String> {
        (0..self.code_count)
            .map(|_| token::hex_code(self.code_length))
            .collect()
    }

    /// Codes not yet consumed.
    pub async fn remaining_codes(&self, user_id: Uuid) -> Vec<String> {
        let codes = self.codes.read().await;
        codes
            .get(&user_id)
            .map(|set| {
                set.iter()
                    .filter(|(_, used)| !**used)
                    .map(|(code, _)| code.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replace the whole set with fresh codes.
    pub async fn regenerate_codes(&self, user_id: Uuid) -> AuthResult<Vec<String>> {
        let mut codes = self.codes.write().await;
        if !codes.contains_key(&user_id) {
            return Err(AuthError::MfaNotConfigured("backup_codes".to_string()));
        }
        let fresh = self.generate_set();
        codes.insert(user_id, fresh.iter().map(|c| (c.clone(), false)).collect());
        Ok(fresh)
    }
}

#[async_trait]
impl MfaProvider for BackupCodesProvider {
    fn id(&self) -> &str {
        "backup_codes"
    }

    fn display_name(&self) -> &str {
        "Backup Codes"
    }

    async fn setup(&self, user_id: Uuid, _params: SetupParams) -> AuthResult<SetupMaterial> {
        let fresh = self.generate_set();
        self.codes
            .write()
            .await
            .insert(user_id, fresh.iter().map(|c| (c.clone(), false)).collect());
        Ok(SetupMaterial::BackupCodes { codes: fresh })
    }

    async fn begin_challenge(&self, user_id: Uuid) -> AuthResult<MfaChallenge> {
        if !self.codes.read().await.contains_key(&user_id) {
            return Err(AuthError::MfaNotConfigured(self.id().to_string()));
        }
        let challenge_id = Uuid::new_v4();
        let expires_at = Utc::now() + Duration::minutes(CHALLENGE_TTL_MINUTES);
        self.pending.write().await.insert(
            challenge_id,
            PendingChallenge {
                user_id,
                expires_at,
            },
        );
        Ok(MfaChallenge {
            challenge_id,
            provider_id: self.id().to_string(),
            user_id,
            message: "Enter one of your backup codes".to_string(),
            destination: None,
            expires_at: Some(expires_at),
        })
    }

    async fn verify(&self, user_id: Uuid, challenge_id: Uuid, response: &str) -> AuthResult<bool> {
        let pending = self.pending.write().await.remove(&challenge_id);
        let Some(pending) = pending else {
            return Err(AuthError::UnknownChallenge);
        };
        if pending.user_id != user_id {
            return Err(AuthError::UnknownChallenge);
        }
        if Utc::now() >= pending.expires_at {
            return Err(AuthError::ChallengeExpired);
        }

        let mut codes = self.codes.write().await;
        let Some(set) = codes.get_mut(&user_id) else {
            return Err(AuthError::MfaNotConfigured(self.id().to_string()));
        };
        match set.get_mut(response.trim()) {
            Some(used) if !*used => {
                *used = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn teardown(&self, user_id: Uuid) {
        self.codes.write().await.remove(&user_id);
        self.pending
            .write()
            .await
            .retain(|_, pending| pending.user_id != user_id);
    }
}
