//! TOTP second factor (RFC 6238).

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

use warden_core::token;

use super::{MfaChallenge, MfaProvider, SetupMaterial, SetupParams};
use crate::error::{AuthError, AuthResult};

const SECRET_BYTES: usize = 20;
const DIGITS: usize = 6;
const STEP_SECONDS: u64 = 30;
/// Accepted clock skew, in steps, on either side.
const SKEW: u8 = 1;

/// Authenticator-app TOTP provider. Verification tolerates ±1 step.
pub struct TotpProvider {
    issuer: String,
    secrets: RwLock<HashMap<Uuid, String>>,
}

impl TotpProvider {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            secrets: RwLock::new(HashMap::new()),
        }
    }

    fn totp_for(&self, secret_b32: &str, account: &str) -> AuthResult<TOTP> {
        let secret = Secret::Encoded(secret_b32.to_string())
            .to_bytes()
            .map_err(|e| AuthError::Internal(format!("invalid TOTP secret: {e:?}")))?;
        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW,
            STEP_SECONDS,
            secret,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| AuthError::Internal(format!("TOTP construction failed: {e:?}")))
    }
}

#[async_trait]
impl MfaProvider for TotpProvider {
    fn id(&self) -> &str {
        "totp"
    }

    fn display_name(&self) -> &str {
        "Authenticator App"
    }

    async fn setup(&self, user_id: Uuid, _params: SetupParams) -> AuthResult<SetupMaterial> {
        let secret_b32 = base32::encode(
            base32::Alphabet::RFC4648 { padding: false },
            &token::random_bytes(SECRET_BYTES),
        );
        let totp = self.totp_for(&secret_b32, &user_id.to_string())?;
        let provisioning_uri = totp.get_url();

        self.secrets.write().await.insert(user_id, secret_b32.clone());
        Ok(SetupMaterial::Totp {
            secret: secret_b32,
            provisioning_uri,
        })
    }

    async fn begin_challenge(&self, user_id: Uuid) -> AuthResult<MfaChallenge> {
        if !self.secrets.read().await.contains_key(&user_id) {
            return Err(AuthError::MfaNotConfigured(self.id().to_string()));
        }
        // No pending state: the authenticator app is the challenge.
        Ok(MfaChallenge {
            challenge_id: Uuid::new_v4(),
            provider_id: self.id().to_string(),
            user_id,
            message: "Enter the code from your authenticator app".to_string(),
            destination: None,
            expires_at: None,
        })
    }

    async fn verify(&self, user_id: Uuid, _challenge_id: Uuid, response: &str) -> AuthResult<bool> {
        let secret = {
            let secrets = self.secrets.read().await;
            secrets
                .get(&user_id)
                .cloned()
                .ok_or_else(|| AuthError::MfaNotConfigured(self.id().to_string()))?
        };
        let totp = self.totp_for(&secret, &user_id.to_string())?;
        totp.check_current(response.trim())
            .map_err(|e| AuthError::Internal(format!("system clock error: {e}")))
    }

    async fn teardown(&self, user_id: Uuid) {
        self.secrets.write().await.remove(&user_id);
    }
}
