//! Email one-time-code second factor.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use warden_core::token;

use super::{EmailSender, MfaChallenge, MfaProvider, SetupMaterial, SetupParams, mask_email_address};
use crate::error::{AuthError, AuthResult};

const CODE_LENGTH: usize = 8;
const CODE_TTL_MINUTES: i64 = 15;

struct PendingCode {
    user_id: Uuid,
    code: String,
    expires_at: DateTime<Utc>,
}

/// Email provider: 8-character alphanumeric codes with a 15-minute expiry.
pub struct EmailProvider {
    sender: Arc<dyn EmailSender>,
    addresses: RwLock<HashMap<Uuid, String>>,
    pending: RwLock<HashMap<Uuid, PendingCode>>,
}

impl EmailProvider {
    pub fn new(sender: Arc<dyn EmailSender>) -> Self {
        Self {
            sender,
            addresses: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl MfaProvider for EmailProvider {
    fn id(&self) -> &str {
        "email"
    }

    fn display_name(&self) -> &str {
        "Email"
    }

    async fn setup(&self, user_id: Uuid, params: SetupParams) -> AuthResult<SetupMaterial> {
        let SetupParams::Email { address } = params else {
            return Err(AuthError::InvalidSetup(
                "email setup requires an address".to_string(),
            ));
        };
        if !address.contains('@') {
            return Err(AuthError::InvalidSetup(format!(
                "'{address}' is not a valid email address"
            )));
        }
        let masked = mask_email_address(&address);
        self.addresses.write().await.insert(user_id, address);
        Ok(SetupMaterial::Email { masked_address: masked })
    }

    async fn begin_challenge(&self, user_id: Uuid) -> AuthResult<MfaChallenge> {
        let address = {
            let addresses = self.addresses.read().await;
            addresses
                .get(&user_id)
                .cloned()
                .ok_or_else(|| AuthError::MfaNotConfigured(self.id().to_string()))?
        };

        let code = token::alphanumeric_code(CODE_LENGTH);
        let expires_at = Utc::now() + Duration::minutes(CODE_TTL_MINUTES);

        self.sender
            .send_email(
                &address,
                "Your verification code",
                &format!("Your verification code is: {code}\nIt expires in {CODE_TTL_MINUTES} minutes."),
            )
            .await?;

        let challenge_id = Uuid::new_v4();
        self.pending.write().await.insert(
            challenge_id,
            PendingCode {
                user_id,
                code,
                expires_at,
            },
        );

        Ok(MfaChallenge {
            challenge_id,
            provider_id: self.id().to_string(),
            user_id,
            message: format!("Enter the code sent to {}", mask_email_address(&address)),
            destination: Some(mask_email_address(&address)),
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
        // Codes are generated uppercase; accept any casing back
        Ok(pending.code == response.trim().to_uppercase())
    }

    async fn teardown(&self, user_id: Uuid) {
        self.addresses.write().await.remove(&user_id);
        self.pending
            .write()
            .await
            .retain(|_, pending| pending.user_id != user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingEmail {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl EmailSender for CapturingEmail {
        async fn send_email(&self, address: &str, subject: &str, body: &str) -> AuthResult<()> {
            self.sent.lock().unwrap().push((
                address.to_string(),
                subject.to_string(),
                body.to_string(),
            ));
            Ok(())
        }
    }

    #[tokio::test]
    async fn challenge_round_trip_case_insensitive() {
        let email = Arc::new(CapturingEmail::default());
        let provider = EmailProvider::new(Arc::clone(&email) as Arc<dyn EmailSender>);
        let user = Uuid::new_v4();

        provider
            .setup(
                user,
                SetupParams::Email {
                    address: "alice@ex.com".into(),
                },
            )
            .await
            .unwrap();

        let challenge = provider.begin_challenge(user).await.unwrap();
        assert_eq!(challenge.destination.as_deref(), Some("a***@ex.com"));

        let (_, _, body) = email.sent.lock().unwrap().last().cloned().unwrap();
        let code = body
            .lines()
            .next()
            .unwrap()
            .rsplit(' ')
            .next()
            .unwrap()
            .to_string();
        assert_eq!(code.len(), 8);

        assert!(
            provider
                .verify(user, challenge.challenge_id, &code.to_lowercase())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn invalid_address_is_rejected() {
        let provider = EmailProvider::new(Arc::new(CapturingEmail::default()));
        let err = provider
            .setup(
                Uuid::new_v4(),
                SetupParams::Email {
                    address: "not-an-address".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidSetup(_)));
    }
}
