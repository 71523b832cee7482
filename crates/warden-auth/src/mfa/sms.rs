//! SMS one-time-code second factor.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use warden_core::token;

use super::{MfaChallenge, MfaProvider, SetupMaterial, SetupParams, SmsSender, mask_phone_number};
use crate::error::{AuthError, AuthResult};

const CODE_LENGTH: usize = 6;
const CODE_TTL_MINUTES: i64 = 10;

struct PendingCode {
    user_id: Uuid,
    code: String,
    expires_at: DateTime<Utc>,
}

/// SMS provider: 6-digit numeric codes, 10-minute expiry, delivered via the
/// external SMS collaborator. Responses surfaced to callers mask all but
/// the last four digits of the destination number.
pub struct SmsProvider {
    sender: Arc<dyn SmsSender>,
    phone_numbers: RwLock<HashMap<Uuid, String>>,
    pending: RwLock<HashMap<Uuid, PendingCode>>,
}

impl SmsProvider {
    pub fn new(sender: Arc<dyn SmsSender>) -> Self {
        Self {
            sender,
            phone_numbers: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl MfaProvider for SmsProvider {
    fn id(&self) -> &str {
        "sms"
    }

    fn display_name(&self) -> &str {
        "Text Message"
    }

    async fn setup(&self, user_id: Uuid, params: SetupParams) -> AuthResult<SetupMaterial> {
        let SetupParams::Sms { phone_number } = params else {
            return Err(AuthError::InvalidSetup(
                "SMS setup requires a phone number".to_string(),
            ));
        };
        if phone_number.trim().is_empty() {
            return Err(AuthError::InvalidSetup("phone number is empty".to_string()));
        }
        let masked = mask_phone_number(&phone_number);
        self.phone_numbers.write().await.insert(user_id, phone_number);
        Ok(SetupMaterial::Sms { masked_number: masked })
    }

    async fn begin_challenge(&self, user_id: Uuid) -> AuthResult<MfaChallenge> {
        let number = {
            let numbers = self.phone_numbers.read().await;
            numbers
                .get(&user_id)
                .cloned()
                .ok_or_else(|| AuthError::MfaNotConfigured(self.id().to_string()))?
        };

        let code = token::numeric_code(CODE_LENGTH);
        let expires_at = Utc::now() + Duration::minutes(CODE_TTL_MINUTES);

        // Send before recording: a failed delivery leaves no pending state.
        self.sender
            .send_sms(&number, &format!("Your verification code is: {code}"))
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
            message: format!("Enter the code sent to {}", mask_phone_number(&number)),
            destination: Some(mask_phone_number(&number)),
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
        Ok(pending.code == response.trim())
    }

    async fn teardown(&self, user_id: Uuid) {
        self.phone_numbers.write().await.remove(&user_id);
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
    struct CapturingSms {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SmsSender for CapturingSms {
        async fn send_sms(&self, number: &str, message: &str) -> AuthResult<()> {
            self.sent
                .lock()
                .unwrap()
                .push((number.to_string(), message.to_string()));
            Ok(())
        }
    }

    fn extract_code(message: &str) -> String {
        message
            .rsplit(' ')
            .next()
            .unwrap()
            .trim()
            .to_string()
    }

    #[tokio::test]
    async fn challenge_round_trip() {
        let sms = Arc::new(CapturingSms::default());
        let provider = SmsProvider::new(Arc::clone(&sms) as Arc<dyn SmsSender>);
        let user = Uuid::new_v4();

        provider
            .setup(
                user,
                SetupParams::Sms {
                    phone_number: "+15551234567".into(),
                },
            )
            .await
            .unwrap();

        let challenge = provider.begin_challenge(user).await.unwrap();
        assert_eq!(challenge.destination.as_deref(), Some("********4567"));

        let (number, message) = sms.sent.lock().unwrap().last().cloned().unwrap();
        assert_eq!(number, "+15551234567");
        let code = extract_code(&message);
        assert_eq!(code.len(), 6);

        assert!(provider.verify(user, challenge.challenge_id, &code).await.unwrap());
        // One-shot: the challenge is gone even after success
        let err = provider
            .verify(user, challenge.challenge_id, &code)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnknownChallenge));
    }

    #[tokio::test]
    async fn wrong_code_consumes_the_challenge() {
        let provider = SmsProvider::new(Arc::new(CapturingSms::default()));
        let user = Uuid::new_v4();
        provider
            .setup(
                user,
                SetupParams::Sms {
                    phone_number: "+15550000000".into(),
                },
            )
            .await
            .unwrap();
        let challenge = provider.begin_challenge(user).await.unwrap();

        assert!(!provider.verify(user, challenge.challenge_id, "999999").await.unwrap());
        let err = provider
            .verify(user, challenge.challenge_id, "999999")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnknownChallenge));
    }

    #[tokio::test]
    async fn setup_requires_phone_number() {
        let provider = SmsProvider::new(Arc::new(CapturingSms::default()));
        let err = provider
            .setup(Uuid::new_v4(), SetupParams::None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidSetup(_)));
    }
}
