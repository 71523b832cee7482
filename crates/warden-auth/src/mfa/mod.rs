//! Multi-Factor Authentication
//!
//! Pluggable second factors behind a uniform provider capability set:
//! setup, challenge generation, and response verification. Per-provider
//! secrets (TOTP seeds, phone numbers, backup codes) live inside the
//! provider and never leave the process.

mod backup;
mod email;
mod manager;
mod sms;
mod totp;

pub use backup::BackupCodesProvider;
pub use email::EmailProvider;
pub use manager::{EnabledMethod, MfaManager};
pub use sms::SmsProvider;
pub use totp::TotpProvider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AuthResult;

/// Outbound SMS transport (external collaborator).
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send_sms(&self, number: &str, message: &str) -> AuthResult<()>;
}

/// Outbound email transport (external collaborator).
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, address: &str, subject: &str, body: &str) -> AuthResult<()>;
}

/// Provider-specific setup input.
#[derive(Debug, Clone, Default)]
pub enum SetupParams {
    /// No parameters (TOTP, backup codes)
    #[default]
    None,
    /// Phone number for SMS delivery
    Sms { phone_number: String },
    /// Address for email delivery
    Email { address: String },
}

/// Material returned by a successful setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SetupMaterial {
    Totp {
        /// Base32-encoded shared secret
        secret: String,
        /// `otpauth://` URI for QR provisioning
        provisioning_uri: String,
    },
    Sms {
        /// Destination with all but the last four digits masked
        masked_number: String,
    },
    Email {
        /// Destination with the local part masked
        masked_address: String,
    },
    BackupCodes {
        /// The full fresh code set; shown to the user exactly once
        codes: Vec<String>,
    },
}

/// A pending verification challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaChallenge {
    pub challenge_id: Uuid,
    pub provider_id: String,
    pub user_id: Uuid,
    /// Human-readable instruction for the client
    pub message: String,
    /// Masked delivery destination, when one exists
    pub destination: Option<String>,
    /// `None` for factors with no pending state (TOTP)
    pub expires_at: Option<DateTime<Utc>>,
}

/// Uniform capability set implemented by every second factor.
#[async_trait]
pub trait MfaProvider: Send + Sync {
    /// Stable provider id, e.g. `"totp"`.
    fn id(&self) -> &str;

    /// Human-readable name for consent/settings screens.
    fn display_name(&self) -> &str;

    /// Provision the factor for a user, returning setup material.
    async fn setup(&self, user_id: Uuid, params: SetupParams) -> AuthResult<SetupMaterial>;

    /// Start a verification challenge for a user.
    async fn begin_challenge(&self, user_id: Uuid) -> AuthResult<MfaChallenge>;

    /// Verify a challenge response. One-shot: any pending state for the
    /// challenge is consumed by this call regardless of the outcome.
    async fn verify(&self, user_id: Uuid, challenge_id: Uuid, response: &str) -> AuthResult<bool>;

    /// Drop per-user secrets when the method is disabled.
    async fn teardown(&self, user_id: Uuid);
}

/// Mask a phone number, keeping only the last four digits.
pub(crate) fn mask_phone_number(number: &str) -> String {
    if number.len() <= 4 {
        return "*".repeat(number.len());
    }
    let visible = &number[number.len() - 4..];
    format!("{}{}", "*".repeat(number.len() - 4), visible)
}

/// Mask an email address, keeping the first character of the local part.
pub(crate) fn mask_email_address(address: &str) -> String {
    match address.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{first}***@{domain}")
        }
        _ => "***".to_string(),
    }
}
