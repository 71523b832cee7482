//! # Warden Plugins - Plugin Security
//!
//! Gates third-party plugin behavior behind user-granted capability sets.
//!
//! ## Layers
//!
//! - **Capability catalog** - registered [`PluginPermission`]s, seeded
//!   with the built-in file/network/system/user/plugin capabilities
//! - **Consent lifecycle** - time-boxed consent requests, per-user
//!   per-plugin decisions with granted/denied sets, revocation
//! - **Runtime checks** - `check_plugin_permission` /
//!   `enforce_plugin_permission`, opaque security tokens, inter-plugin
//!   authorization

pub mod error;
pub mod manager;
pub mod types;

#[doc(inline)]
pub use error::{PluginSecurityError, PluginSecurityResult, TokenRejection};
#[doc(inline)]
pub use manager::{COMMUNICATE_PERMISSION, DATA_ACCESS_PERMISSION, PluginSecurityManager};
#[doc(inline)]
pub use types::{
    ConsentRequest, PluginConsent, PluginManifest, PluginPermission, PluginSecurityToken,
    RiskLevel, SecurityContext,
};
