//! # Warden - Identity, Access & Runtime-Security Control Plane
//!
//! A single in-process service answering three questions on behalf of an
//! agent platform:
//!
//! 1. *Who is this principal?* - local credentials and federated sign-in
//!    (OAuth2/OIDC, SAML 2.0, LDAP/AD) with session lifecycle
//!    ([`auth`], [`identity`])
//! 2. *What may this principal do, here, now?* - RBAC extended with
//!    ownership, delegation, approvals, and dynamic rules ([`rbac`]),
//!    plus plugin consent ([`plugins`])
//! 3. *Is this request safe to serve?* - IP/geo/device/rate-limit
//!    controls ([`controls`]) and audit/compliance/anomaly monitoring
//!    ([`monitor`])
//!
//! Everything is tied together by the [`events`] bus. [`Platform`] is the
//! composition root: explicit construction, injected collaborators, no
//! global singletons.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use warden::{Platform, RequestScreen};
//! use warden::auth::NewUser;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let platform = Platform::builder().build().await;
//!
//! let gate = platform
//!     .screen_request(RequestScreen::new("/auth/login").from_ip("10.0.0.1".parse()?))
//!     .await;
//! assert!(gate.allowed);
//!
//! let user = platform
//!     .auth()
//!     .register_user(NewUser::new("alice", "alice@ex.com", "pw12345!"))
//!     .await?;
//! platform.auth().authenticate("alice", "pw12345!", Some("10.0.0.1"), None).await?;
//! # Ok(())
//! # }
//! ```

mod platform;

pub use platform::{Platform, PlatformBuilder, RequestScreen, ScreenDecision};

// The control plane's subsystems, re-exported under short names.
pub use warden_auth as auth;
pub use warden_controls as controls;
pub use warden_core as core;
pub use warden_events as events;
pub use warden_identity as identity;
pub use warden_monitor as monitor;
pub use warden_plugins as plugins;
pub use warden_rbac as rbac;
