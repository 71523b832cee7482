//! # Warden Identity - SSO and OAuth 2.0
//!
//! Federated sign-in and token issuance for the Warden control plane.
//!
//! ## Features
//!
//! - **Authorization server** - OAuth 2.0 authorization-code and refresh
//!   grants with PKCE (RFC 7636), single-use codes, rotating refresh
//!   tokens
//! - **Federation clients** - OAuth/OIDC, SAML 2.0 (HTTP-Redirect SSO,
//!   HTTP-POST ACS), and LDAP/AD directory providers behind one trait
//! - **Identity linking** - `(provider, external_id)` links unique per
//!   external identity, email matching, and auto-provisioning with
//!   collision-safe usernames
//!
//! Outbound I/O goes through the [`http::HttpClient`] and
//! [`providers::LdapDriver`] collaborator traits; production
//! implementations live here, scripted doubles in the tests.

pub mod error;
pub mod http;
pub mod manager;
pub mod oauth;
pub mod providers;

#[doc(inline)]
pub use error::{IdentityError, IdentityResult};
#[doc(inline)]
pub use http::{HttpClient, HttpResponse, ReqwestHttpClient};
#[doc(inline)]
pub use manager::{IdentityLink, IdentityManager};
#[doc(inline)]
pub use oauth::{
    AuthorizationCode, ClientType, CodeChallengeMethod, OAuthClient, OAuthClientDef, OAuthServer,
    OAuthToken, PkceChallenge, TokenResponse,
};
#[doc(inline)]
pub use providers::{
    DirectoryProvider, DirectoryProviderConfig, ExternalIdentity, IdentityProvider,
    LoginInitiation, LoginResponse, OAuthClientProvider, OAuthProviderConfig, ProviderKind,
    ProviderOptions, SamlProvider, SamlProviderConfig,
};
