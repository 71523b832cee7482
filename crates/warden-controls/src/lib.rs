//! # Warden Controls - Advanced Security Controls
//!
//! Request gatekeeping for the Warden control plane: IP allow/deny rules,
//! country restrictions, device fingerprint trust, sliding-window rate
//! limits, and an append-only security event log.
//!
//! Denials are structured [`AccessDecision`]/[`RateLimitDecision`] values
//! with a `reason` and `action`, never errors; [`ControlError`] covers
//! configuration mistakes only.

pub mod error;
pub mod events;
pub mod fingerprint;
pub mod geo;
pub mod ip;
pub mod manager;
pub mod rate_limit;

#[doc(inline)]
pub use error::{ControlError, ControlResult};
#[doc(inline)]
pub use events::{SecurityEvent, SecurityEventFilter, SecurityEventRecord, Severity};
#[doc(inline)]
pub use fingerprint::{DEFAULT_MATCH_THRESHOLD, DeviceFingerprint, TrustLevel, similarity};
#[doc(inline)]
pub use geo::{GeoRestriction, GeoRestrictionDef};
#[doc(inline)]
pub use ip::{AccessDecision, IpAccessRule, IpRuleDef, RuleType};
#[doc(inline)]
pub use manager::SecurityControlsManager;
#[doc(inline)]
pub use rate_limit::{
    RateLimitAction, RateLimitDecision, RateLimitRule, RateLimitRuleDef, RateLimitScope,
};
