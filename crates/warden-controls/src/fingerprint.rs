//! Device fingerprints.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warden_core::Metadata;

/// Default similarity threshold for a match.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.8;

/// How much a device is trusted by higher-layer policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Trusted,
    Known,
    Unknown,
    Suspicious,
}

/// A stored device fingerprint: a bag of observed characteristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    pub fingerprint_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    /// Observed characteristics, e.g. user agent, platform, screen size
    pub data: Metadata,
    pub trust: TrustLevel,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub active: bool,
}

impl DeviceFingerprint {
    /// Similarity to candidate data: matching fields over the union of
    /// keys.
    pub fn similarity(&self, candidate: &Metadata) -> f64 {
        similarity(&self.data, candidate)
    }
}

/// `|matching fields| / |union of keys|` between two characteristic maps.
pub fn similarity(stored: &Metadata, candidate: &Metadata) -> f64 {
    let keys: HashSet<&String> = stored.keys().chain(candidate.keys()).collect();
    if keys.is_empty() {
        return 0.0;
    }
    let matching = keys
        .iter()
        .filter(|key| {
            match (stored.get(**key), candidate.get(**key)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        })
        .count();
    matching as f64 / keys.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), json!(v)))
            .collect()
    }

    #[test]
    fn identical_maps_score_one() {
        let a = map(&[("ua", "Firefox"), ("platform", "linux")]);
        assert_eq!(similarity(&a, &a), 1.0);
    }

    #[test]
    fn ratio_is_matching_over_union() {
        let stored = map(&[("ua", "Firefox"), ("platform", "linux"), ("screen", "1080")]);
        let candidate = map(&[("ua", "Firefox"), ("platform", "mac"), ("lang", "en")]);
        // Union: ua, platform, screen, lang; matching: ua
        assert_eq!(similarity(&stored, &candidate), 0.25);
    }

    #[test]
    fn empty_maps_score_zero() {
        assert_eq!(similarity(&Metadata::new(), &Metadata::new()), 0.0);
    }
}
