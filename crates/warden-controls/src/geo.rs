//! Country-level geo restrictions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ip::RuleType;

/// A geo restriction over a set of ISO country codes.
///
/// Evaluation: when any active allow restriction exists, the country must
/// match one of them; otherwise any matching deny restriction rejects.
/// Countries with no match are allowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoRestriction {
    pub restriction_id: String,
    pub name: String,
    /// Uppercase ISO 3166-1 alpha-2 codes
    pub countries: Vec<String>,
    pub restriction_type: RuleType,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl GeoRestriction {
    pub fn matches_country(&self, country_code: &str) -> bool {
        let wanted = country_code.to_uppercase();
        self.countries.iter().any(|c| *c == wanted)
    }
}

/// Input for registering a geo restriction.
#[derive(Debug, Clone)]
pub struct GeoRestrictionDef {
    pub restriction_id: String,
    pub name: String,
    pub countries: Vec<String>,
    pub restriction_type: RuleType,
}

impl GeoRestrictionDef {
    pub fn new(
        restriction_id: impl Into<String>,
        name: impl Into<String>,
        restriction_type: RuleType,
        countries: &[&str],
    ) -> Self {
        Self {
            restriction_id: restriction_id.into(),
            name: name.into(),
            countries: countries.iter().map(|c| c.to_uppercase()).collect(),
            restriction_type,
        }
    }

    pub(crate) fn build(self) -> GeoRestriction {
        GeoRestriction {
            restriction_id: self.restriction_id,
            name: self.name,
            countries: self.countries,
            restriction_type: self.restriction_type,
            active: true,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_is_case_insensitive() {
        let restriction = GeoRestrictionDef::new("g1", "EU only", RuleType::Allow, &["de", "FR"]).build();
        assert!(restriction.matches_country("DE"));
        assert!(restriction.matches_country("fr"));
        assert!(!restriction.matches_country("US"));
    }
}
