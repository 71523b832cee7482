//! IP allow/deny rules.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};

/// Whether a matching rule admits or rejects the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Allow,
    Deny,
}

/// An IP access rule over one or more CIDR ranges. CIDRs are parsed once
/// at registration.
#[derive(Debug, Clone)]
pub struct IpAccessRule {
    pub rule_id: String,
    pub name: String,
    pub description: String,
    /// Source CIDR strings, kept for display and snapshots
    pub cidrs: Vec<String>,
    pub(crate) networks: Vec<IpNet>,
    pub rule_type: RuleType,
    /// Higher priority rules are consulted first
    pub priority: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl IpAccessRule {
    pub fn matches(&self, ip: IpAddr) -> bool {
        self.networks.iter().any(|net| net.contains(&ip))
    }
}

/// Input for registering an IP rule.
#[derive(Debug, Clone)]
pub struct IpRuleDef {
    pub rule_id: String,
    pub name: String,
    pub description: String,
    pub cidrs: Vec<String>,
    pub rule_type: RuleType,
    pub priority: i32,
}

impl IpRuleDef {
    pub fn new(
        rule_id: impl Into<String>,
        name: impl Into<String>,
        rule_type: RuleType,
        priority: i32,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            name: name.into(),
            description: String::new(),
            cidrs: Vec::new(),
            rule_type,
            priority,
        }
    }

    #[must_use]
    pub fn with_cidrs(mut self, cidrs: &[&str]) -> Self {
        self.cidrs = cidrs.iter().map(|c| (*c).to_string()).collect();
        self
    }

    pub(crate) fn build(self) -> ControlResult<IpAccessRule> {
        if self.cidrs.is_empty() {
            return Err(ControlError::EmptyRule);
        }
        let networks = self
            .cidrs
            .iter()
            .map(|cidr| {
                cidr.parse::<IpNet>().map_err(|e| ControlError::InvalidCidr {
                    cidr: cidr.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<ControlResult<Vec<_>>>()?;
        Ok(IpAccessRule {
            rule_id: self.rule_id,
            name: self.name,
            description: self.description,
            cidrs: self.cidrs,
            networks,
            rule_type: self.rule_type,
            priority: self.priority,
            active: true,
            created_at: Utc::now(),
        })
    }
}

/// Outcome of an IP or geo gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    /// Id or name of the rule that decided, when one matched
    pub matched_rule: Option<String>,
}

impl AccessDecision {
    pub(crate) fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            matched_rule: None,
        }
    }

    pub(crate) fn allow_by(rule: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: None,
            matched_rule: Some(rule.into()),
        }
    }

    pub(crate) fn deny(reason: impl Into<String>, rule: Option<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            matched_rule: rule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cidrs_parse_at_registration() {
        let rule = IpRuleDef::new("r1", "Internal", RuleType::Allow, 10)
            .with_cidrs(&["10.0.0.0/8", "192.168.0.0/16"])
            .build()
            .unwrap();
        assert!(rule.matches("10.1.2.3".parse().unwrap()));
        assert!(rule.matches("192.168.1.1".parse().unwrap()));
        assert!(!rule.matches("203.0.113.9".parse().unwrap()));
    }

    #[test]
    fn bad_cidr_is_rejected() {
        let err = IpRuleDef::new("r1", "Bad", RuleType::Deny, 1)
            .with_cidrs(&["999.0.0.0/8"])
            .build()
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidCidr { .. }));

        let err = IpRuleDef::new("r2", "Empty", RuleType::Deny, 1).build().unwrap_err();
        assert!(matches!(err, ControlError::EmptyRule));
    }

    #[test]
    fn ipv6_ranges_work() {
        let rule = IpRuleDef::new("r6", "v6", RuleType::Deny, 1)
            .with_cidrs(&["2001:db8::/32"])
            .build()
            .unwrap();
        assert!(rule.matches("2001:db8::1".parse().unwrap()));
        assert!(!rule.matches("2001:db9::1".parse().unwrap()));
    }
}
