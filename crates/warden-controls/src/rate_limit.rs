//! Sliding-window rate-limit rules.

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ControlError, ControlResult};

/// What a rule's counter is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
    Global,
    Ip,
    User,
    UserIp,
}

impl RateLimitScope {
    /// The counter key for a request, or `None` when the request lacks the
    /// data this scope needs (the rule is then skipped).
    pub fn key(self, user_id: Option<Uuid>, ip_address: Option<&str>) -> Option<String> {
        match self {
            Self::Global => Some("global".to_string()),
            Self::Ip => ip_address.map(|ip| format!("ip:{ip}")),
            Self::User => user_id.map(|user| format!("user:{user}")),
            Self::UserIp => match (user_id, ip_address) {
                (Some(user), Some(ip)) => Some(format!("user:{user}:ip:{ip}")),
                _ => None,
            },
        }
    }
}

/// What the caller should do when a rule trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAction {
    Block,
    Delay,
    Captcha,
    Log,
}

/// A rate-limit rule: at most `limit` admitted requests per sliding
/// `window_seconds`, per scope key, on resources matching the pattern.
#[derive(Debug, Clone)]
pub struct RateLimitRule {
    pub rule_id: String,
    pub name: String,
    pub description: String,
    /// Source pattern, kept for display and snapshots
    pub resource_pattern: String,
    pub(crate) resource_regex: Regex,
    pub limit: usize,
    pub window_seconds: i64,
    pub scope: RateLimitScope,
    pub action: RateLimitAction,
    pub active: bool,
}

impl RateLimitRule {
    pub fn matches_resource(&self, resource: &str) -> bool {
        self.resource_regex.is_match(resource)
    }
}

/// Input for registering a rate-limit rule.
#[derive(Debug, Clone)]
pub struct RateLimitRuleDef {
    pub rule_id: String,
    pub name: String,
    pub description: String,
    pub resource_pattern: String,
    pub limit: usize,
    pub window_seconds: i64,
    pub scope: RateLimitScope,
    pub action: RateLimitAction,
}

impl RateLimitRuleDef {
    pub fn new(
        rule_id: impl Into<String>,
        name: impl Into<String>,
        resource_pattern: impl Into<String>,
        limit: usize,
        window_seconds: i64,
        scope: RateLimitScope,
        action: RateLimitAction,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            name: name.into(),
            description: String::new(),
            resource_pattern: resource_pattern.into(),
            limit,
            window_seconds,
            scope,
            action,
        }
    }

    pub(crate) fn build(self) -> ControlResult<RateLimitRule> {
        let resource_regex =
            Regex::new(&self.resource_pattern).map_err(|e| ControlError::InvalidPattern {
                pattern: self.resource_pattern.clone(),
                reason: e.to_string(),
            })?;
        Ok(RateLimitRule {
            rule_id: self.rule_id,
            name: self.name,
            description: self.description,
            resource_pattern: self.resource_pattern,
            resource_regex,
            limit: self.limit,
            window_seconds: self.window_seconds,
            scope: self.scope,
            action: self.action,
            active: true,
        })
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub action: Option<RateLimitAction>,
    pub reason: Option<String>,
    pub rule_id: Option<String>,
}

impl RateLimitDecision {
    pub(crate) fn allow() -> Self {
        Self {
            allowed: true,
            action: None,
            reason: None,
            rule_id: None,
        }
    }
}
