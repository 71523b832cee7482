//! Security Controls Manager
//!
//! IP rules, geo restrictions, device fingerprints, sliding-window rate
//! limits, and the security event log, gatekeeping requests before they
//! reach authentication or authorization.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};
use uuid::Uuid;

use warden_core::Metadata;
use warden_events::{Event, EventBus, EventPriority};

use crate::error::{ControlError, ControlResult};
use crate::events::{SecurityEvent, SecurityEventFilter, SecurityEventRecord, Severity};
use crate::fingerprint::{DEFAULT_MATCH_THRESHOLD, DeviceFingerprint, TrustLevel};
use crate::geo::{GeoRestriction, GeoRestrictionDef};
use crate::ip::{AccessDecision, IpAccessRule, IpRuleDef, RuleType};
use crate::rate_limit::{
    RateLimitAction, RateLimitDecision, RateLimitRule, RateLimitRuleDef, RateLimitScope,
};

const SOURCE: &str = "security_controls";

#[derive(Default)]
struct ControlsState {
    /// Kept sorted by descending priority
    ip_rules: Vec<IpAccessRule>,
    geo_restrictions: HashMap<String, GeoRestriction>,
    fingerprints: HashMap<Uuid, DeviceFingerprint>,
    user_devices: HashMap<Uuid, Vec<Uuid>>,
    rate_rules: HashMap<String, RateLimitRule>,
    /// (rule_id, scope_key) -> admitted-request timestamps in the window
    rate_counters: HashMap<(String, String), Vec<DateTime<Utc>>>,
    events: Vec<SecurityEvent>,
}

/// Manager for the advanced security controls.
pub struct SecurityControlsManager {
    state: RwLock<ControlsState>,
    bus: Arc<EventBus>,
}

impl SecurityControlsManager {
    /// Create a manager with the default IP and rate-limit rules seeded.
    pub fn new(bus: Arc<EventBus>) -> Self {
        let mut state = ControlsState::default();
        Self::seed_defaults(&mut state);
        Self {
            state: RwLock::new(state),
            bus,
        }
    }

    // ----- IP access ----------------------------------------------------

    /// Register an IP rule; its CIDRs are parsed here, once.
    pub async fn register_ip_rule(&self, def: IpRuleDef) -> ControlResult<IpAccessRule> {
        let rule = def.build()?;
        {
            let mut state = self.state.write().await;
            if state.ip_rules.iter().any(|r| r.rule_id == rule.rule_id) {
                return Err(ControlError::DuplicateRule(rule.rule_id));
            }
            state.ip_rules.push(rule.clone());
            state.ip_rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        }

        self.bus
            .emit_new(
                "security.ip_rule_registered",
                SOURCE,
                json!({"rule_id": rule.rule_id, "type": rule.rule_type, "cidrs": rule.cidrs}),
            )
            .await;
        Ok(rule)
    }

    pub async fn get_ip_rule(&self, rule_id: &str) -> Option<IpAccessRule> {
        let state = self.state.read().await;
        state.ip_rules.iter().find(|r| r.rule_id == rule_id).cloned()
    }

    /// Gate a source address: rules by descending priority, first match
    /// wins, no match allows.
    pub async fn check_ip_access(&self, ip: IpAddr) -> AccessDecision {
        let state = self.state.read().await;
        for rule in state.ip_rules.iter().filter(|r| r.active) {
            if rule.matches(ip) {
                return match rule.rule_type {
                    RuleType::Allow => AccessDecision::allow_by(rule.rule_id.clone()),
                    RuleType::Deny => {
                        debug!(target: "warden::controls", %ip, rule = %rule.rule_id, "IP denied");
                        AccessDecision::deny(
                            format!("IP address blocked by rule '{}'", rule.name),
                            Some(rule.rule_id.clone()),
                        )
                    }
                };
            }
        }
        AccessDecision::allow()
    }

    // ----- geo restrictions ---------------------------------------------

    pub async fn register_geo_restriction(
        &self,
        def: GeoRestrictionDef,
    ) -> ControlResult<GeoRestriction> {
        let restriction = def.build();
        {
            let mut state = self.state.write().await;
            if state.geo_restrictions.contains_key(&restriction.restriction_id) {
                return Err(ControlError::DuplicateRule(restriction.restriction_id));
            }
            state
                .geo_restrictions
                .insert(restriction.restriction_id.clone(), restriction.clone());
        }

        self.bus
            .emit_new(
                "security.geo_restriction_registered",
                SOURCE,
                json!({
                    "restriction_id": restriction.restriction_id,
                    "type": restriction.restriction_type,
                    "countries": restriction.countries,
                }),
            )
            .await;
        Ok(restriction)
    }

    /// Gate a request country. Allow-lists dominate: when any active allow
    /// restriction exists the country must match one; otherwise any deny
    /// match rejects; no match allows.
    pub async fn check_geo_access(&self, country_code: &str) -> AccessDecision {
        let state = self.state.read().await;
        let active: Vec<&GeoRestriction> = state
            .geo_restrictions
            .values()
            .filter(|r| r.active)
            .collect();

        let allows: Vec<&&GeoRestriction> = active
            .iter()
            .filter(|r| r.restriction_type == RuleType::Allow)
            .collect();
        if !allows.is_empty() {
            return match allows.iter().find(|r| r.matches_country(country_code)) {
                Some(matched) => AccessDecision::allow_by(matched.restriction_id.clone()),
                None => AccessDecision::deny(
                    format!("Country '{country_code}' is not in any allow list"),
                    None,
                ),
            };
        }

        for restriction in active
            .iter()
            .filter(|r| r.restriction_type == RuleType::Deny)
        {
            if restriction.matches_country(country_code) {
                return AccessDecision::deny(
                    format!("Country '{country_code}' is blocked by '{}'", restriction.name),
                    Some(restriction.restriction_id.clone()),
                );
            }
        }
        AccessDecision::allow()
    }

    // ----- device fingerprints ------------------------------------------

    /// Store a fingerprint for a user's device. New devices start at
    /// [`TrustLevel::Unknown`].
    pub async fn register_device_fingerprint(
        &self,
        user_id: Uuid,
        name: impl Into<String>,
        data: Metadata,
    ) -> DeviceFingerprint {
        let now = Utc::now();
        let fingerprint = DeviceFingerprint {
            fingerprint_id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            data,
            trust: TrustLevel::Unknown,
            created_at: now,
            last_seen_at: now,
            active: true,
        };
        {
            let mut state = self.state.write().await;
            state
                .fingerprints
                .insert(fingerprint.fingerprint_id, fingerprint.clone());
            state
                .user_devices
                .entry(user_id)
                .or_default()
                .push(fingerprint.fingerprint_id);
        }

        self.bus
            .emit_new(
                "security.device_registered",
                SOURCE,
                json!({
                    "fingerprint_id": fingerprint.fingerprint_id,
                    "user_id": user_id,
                    "name": fingerprint.name,
                }),
            )
            .await;
        fingerprint
    }

    /// Find the user's best-matching device at or above the threshold
    /// (default 0.8), refreshing its `last_seen_at`. `None` invites the
    /// caller to offer registration.
    pub async fn match_device_fingerprint(
        &self,
        user_id: Uuid,
        data: &Metadata,
        threshold: Option<f64>,
    ) -> Option<DeviceFingerprint> {
        let threshold = threshold.unwrap_or(DEFAULT_MATCH_THRESHOLD);
        let mut state = self.state.write().await;

        let best = state
            .user_devices
            .get(&user_id)?
            .iter()
            .filter_map(|id| state.fingerprints.get(id))
            .filter(|fp| fp.active)
            .map(|fp| (fp.fingerprint_id, fp.similarity(data)))
            .filter(|(_, score)| *score >= threshold)
            .max_by(|(_, a), (_, b)| a.total_cmp(b))?;

        let fingerprint = state.fingerprints.get_mut(&best.0)?;
        fingerprint.last_seen_at = Utc::now();
        Some(fingerprint.clone())
    }

    pub async fn get_user_devices(&self, user_id: Uuid) -> Vec<DeviceFingerprint> {
        let state = self.state.read().await;
        state
            .user_devices
            .get(&user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.fingerprints.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Change the trust label on a device.
    pub async fn update_device_trust(
        &self,
        fingerprint_id: Uuid,
        trust: TrustLevel,
    ) -> ControlResult<DeviceFingerprint> {
        let fingerprint = {
            let mut state = self.state.write().await;
            let fingerprint = state
                .fingerprints
                .get_mut(&fingerprint_id)
                .ok_or(ControlError::UnknownFingerprint)?;
            fingerprint.trust = trust;
            fingerprint.clone()
        };

        self.bus
            .emit_new(
                "security.device_trust_updated",
                SOURCE,
                json!({
                    "fingerprint_id": fingerprint_id,
                    "user_id": fingerprint.user_id,
                    "trust": fingerprint.trust,
                }),
            )
            .await;
        Ok(fingerprint)
    }

    // ----- rate limits --------------------------------------------------

    pub async fn register_rate_limit_rule(
        &self,
        def: RateLimitRuleDef,
    ) -> ControlResult<RateLimitRule> {
        let rule = def.build()?;
        {
            let mut state = self.state.write().await;
            if state.rate_rules.contains_key(&rule.rule_id) {
                return Err(ControlError::DuplicateRule(rule.rule_id));
            }
            state.rate_rules.insert(rule.rule_id.clone(), rule.clone());
        }

        self.bus
            .emit_new(
                "security.rate_limit_rule_registered",
                SOURCE,
                json!({
                    "rule_id": rule.rule_id,
                    "pattern": rule.resource_pattern,
                    "limit": rule.limit,
                    "window_seconds": rule.window_seconds,
                }),
            )
            .await;
        Ok(rule)
    }

    pub async fn get_rate_limit_rule(&self, rule_id: &str) -> Option<RateLimitRule> {
        self.state.read().await.rate_rules.get(rule_id).cloned()
    }

    /// Check every applicable rule for a resource. Timestamps are recorded
    /// on admission only: a denied request leaves no counter trace. Rules
    /// whose scope lacks the needed data are skipped.
    pub async fn check_rate_limit(
        &self,
        resource: &str,
        user_id: Option<Uuid>,
        ip_address: Option<&str>,
    ) -> RateLimitDecision {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let applicable: Vec<(String, String, usize, i64, RateLimitAction, String)> = state
            .rate_rules
            .values()
            .filter(|rule| rule.active && rule.matches_resource(resource))
            .filter_map(|rule| {
                rule.scope.key(user_id, ip_address).map(|key| {
                    (
                        rule.rule_id.clone(),
                        key,
                        rule.limit,
                        rule.window_seconds,
                        rule.action,
                        rule.name.clone(),
                    )
                })
            })
            .collect();

        for (rule_id, key, limit, window_seconds, action, name) in &applicable {
            let counter_key = (rule_id.clone(), key.clone());
            let cutoff = now - Duration::seconds(*window_seconds);
            let count = match state.rate_counters.get_mut(&counter_key) {
                Some(timestamps) => {
                    timestamps.retain(|t| *t > cutoff);
                    timestamps.len()
                }
                None => 0,
            };
            if count >= *limit {
                warn!(
                    target: "warden::controls",
                    rule = %rule_id,
                    key = %key,
                    "rate limit exceeded"
                );
                return RateLimitDecision {
                    allowed: false,
                    action: Some(*action),
                    reason: Some(format!("Rate limit exceeded for '{name}'")),
                    rule_id: Some(rule_id.clone()),
                };
            }
        }

        // Admission: record the timestamp on every applicable counter.
        for (rule_id, key, ..) in applicable {
            state.rate_counters.entry((rule_id, key)).or_default().push(now);
        }
        RateLimitDecision::allow()
    }

    // ----- security event log -------------------------------------------

    /// Append to the security event log and fan the event out on the bus
    /// with a priority derived from its severity.
    pub async fn record_security_event(&self, record: SecurityEventRecord) -> SecurityEvent {
        let event = SecurityEvent {
            event_id: Uuid::new_v4(),
            event_type: record.event_type,
            severity: record.severity,
            source: record.source,
            user_id: record.user_id,
            ip_address: record.ip_address,
            resource: record.resource,
            description: record.description,
            timestamp: Utc::now(),
            metadata: record.metadata,
        };
        if event.severity >= Severity::High {
            error!(
                target: "warden::controls",
                event_type = %event.event_type,
                severity = ?event.severity,
                "security event: {}",
                event.description
            );
        }
        self.state.write().await.events.push(event.clone());

        let priority = match event.severity {
            Severity::Critical => EventPriority::Critical,
            Severity::High => EventPriority::High,
            Severity::Medium | Severity::Low => EventPriority::Normal,
            Severity::Info => EventPriority::Low,
        };
        self.bus
            .emit(
                Event::new(
                    "security.event_recorded",
                    SOURCE,
                    json!({
                        "event_id": event.event_id,
                        "event_type": event.event_type,
                        "severity": event.severity,
                        "description": event.description,
                    }),
                )
                .with_priority(priority),
            )
            .await;
        event
    }

    /// Query the log, newest first.
    pub async fn get_security_events(&self, filter: &SecurityEventFilter) -> Vec<SecurityEvent> {
        let state = self.state.read().await;
        let mut events: Vec<SecurityEvent> = state
            .events
            .iter()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            events.truncate(limit);
        }
        events
    }

    /// Default rules: block two known-bad example ranges, allow RFC1918,
    /// throttle login attempts and general API traffic.
    fn seed_defaults(state: &mut ControlsState) {
        let defaults = [
            IpRuleDef::new("default-block-malicious", "Block Malicious IPs", RuleType::Deny, 100)
                .with_cidrs(&["198.51.100.0/24", "203.0.113.0/24"]),
            IpRuleDef::new("default-allow-internal", "Allow Internal Network", RuleType::Allow, 10)
                .with_cidrs(&["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"]),
        ];
        for def in defaults {
            match def.build() {
                Ok(rule) => state.ip_rules.push(rule),
                Err(e) => error!(target: "warden::controls", error = %e, "default IP rule failed to build"),
            }
        }
        state.ip_rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        let rate_defaults = [
            RateLimitRuleDef::new(
                "default-login-attempts",
                "Login Attempts",
                "^/auth/login$",
                5,
                300,
                RateLimitScope::UserIp,
                RateLimitAction::Block,
            ),
            RateLimitRuleDef::new(
                "default-api-requests",
                "API Requests",
                "^/api/",
                100,
                60,
                RateLimitScope::Ip,
                RateLimitAction::Delay,
            ),
        ];
        for def in rate_defaults {
            match def.build() {
                Ok(rule) => {
                    state.rate_rules.insert(rule.rule_id.clone(), rule);
                }
                Err(e) => error!(target: "warden::controls", error = %e, "default rate rule failed to build"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SecurityControlsManager {
        SecurityControlsManager::new(Arc::new(EventBus::new()))
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn default_ip_rules_are_seeded() {
        let controls = manager();
        assert!(!controls.check_ip_access(ip("198.51.100.7")).await.allowed);
        assert!(!controls.check_ip_access(ip("203.0.113.250")).await.allowed);
        assert!(controls.check_ip_access(ip("192.168.1.10")).await.allowed);
        // Default allow for unmatched addresses
        assert!(controls.check_ip_access(ip("8.8.8.8")).await.allowed);
    }

    #[tokio::test]
    async fn higher_priority_rule_wins() {
        let controls = manager();
        // Deny a slice of the internal network at higher priority
        controls
            .register_ip_rule(
                IpRuleDef::new("quarantine", "Quarantined Subnet", RuleType::Deny, 50)
                    .with_cidrs(&["192.168.66.0/24"]),
            )
            .await
            .unwrap();

        assert!(!controls.check_ip_access(ip("192.168.66.5")).await.allowed);
        assert!(controls.check_ip_access(ip("192.168.1.5")).await.allowed);

        let err = controls
            .register_ip_rule(IpRuleDef::new("quarantine", "Dup", RuleType::Deny, 1).with_cidrs(&["10.0.0.0/8"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::DuplicateRule(_)));
    }

    #[tokio::test]
    async fn geo_allow_list_dominates() {
        let controls = manager();
        // With no restrictions, anything goes
        assert!(controls.check_geo_access("US").await.allowed);

        controls
            .register_geo_restriction(GeoRestrictionDef::new("deny-xx", "Embargo", RuleType::Deny, &["XX"]))
            .await
            .unwrap();
        assert!(!controls.check_geo_access("xx").await.allowed);
        assert!(controls.check_geo_access("US").await.allowed);

        // Adding an allow list flips the default: only listed countries pass
        controls
            .register_geo_restriction(GeoRestrictionDef::new("allow-eu", "EU", RuleType::Allow, &["DE", "FR"]))
            .await
            .unwrap();
        assert!(controls.check_geo_access("de").await.allowed);
        assert!(!controls.check_geo_access("US").await.allowed);
    }

    #[tokio::test]
    async fn fingerprint_matching_updates_last_seen() {
        let controls = manager();
        let user = Uuid::new_v4();
        let data: Metadata = [
            ("ua".to_string(), json!("Firefox")),
            ("platform".to_string(), json!("linux")),
            ("screen".to_string(), json!("1920x1080")),
            ("lang".to_string(), json!("en-US")),
        ]
        .into();

        let registered = controls
            .register_device_fingerprint(user, "laptop", data.clone())
            .await;

        // Identical data matches
        let matched = controls
            .match_device_fingerprint(user, &data, None)
            .await
            .unwrap();
        assert_eq!(matched.fingerprint_id, registered.fingerprint_id);
        assert!(matched.last_seen_at >= registered.last_seen_at);

        // One changed field of four: similarity 0.75 < 0.8
        let mut drifted = data.clone();
        drifted.insert("lang".to_string(), json!("de-DE"));
        assert!(controls.match_device_fingerprint(user, &drifted, None).await.is_none());
        // A caller-supplied lower threshold accepts the drift
        assert!(
            controls
                .match_device_fingerprint(user, &drifted, Some(0.7))
                .await
                .is_some()
        );

        // Another user has no devices
        assert!(
            controls
                .match_device_fingerprint(Uuid::new_v4(), &data, None)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn device_trust_can_be_updated() {
        let controls = manager();
        let user = Uuid::new_v4();
        let fingerprint = controls
            .register_device_fingerprint(user, "phone", Metadata::new())
            .await;
        assert_eq!(fingerprint.trust, TrustLevel::Unknown);

        let updated = controls
            .update_device_trust(fingerprint.fingerprint_id, TrustLevel::Trusted)
            .await
            .unwrap();
        assert_eq!(updated.trust, TrustLevel::Trusted);

        let err = controls
            .update_device_trust(Uuid::new_v4(), TrustLevel::Suspicious)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::UnknownFingerprint));
    }

    #[tokio::test]
    async fn login_rate_limit_blocks_sixth_attempt() {
        let controls = manager();
        let user = Uuid::new_v4();

        for _ in 0..5 {
            let decision = controls
                .check_rate_limit("/auth/login", Some(user), Some("10.0.0.1"))
                .await;
            assert!(decision.allowed);
        }
        let decision = controls
            .check_rate_limit("/auth/login", Some(user), Some("10.0.0.1"))
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.action, Some(RateLimitAction::Block));
        assert_eq!(decision.rule_id.as_deref(), Some("default-login-attempts"));

        // A different IP is a different scope key
        let decision = controls
            .check_rate_limit("/auth/login", Some(user), Some("10.0.0.2"))
            .await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn scope_without_data_skips_the_rule() {
        let controls = manager();
        // The login rule is scoped user_ip; without a user it cannot apply
        for _ in 0..20 {
            let decision = controls
                .check_rate_limit("/auth/login", None, Some("10.0.0.1"))
                .await;
            assert!(decision.allowed);
        }
    }

    #[tokio::test]
    async fn blocked_requests_leave_no_counter_trace() {
        let controls = manager();
        controls
            .register_rate_limit_rule(RateLimitRuleDef::new(
                "tiny",
                "Tiny",
                "^/tiny$",
                1,
                3600,
                RateLimitScope::Global,
                RateLimitAction::Block,
            ))
            .await
            .unwrap();

        assert!(controls.check_rate_limit("/tiny", None, None).await.allowed);
        // Hammering the blocked resource does not extend the window
        for _ in 0..10 {
            assert!(!controls.check_rate_limit("/tiny", None, None).await.allowed);
        }
        let state = controls.state.read().await;
        let counter = state
            .rate_counters
            .get(&("tiny".to_string(), "global".to_string()))
            .unwrap();
        assert_eq!(counter.len(), 1);
    }

    #[tokio::test]
    async fn event_log_query_is_newest_first_with_filters() {
        let controls = manager();
        let user = Uuid::new_v4();
        controls
            .record_security_event(SecurityEventRecord::new(
                "ip_blocked",
                Severity::Medium,
                "gateway",
                "blocked 198.51.100.7",
            ))
            .await;
        controls
            .record_security_event(
                SecurityEventRecord::new(
                    "login_failed",
                    Severity::High,
                    "auth",
                    "bad password",
                )
                .for_user(user)
                .from_ip("10.0.0.1"),
            )
            .await;
        controls
            .record_security_event(
                SecurityEventRecord::new("login_failed", Severity::High, "auth", "bad password")
                    .for_user(user),
            )
            .await;

        let all = controls.get_security_events(&SecurityEventFilter::default()).await;
        assert_eq!(all.len(), 3);
        assert!(all[0].timestamp >= all[1].timestamp);

        let failed = controls
            .get_security_events(&SecurityEventFilter {
                event_type: Some("login_failed".to_string()),
                user_id: Some(user),
                ..Default::default()
            })
            .await;
        assert_eq!(failed.len(), 2);

        let limited = controls
            .get_security_events(&SecurityEventFilter {
                limit: Some(1),
                ..Default::default()
            })
            .await;
        assert_eq!(limited.len(), 1);
    }
}
