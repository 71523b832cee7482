//! The composition root.

use std::net::IpAddr;
use std::sync::Arc;

use serde_json::json;
use tracing::info;
use uuid::Uuid;

use warden_auth::mfa::{
    BackupCodesProvider, EmailProvider, EmailSender, MfaManager, SmsProvider, SmsSender,
    TotpProvider,
};
use warden_auth::{AuthConfig, AuthenticationManager};
use warden_controls::{
    RateLimitAction, SecurityControlsManager, SecurityEventRecord, Severity,
};
use warden_events::{Event, EventBus, handler};
use warden_identity::{HttpClient, IdentityManager, ReqwestHttpClient};
use warden_monitor::{ActorType, AuditEntry, AuditResult, SecurityMonitoringManager};
use warden_plugins::PluginSecurityManager;
use warden_rbac::{AuthorizationManager, EnhancedRbacManager};

/// Topic prefixes mirrored into the audit log by the monitoring wiring.
const AUDITED_PREFIXES: &[&str] = &[
    "user.*",
    "session.*",
    "role.*",
    "permission.*",
    "rbac.*",
    "mfa.*",
    "identity.*",
    "plugin_security.*",
    "security.*",
    "compliance.*",
];

/// A request about to enter the control plane, as seen by the gate.
#[derive(Debug, Clone)]
pub struct RequestScreen {
    pub resource: String,
    pub ip_address: Option<IpAddr>,
    pub country: Option<String>,
    pub user_id: Option<Uuid>,
}

impl RequestScreen {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            ip_address: None,
            country: None,
            user_id: None,
        }
    }

    #[must_use]
    pub fn from_ip(mut self, ip: IpAddr) -> Self {
        self.ip_address = Some(ip);
        self
    }

    #[must_use]
    pub fn from_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    #[must_use]
    pub fn for_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// The gate's verdict. Denials carry the failing stage and reason;
/// rate-limit denials also carry the rule's action.
#[derive(Debug, Clone)]
pub struct ScreenDecision {
    pub allowed: bool,
    /// `"ip"`, `"geo"`, or `"rate_limit"` when denied
    pub stage: Option<&'static str>,
    pub reason: Option<String>,
    pub action: Option<RateLimitAction>,
}

impl ScreenDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            stage: None,
            reason: None,
            action: None,
        }
    }

    fn deny(stage: &'static str, reason: Option<String>, action: Option<RateLimitAction>) -> Self {
        Self {
            allowed: false,
            stage: Some(stage),
            reason,
            action,
        }
    }
}

/// Builder for [`Platform`]. Collaborators (SMS/email transports, the HTTP
/// client for federation) are injected here; everything else is
/// constructed internally.
pub struct PlatformBuilder {
    auth_config: AuthConfig,
    issuer: String,
    sms: Option<Arc<dyn SmsSender>>,
    email: Option<Arc<dyn EmailSender>>,
    http: Option<Arc<dyn HttpClient>>,
}

impl Default for PlatformBuilder {
    fn default() -> Self {
        Self {
            auth_config: AuthConfig::default(),
            issuer: "Warden".to_string(),
            sms: None,
            email: None,
            http: None,
        }
    }
}

impl PlatformBuilder {
    #[must_use]
    pub fn auth_config(mut self, config: AuthConfig) -> Self {
        self.auth_config = config;
        self
    }

    /// Issuer label stamped into TOTP provisioning URIs.
    #[must_use]
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn sms_sender(mut self, sender: Arc<dyn SmsSender>) -> Self {
        self.sms = Some(sender);
        self
    }

    #[must_use]
    pub fn email_sender(mut self, sender: Arc<dyn EmailSender>) -> Self {
        self.email = Some(sender);
        self
    }

    #[must_use]
    pub fn http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    /// Construct the managers, register the MFA providers, and wire the
    /// bus subscriptions.
    pub async fn build(self) -> Platform {
        let bus = Arc::new(EventBus::new());

        let auth = Arc::new(AuthenticationManager::with_config(
            Arc::clone(&bus),
            self.auth_config,
        ));
        let mfa = Arc::new(MfaManager::new(Arc::clone(&bus), Arc::clone(&auth)));
        mfa.register_provider(Arc::new(TotpProvider::new(self.issuer.clone()))).await;
        mfa.register_provider(Arc::new(BackupCodesProvider::default())).await;
        if let Some(sms) = self.sms {
            mfa.register_provider(Arc::new(SmsProvider::new(sms))).await;
        }
        if let Some(email) = self.email {
            mfa.register_provider(Arc::new(EmailProvider::new(email))).await;
        }

        let rbac = Arc::new(AuthorizationManager::new(Arc::clone(&bus)));
        let enhanced_rbac = Arc::new(EnhancedRbacManager::new(Arc::clone(&bus), Arc::clone(&rbac)));
        let identity = Arc::new(IdentityManager::new(Arc::clone(&bus), Arc::clone(&auth)));
        let plugins = Arc::new(PluginSecurityManager::new(Arc::clone(&bus)));
        let controls = Arc::new(SecurityControlsManager::new(Arc::clone(&bus)));
        let monitor = Arc::new(SecurityMonitoringManager::new(Arc::clone(&bus)));

        let platform = Platform {
            bus,
            auth,
            mfa,
            rbac,
            enhanced_rbac,
            identity,
            plugins,
            controls,
            monitor,
            http: self.http.unwrap_or_else(|| Arc::new(ReqwestHttpClient::new())),
        };
        platform.wire().await;
        info!(target: "warden", "control plane assembled");
        platform
    }
}

/// The assembled control plane.
pub struct Platform {
    bus: Arc<EventBus>,
    auth: Arc<AuthenticationManager>,
    mfa: Arc<MfaManager>,
    rbac: Arc<AuthorizationManager>,
    enhanced_rbac: Arc<EnhancedRbacManager>,
    identity: Arc<IdentityManager>,
    plugins: Arc<PluginSecurityManager>,
    controls: Arc<SecurityControlsManager>,
    monitor: Arc<SecurityMonitoringManager>,
    http: Arc<dyn HttpClient>,
}

impl Platform {
    pub fn builder() -> PlatformBuilder {
        PlatformBuilder::default()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn auth(&self) -> &Arc<AuthenticationManager> {
        &self.auth
    }

    pub fn mfa(&self) -> &Arc<MfaManager> {
        &self.mfa
    }

    /// The base RBAC manager.
    pub fn rbac(&self) -> &Arc<AuthorizationManager> {
        &self.rbac
    }

    /// The enhanced RBAC layer (ownership, delegation, approvals, rules).
    pub fn enhanced_rbac(&self) -> &Arc<EnhancedRbacManager> {
        &self.enhanced_rbac
    }

    pub fn identity(&self) -> &Arc<IdentityManager> {
        &self.identity
    }

    pub fn plugins(&self) -> &Arc<PluginSecurityManager> {
        &self.plugins
    }

    pub fn controls(&self) -> &Arc<SecurityControlsManager> {
        &self.controls
    }

    pub fn monitor(&self) -> &Arc<SecurityMonitoringManager> {
        &self.monitor
    }

    /// The injected HTTP collaborator, for constructing federation
    /// providers.
    pub fn http_client(&self) -> &Arc<dyn HttpClient> {
        &self.http
    }

    /// Gate a request before it reaches authentication or authorization:
    /// IP rules, then geo restrictions, then rate limits. Denials are
    /// recorded in the security event log.
    pub async fn screen_request(&self, screen: RequestScreen) -> ScreenDecision {
        if let Some(ip) = screen.ip_address {
            let decision = self.controls.check_ip_access(ip).await;
            if !decision.allowed {
                self.controls
                    .record_security_event(
                        SecurityEventRecord::new(
                            "ip_blocked",
                            Severity::Medium,
                            "gate",
                            decision.reason.clone().unwrap_or_default(),
                        )
                        .from_ip(ip.to_string())
                        .on_resource(screen.resource.clone()),
                    )
                    .await;
                return ScreenDecision::deny("ip", decision.reason, None);
            }
        }

        if let Some(country) = &screen.country {
            let decision = self.controls.check_geo_access(country).await;
            if !decision.allowed {
                self.controls
                    .record_security_event(
                        SecurityEventRecord::new(
                            "geo_blocked",
                            Severity::Medium,
                            "gate",
                            decision.reason.clone().unwrap_or_default(),
                        )
                        .on_resource(screen.resource.clone()),
                    )
                    .await;
                return ScreenDecision::deny("geo", decision.reason, None);
            }
        }

        let decision = self
            .controls
            .check_rate_limit(
                &screen.resource,
                screen.user_id,
                screen.ip_address.map(|ip| ip.to_string()).as_deref(),
            )
            .await;
        if !decision.allowed {
            let mut record = SecurityEventRecord::new(
                "rate_limited",
                Severity::Medium,
                "gate",
                decision.reason.clone().unwrap_or_default(),
            )
            .on_resource(screen.resource.clone());
            if let Some(ip) = screen.ip_address {
                record = record.from_ip(ip.to_string());
            }
            if let Some(user_id) = screen.user_id {
                record = record.for_user(user_id);
            }
            self.controls.record_security_event(record).await;
            return ScreenDecision::deny("rate_limit", decision.reason, decision.action);
        }

        ScreenDecision::allow()
    }

    /// Bus wiring: the monitoring layer consumes control-plane events as
    /// audit input, and firing anomaly detections land in the security
    /// event log.
    async fn wire(&self) {
        for prefix in AUDITED_PREFIXES {
            let monitor = Arc::clone(&self.monitor);
            self.bus
                .subscribe(
                    *prefix,
                    handler(move |event: Event| {
                        let monitor = Arc::clone(&monitor);
                        async move {
                            let resource_type = event
                                .topic
                                .split('.')
                                .next()
                                .unwrap_or("unknown")
                                .to_string();
                            let mut entry = AuditEntry::new(
                                event.topic.clone(),
                                ActorType::System,
                                resource_type,
                                AuditResult::Success,
                            )
                            .describe(format!("emitted by {}", event.source));
                            entry
                                .metadata
                                .insert("event_data".to_string(), event.data.clone());
                            monitor.record_audit_log(entry).await;
                        }
                    }),
                )
                .await;
        }

        let controls = Arc::clone(&self.controls);
        self.bus
            .subscribe(
                "security.anomaly_detected",
                handler(move |event: Event| {
                    let controls = Arc::clone(&controls);
                    async move {
                        let detector = event
                            .data
                            .get("detector_id")
                            .and_then(|v| v.as_str())
                            .unwrap_or("unknown")
                            .to_string();
                        let mut record = SecurityEventRecord::new(
                            "anomaly_detected",
                            Severity::High,
                            event.source.clone(),
                            format!("anomaly detector '{detector}' fired"),
                        );
                        record
                            .metadata
                            .insert("detection".to_string(), event.data.clone());
                        record
                            .metadata
                            .insert("event_id".to_string(), json!(event.event_id));
                        controls.record_security_event(record).await;
                    }
                }),
            )
            .await;
    }
}
