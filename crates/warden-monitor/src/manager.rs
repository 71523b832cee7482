//! Security Monitoring Manager
//!
//! Audit log, compliance catalog and reporting, and anomaly detection.
//! Detections that fire are fanned out as `security.anomaly_detected`
//! events for the rest of the control plane.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use warden_core::Metadata;
use warden_events::{Event, EventBus, EventPriority};

use crate::anomaly::{AnomalyDetector, BehavioralDetector, Detection, StatisticalDetector};
use crate::audit::{AuditEntry, AuditFilter, AuditRecord};
use crate::compliance::{
    CheckOutcome, CheckResult, ComplianceCheck, ComplianceReport, ComplianceRequirement,
    ComplianceStandard, VerificationMethod,
};
use crate::error::{MonitorError, MonitorResult};

const SOURCE: &str = "security_monitoring";

/// Input to [`SecurityMonitoringManager::detect_anomalies`].
#[derive(Debug, Clone)]
pub enum DetectionInput {
    /// A single numeric observation (statistical detectors)
    Value(f64),
    /// A behavioral observation for one user (behavioral detectors)
    Behavior { user_key: String, data: Metadata },
}

/// Aggregate counts for operator dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub audit_records: usize,
    pub requirements: usize,
    pub checks: usize,
    pub detectors: usize,
    pub reports: usize,
    pub anomalies_detected: u64,
}

#[derive(Default)]
struct MonitorState {
    audit_log: Vec<AuditRecord>,
    requirements: HashMap<String, ComplianceRequirement>,
    checks: HashMap<String, ComplianceCheck>,
    /// requirement id -> check ids
    requirement_checks: HashMap<String, Vec<String>>,
    reports: HashMap<Uuid, ComplianceReport>,
    detectors: HashMap<String, AnomalyDetector>,
    anomalies_detected: u64,
}

/// Manager for audit, compliance, and anomaly detection.
pub struct SecurityMonitoringManager {
    state: RwLock<MonitorState>,
    bus: Arc<EventBus>,
}

impl SecurityMonitoringManager {
    /// Create a manager with the default requirements and detectors
    /// seeded.
    pub fn new(bus: Arc<EventBus>) -> Self {
        let mut state = MonitorState::default();
        for requirement in default_requirements() {
            state
                .requirements
                .insert(requirement.requirement_id.clone(), requirement);
        }
        for detector in default_detectors() {
            state
                .detectors
                .insert(detector.detector_id().to_string(), detector);
        }
        Self {
            state: RwLock::new(state),
            bus,
        }
    }

    // ----- audit log ----------------------------------------------------

    /// Append an audit record.
    pub async fn record_audit_log(&self, entry: AuditEntry) -> AuditRecord {
        let record = AuditRecord {
            audit_id: Uuid::new_v4(),
            action: entry.action,
            actor_id: entry.actor_id,
            actor_type: entry.actor_type,
            resource_type: entry.resource_type,
            resource_id: entry.resource_id,
            result: entry.result,
            description: entry.description,
            timestamp: Utc::now(),
            ip_address: entry.ip_address,
            user_agent: entry.user_agent,
            session_id: entry.session_id,
            metadata: entry.metadata,
        };
        info!(
            target: "audit::warden",
            audit_id = %record.audit_id,
            action = %record.action,
            actor = ?record.actor_id,
            result = ?record.result,
            "audit"
        );
        self.state.write().await.audit_log.push(record.clone());
        record
    }

    /// Query the audit log, newest first.
    pub async fn get_audit_logs(&self, filter: &AuditFilter) -> Vec<AuditRecord> {
        let state = self.state.read().await;
        let mut records: Vec<AuditRecord> = state
            .audit_log
            .iter()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            records.truncate(limit);
        }
        records
    }

    // ----- compliance ---------------------------------------------------

    pub async fn register_compliance_requirement(
        &self,
        requirement: ComplianceRequirement,
    ) -> MonitorResult<ComplianceRequirement> {
        {
            let mut state = self.state.write().await;
            if state.requirements.contains_key(&requirement.requirement_id) {
                return Err(MonitorError::DuplicateRequirement(
                    requirement.requirement_id,
                ));
            }
            state
                .requirements
                .insert(requirement.requirement_id.clone(), requirement.clone());
        }

        self.bus
            .emit_new(
                "compliance.requirement_registered",
                SOURCE,
                json!({
                    "requirement_id": requirement.requirement_id,
                    "standard": requirement.standard.to_string(),
                }),
            )
            .await;
        Ok(requirement)
    }

    pub async fn get_compliance_requirement(
        &self,
        requirement_id: &str,
    ) -> Option<ComplianceRequirement> {
        self.state
            .read()
            .await
            .requirements
            .get(requirement_id)
            .cloned()
    }

    pub async fn requirements_by_standard(
        &self,
        standard: &ComplianceStandard,
    ) -> Vec<ComplianceRequirement> {
        self.state
            .read()
            .await
            .requirements
            .values()
            .filter(|r| r.standard == *standard)
            .cloned()
            .collect()
    }

    /// Catalogue a check under its requirement.
    pub async fn register_compliance_check(
        &self,
        check: ComplianceCheck,
    ) -> MonitorResult<ComplianceCheck> {
        {
            let mut state = self.state.write().await;
            if !state.requirements.contains_key(&check.requirement_id) {
                return Err(MonitorError::UnknownRequirement(check.requirement_id));
            }
            if state.checks.contains_key(&check.check_id) {
                return Err(MonitorError::DuplicateCheck(check.check_id));
            }
            state
                .requirement_checks
                .entry(check.requirement_id.clone())
                .or_default()
                .push(check.check_id.clone());
            state.checks.insert(check.check_id.clone(), check.clone());
        }

        self.bus
            .emit_new(
                "compliance.check_registered",
                SOURCE,
                json!({"check_id": check.check_id, "requirement_id": check.requirement_id}),
            )
            .await;
        Ok(check)
    }

    pub async fn checks_for_requirement(&self, requirement_id: &str) -> Vec<ComplianceCheck> {
        let state = self.state.read().await;
        state
            .requirement_checks
            .get(requirement_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.checks.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Run one check.
    pub async fn run_compliance_check(&self, check_id: &str) -> MonitorResult<CheckOutcome> {
        let check = {
            let state = self.state.read().await;
            state
                .checks
                .get(check_id)
                .cloned()
                .ok_or_else(|| MonitorError::UnknownCheck(check_id.to_string()))?
        };
        Ok(check.run())
    }

    /// Run every check under the given standards and aggregate the
    /// results.
    pub async fn generate_compliance_report(
        &self,
        name: impl Into<String>,
        standards: Vec<ComplianceStandard>,
    ) -> ComplianceReport {
        let checks: Vec<(ComplianceCheck, ComplianceStandard)> = {
            let state = self.state.read().await;
            state
                .requirements
                .values()
                .filter(|requirement| standards.contains(&requirement.standard))
                .flat_map(|requirement| {
                    state
                        .requirement_checks
                        .get(&requirement.requirement_id)
                        .into_iter()
                        .flatten()
                        .filter_map(|check_id| state.checks.get(check_id))
                        .map(|check| (check.clone(), requirement.standard.clone()))
                        .collect::<Vec<_>>()
                })
                .collect()
        };

        // Probes run outside the lock; they may be arbitrarily slow.
        let results: Vec<CheckResult> = checks
            .into_iter()
            .map(|(check, standard)| {
                let outcome = check.run();
                CheckResult {
                    check_id: check.check_id,
                    requirement_id: check.requirement_id,
                    standard,
                    passed: outcome.passed,
                    details: outcome.details,
                    extras: outcome.extras,
                }
            })
            .collect();

        let report = ComplianceReport {
            report_id: Uuid::new_v4(),
            name: name.into(),
            standards,
            summary: ComplianceReport::summarize(&results),
            results,
            generated_at: Utc::now(),
        };
        self.state
            .write()
            .await
            .reports
            .insert(report.report_id, report.clone());

        self.bus
            .emit_new(
                "compliance.report_generated",
                SOURCE,
                json!({
                    "report_id": report.report_id,
                    "name": report.name,
                    "compliance_percentage": report.summary.compliance_percentage,
                }),
            )
            .await;
        report
    }

    pub async fn get_compliance_report(&self, report_id: Uuid) -> Option<ComplianceReport> {
        self.state.read().await.reports.get(&report_id).cloned()
    }

    // ----- anomaly detection --------------------------------------------

    pub async fn register_anomaly_detector(
        &self,
        detector: AnomalyDetector,
    ) -> MonitorResult<()> {
        let mut state = self.state.write().await;
        let id = detector.detector_id().to_string();
        if state.detectors.contains_key(&id) {
            return Err(MonitorError::DuplicateDetector(id));
        }
        state.detectors.insert(id, detector);
        Ok(())
    }

    pub async fn detectors_by_data_source(&self, data_source: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .detectors
            .values()
            .filter(|d| d.data_source() == data_source)
            .map(|d| d.detector_id().to_string())
            .collect()
    }

    /// Feed baseline values to a statistical detector.
    pub async fn add_baseline_data(
        &self,
        detector_id: &str,
        values: Vec<f64>,
    ) -> MonitorResult<()> {
        let mut state = self.state.write().await;
        match state.detectors.get_mut(detector_id) {
            Some(AnomalyDetector::Statistical(detector)) => {
                detector.add_baseline(values);
                Ok(())
            }
            Some(AnomalyDetector::Behavioral(_)) => Err(MonitorError::DetectorInputMismatch {
                detector_id: detector_id.to_string(),
                input: "baseline",
            }),
            None => Err(MonitorError::UnknownDetector(detector_id.to_string())),
        }
    }

    /// Fold an observation into a behavioral detector's profile.
    pub async fn update_behavioral_profile(
        &self,
        detector_id: &str,
        user_key: &str,
        observation: &Metadata,
    ) -> MonitorResult<()> {
        let mut state = self.state.write().await;
        match state.detectors.get_mut(detector_id) {
            Some(AnomalyDetector::Behavioral(detector)) => {
                detector.update_profile(user_key, observation);
                Ok(())
            }
            Some(AnomalyDetector::Statistical(_)) => Err(MonitorError::DetectorInputMismatch {
                detector_id: detector_id.to_string(),
                input: "behavioral",
            }),
            None => Err(MonitorError::UnknownDetector(detector_id.to_string())),
        }
    }

    /// Run a detector on an observation. A firing detection emits
    /// `security.anomaly_detected`.
    pub async fn detect_anomalies(
        &self,
        detector_id: &str,
        input: DetectionInput,
    ) -> MonitorResult<Detection> {
        let detection = {
            let mut state = self.state.write().await;
            let detector = state
                .detectors
                .get(detector_id)
                .ok_or_else(|| MonitorError::UnknownDetector(detector_id.to_string()))?;
            let detection = match (detector, &input) {
                (AnomalyDetector::Statistical(detector), DetectionInput::Value(value)) => {
                    detector.detect(*value)
                }
                (AnomalyDetector::Behavioral(detector), DetectionInput::Behavior { user_key, data }) => {
                    detector.detect(user_key, data)
                }
                (AnomalyDetector::Statistical(_), DetectionInput::Behavior { .. }) => {
                    return Err(MonitorError::DetectorInputMismatch {
                        detector_id: detector_id.to_string(),
                        input: "behavioral",
                    });
                }
                (AnomalyDetector::Behavioral(_), DetectionInput::Value(_)) => {
                    return Err(MonitorError::DetectorInputMismatch {
                        detector_id: detector_id.to_string(),
                        input: "numeric",
                    });
                }
            };
            if detection.anomalous {
                state.anomalies_detected += 1;
            }
            detection
        };

        if detection.anomalous {
            warn!(
                target: "warden::monitor",
                detector = detector_id,
                score = detection.score,
                "anomaly detected"
            );
            self.bus
                .emit(
                    Event::new(
                        "security.anomaly_detected",
                        SOURCE,
                        json!({
                            "detector_id": detector_id,
                            "score": if detection.score.is_finite() {
                                json!(detection.score)
                            } else {
                                json!("infinite")
                            },
                            "details": detection.details,
                        }),
                    )
                    .with_priority(EventPriority::High),
                )
                .await;
        }
        Ok(detection)
    }

    /// Counts for operator dashboards.
    pub async fn security_dashboard(&self) -> DashboardSummary {
        let state = self.state.read().await;
        DashboardSummary {
            audit_records: state.audit_log.len(),
            requirements: state.requirements.len(),
            checks: state.checks.len(),
            detectors: state.detectors.len(),
            reports: state.reports.len(),
            anomalies_detected: state.anomalies_detected,
        }
    }
}

/// Requirements seeded at startup.
fn default_requirements() -> Vec<ComplianceRequirement> {
    let requirement = |id: &str,
                       name: &str,
                       description: &str,
                       standard: ComplianceStandard,
                       category: &str| ComplianceRequirement {
        requirement_id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        standard,
        category: category.to_string(),
        verification_method: VerificationMethod::Automated,
    };

    vec![
        requirement(
            "gdpr-consent",
            "User Consent",
            "Obtain and manage user consent for data processing",
            ComplianceStandard::Gdpr,
            "data_processing",
        ),
        requirement(
            "gdpr-data-access",
            "Data Access Rights",
            "Provide users with access to their personal data",
            ComplianceStandard::Gdpr,
            "data_rights",
        ),
        requirement(
            "gdpr-data-deletion",
            "Right to be Forgotten",
            "Allow users to request deletion of their personal data",
            ComplianceStandard::Gdpr,
            "data_rights",
        ),
        requirement(
            "soc2-access-control",
            "Access Control",
            "Implement and maintain access controls",
            ComplianceStandard::Soc2,
            "security",
        ),
        requirement(
            "soc2-audit-logging",
            "Audit Logging",
            "Maintain comprehensive audit logs",
            ComplianceStandard::Soc2,
            "monitoring",
        ),
        requirement(
            "hipaa-data-encryption",
            "Data Encryption",
            "Encrypt sensitive health information",
            ComplianceStandard::Hipaa,
            "security",
        ),
        requirement(
            "pci-dss-access-control",
            "Access Control",
            "Restrict access to cardholder data",
            ComplianceStandard::PciDss,
            "security",
        ),
    ]
}

/// Detectors seeded at startup.
fn default_detectors() -> Vec<AnomalyDetector> {
    vec![
        AnomalyDetector::Statistical(StatisticalDetector::new(
            "login-frequency",
            "Login Frequency",
            "login_events",
            2.5,
            1.0,
        )),
        AnomalyDetector::Statistical(StatisticalDetector::new(
            "failed-login",
            "Failed Login Attempts",
            "failed_login_events",
            2.0,
            1.2,
        )),
        AnomalyDetector::Behavioral(BehavioralDetector::new(
            "user-behavior",
            "User Behavior",
            "user_actions",
            1.0,
        )),
    ]
}
