//! # Warden Monitor - Security Monitoring
//!
//! The observability layer of the Warden control plane:
//!
//! - **Audit log** - append-only records of authoritative system actions
//!   with filtered, newest-first queries
//! - **Compliance** - requirements catalogued per standard (GDPR, SOC2,
//!   HIPAA, PCI-DSS), automated checks, and aggregated reports
//! - **Anomaly detection** - statistical (z-score) and behavioral
//!   (per-user profile) detectors; firing detections emit
//!   `security.anomaly_detected` on the bus

pub mod anomaly;
pub mod audit;
pub mod compliance;
pub mod error;
pub mod manager;

#[doc(inline)]
pub use anomaly::{AnomalyDetector, BehavioralDetector, Detection, StatisticalDetector};
#[doc(inline)]
pub use audit::{ActorType, AuditEntry, AuditFilter, AuditRecord, AuditResult};
#[doc(inline)]
pub use compliance::{
    CheckOutcome, CheckResult, ComplianceCheck, ComplianceProbe, ComplianceReport,
    ComplianceRequirement, ComplianceStandard, ReportSummary, StandardSummary, VerificationMethod,
};
#[doc(inline)]
pub use error::{MonitorError, MonitorResult};
#[doc(inline)]
pub use manager::{DashboardSummary, DetectionInput, SecurityMonitoringManager};
