//! Compliance requirements, checks, and reports.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warden_core::Metadata;

/// A compliance standard a requirement belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStandard {
    Gdpr,
    Soc2,
    Hipaa,
    PciDss,
    Other(String),
}

impl fmt::Display for ComplianceStandard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gdpr => write!(f, "GDPR"),
            Self::Soc2 => write!(f, "SOC2"),
            Self::Hipaa => write!(f, "HIPAA"),
            Self::PciDss => write!(f, "PCI-DSS"),
            Self::Other(name) => write!(f, "{name}"),
        }
    }
}

/// How a requirement is verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    Automated,
    Manual,
    Hybrid,
}

/// A single compliance requirement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceRequirement {
    pub requirement_id: String,
    pub name: String,
    pub description: String,
    pub standard: ComplianceStandard,
    pub category: String,
    pub verification_method: VerificationMethod,
}

/// Result of running one check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub passed: bool,
    pub details: String,
    pub extras: Metadata,
}

impl CheckOutcome {
    pub fn pass(details: impl Into<String>) -> Self {
        Self {
            passed: true,
            details: details.into(),
            extras: Metadata::new(),
        }
    }

    pub fn fail(details: impl Into<String>) -> Self {
        Self {
            passed: false,
            details: details.into(),
            extras: Metadata::new(),
        }
    }
}

/// The callable body of a compliance check.
pub type ComplianceProbe = Arc<dyn Fn() -> CheckOutcome + Send + Sync>;

/// An automated check attached to a requirement.
#[derive(Clone)]
pub struct ComplianceCheck {
    pub check_id: String,
    pub requirement_id: String,
    pub name: String,
    pub check_type: String,
    pub probe: ComplianceProbe,
}

impl fmt::Debug for ComplianceCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComplianceCheck")
            .field("check_id", &self.check_id)
            .field("requirement_id", &self.requirement_id)
            .field("name", &self.name)
            .field("check_type", &self.check_type)
            .finish_non_exhaustive()
    }
}

impl ComplianceCheck {
    pub fn new(
        check_id: impl Into<String>,
        requirement_id: impl Into<String>,
        name: impl Into<String>,
        check_type: impl Into<String>,
        probe: impl Fn() -> CheckOutcome + Send + Sync + 'static,
    ) -> Self {
        Self {
            check_id: check_id.into(),
            requirement_id: requirement_id.into(),
            name: name.into(),
            check_type: check_type.into(),
            probe: Arc::new(probe),
        }
    }

    pub fn run(&self) -> CheckOutcome {
        (self.probe)()
    }
}

/// One check's contribution to a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub check_id: String,
    pub requirement_id: String,
    pub standard: ComplianceStandard,
    pub passed: bool,
    pub details: String,
    pub extras: Metadata,
}

/// Per-standard pass counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

/// Aggregate report summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_checks: usize,
    pub passed_checks: usize,
    pub failed_checks: usize,
    /// Percentage of passed checks, 0 when nothing ran
    pub compliance_percentage: f64,
    pub standards: HashMap<String, StandardSummary>,
}

/// A generated compliance report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub report_id: Uuid,
    pub name: String,
    pub standards: Vec<ComplianceStandard>,
    pub results: Vec<CheckResult>,
    pub summary: ReportSummary,
    pub generated_at: DateTime<Utc>,
}

impl ComplianceReport {
    pub(crate) fn summarize(results: &[CheckResult]) -> ReportSummary {
        let total_checks = results.len();
        let passed_checks = results.iter().filter(|r| r.passed).count();
        let mut standards: HashMap<String, StandardSummary> = HashMap::new();
        for result in results {
            let entry = standards.entry(result.standard.to_string()).or_default();
            entry.total += 1;
            if result.passed {
                entry.passed += 1;
            } else {
                entry.failed += 1;
            }
        }
        ReportSummary {
            total_checks,
            passed_checks,
            failed_checks: total_checks - passed_checks,
            compliance_percentage: if total_checks > 0 {
                passed_checks as f64 / total_checks as f64 * 100.0
            } else {
                0.0
            },
            standards,
        }
    }
}
