//! JSON test report emitted by every evaluation cycle

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regionguard_common::{HealthSnapshot, HealthStatus, RegionRole};
use regionguard_failover::{DrTestResult, FailoverResult, FailureAssessment, ManagerState};
use serde::{Deserialize, Serialize};

/// Outcome of a case, a suite or the whole run; ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Warning,
    Fail,
}

impl Verdict {
    pub fn worst(self, other: Verdict) -> Verdict {
        self.max(other)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "pass"),
            Verdict::Warning => write!(f, "warning"),
            Verdict::Fail => write!(f, "fail"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub name: String,
    pub status: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TestCase {
    pub fn new(name: impl Into<String>, status: Verdict) -> Self {
        Self {
            name: name.into(),
            status,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn pass(name: impl Into<String>) -> Self {
        Self::new(name, Verdict::Pass)
    }

    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, Verdict::Fail).with_message(message)
    }

    /// Case for one region snapshot. An unhealthy standby only warns; an
    /// unhealthy active region fails.
    pub fn for_snapshot(snapshot: &HealthSnapshot, assessment: &FailureAssessment) -> Self {
        let status = match snapshot.status {
            HealthStatus::Healthy => Verdict::Pass,
            HealthStatus::Degraded => Verdict::Warning,
            HealthStatus::Unhealthy if assessment.is_active_region => Verdict::Fail,
            HealthStatus::Unhealthy => Verdict::Warning,
        };
        let case = Self::new(format!("region_{}", snapshot.region), status);
        if snapshot.timed_out {
            return case.with_message(format!(
                "no answer within {}ms",
                snapshot.latency_ms
            ));
        }
        let failing: Vec<String> = snapshot
            .failing_services()
            .into_iter()
            .map(|(service, health)| match &health.detail {
                Some(detail) => format!("{} {}: {}", service, health.status, detail),
                None => format!("{} {}", service, health.status),
            })
            .collect();
        if failing.is_empty() {
            case
        } else {
            case.with_message(failing.join("; "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuite {
    pub name: String,
    pub status: Verdict,
    pub duration_ms: u64,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub cases: Vec<TestCase>,
}

impl TestSuite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: Verdict::Pass,
            duration_ms: 0,
            skipped: false,
            skip_reason: None,
            cases: Vec::new(),
        }
    }

    pub fn skipped(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            skipped: true,
            skip_reason: Some(reason.into()),
            ..Self::new(name)
        }
    }

    pub fn push(&mut self, case: TestCase) {
        self.status = self.status.worst(case.status);
        self.cases.push(case);
    }

    pub fn finish(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total: usize,
    pub passed: usize,
    pub warnings: usize,
    pub failed: usize,
    pub skipped_suites: usize,
}

impl ReportSummary {
    fn tally(suites: &[TestSuite]) -> Self {
        let mut summary = ReportSummary::default();
        for suite in suites {
            if suite.skipped {
                summary.skipped_suites += 1;
            }
            for case in &suite.cases {
                summary.total += 1;
                match case.status {
                    Verdict::Pass => summary.passed += 1,
                    Verdict::Warning => summary.warnings += 1,
                    Verdict::Fail => summary.failed += 1,
                }
            }
        }
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverValidation {
    pub active_region: String,
    pub active_role: RegionRole,
    pub state: ManagerState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub automatic_failover_enabled: bool,
    pub automatic_failover_triggered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failover: Option<FailoverResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dr_test: Option<DrTestResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub rto_target_ms: u64,
    pub rpo_target_ms: u64,
    pub rto_estimate_ms: Option<u64>,
    pub rpo_observed_ms: Option<u64>,
    pub last_failover_ms: Option<u64>,
    pub average_failover_ms: Option<f64>,
    pub average_failback_ms: Option<f64>,
    pub region_latency_ms: BTreeMap<String, u64>,
}

/// Consolidated outcome of one evaluation cycle; the JSON field names are a
/// stable contract for CI consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    pub timestamp: DateTime<Utc>,
    /// Wall time of the cycle in milliseconds
    pub test_duration: u64,
    pub overall_result: Verdict,
    pub summary: ReportSummary,
    pub test_suites: Vec<TestSuite>,
    pub failover_validation: FailoverValidation,
    pub performance_metrics: PerformanceMetrics,
    pub recommendations: Vec<String>,
}

impl TestReport {
    pub fn new(
        timestamp: DateTime<Utc>,
        test_duration: u64,
        test_suites: Vec<TestSuite>,
        failover_validation: FailoverValidation,
        performance_metrics: PerformanceMetrics,
        recommendations: Vec<String>,
    ) -> Self {
        let overall_result = test_suites
            .iter()
            .map(|s| s.status)
            .fold(Verdict::Pass, Verdict::worst);
        Self {
            timestamp,
            test_duration,
            overall_result,
            summary: ReportSummary::tally(&test_suites),
            test_suites,
            failover_validation,
            performance_metrics,
            recommendations,
        }
    }

    pub fn suite(&self, name: &str) -> Option<&TestSuite> {
        self.test_suites.iter().find(|s| s.name == name)
    }

    /// Warnings are flagged in the report but do not fail the run
    pub fn exit_code(&self) -> i32 {
        match self.overall_result {
            Verdict::Fail => 1,
            Verdict::Pass | Verdict::Warning => 0,
        }
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))
    }
}
