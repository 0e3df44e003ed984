//! Orchestration and reporting for RegionGuard
//!
//! [`Orchestrator`] drives evaluation cycles over the health checker and the
//! failover manager and condenses each cycle into a [`TestReport`] for CI
//! gating or operator review.

pub mod orchestrator;
pub mod report;

pub use orchestrator::{Orchestrator, RunOptions, DR_SUITE, HEALTH_SUITE, PERFORMANCE_SUITE};
pub use report::{
    FailoverValidation, PerformanceMetrics, ReportSummary, TestCase, TestReport, TestSuite,
    Verdict,
};
