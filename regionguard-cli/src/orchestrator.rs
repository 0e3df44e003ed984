//! Evaluation cycles
//!
//! One cycle probes every region, feeds the snapshots into the failover
//! manager's failure counting, acts on the automatic-failover policy and runs
//! the DR and performance validations. Each suite is independent: an error
//! in one is recorded as a failed case and the rest still run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use regionguard_common::{HealthSnapshot, RegionGuardConfig, RegionGuardMetrics, RegionRole};
use regionguard_failover::{
    Collaborators, DrTestResult, FailoverManager, FailoverReport, FailoverResult, FailureAssessment,
    HttpReplicationMonitor, HttpTrafficController, LogNotifier, ManagerOptions,
    NotificationSink, SledStateStore, WebhookNotifier,
};
use regionguard_health::HealthChecker;
use reqwest::Client;
use tokio::sync::broadcast;
use tokio::time::{interval, interval_at, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::report::{FailoverValidation, PerformanceMetrics, TestCase, TestReport, TestSuite, Verdict};

pub const HEALTH_SUITE: &str = "health_validation";
pub const DR_SUITE: &str = "dr_validation";
pub const PERFORMANCE_SUITE: &str = "performance";

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Skip the end-to-end DR validation suite
    pub skip_e2e: bool,
}

/// What the health suite learned that later suites need
#[derive(Default)]
struct HealthOutcome {
    latencies: BTreeMap<String, u64>,
    automatic_failover_triggered: bool,
    failover: Option<FailoverResult>,
}

pub struct Orchestrator {
    checker: Arc<HealthChecker>,
    manager: Arc<FailoverManager>,
    slow_probe: Duration,
}

impl Orchestrator {
    pub fn new(checker: Arc<HealthChecker>, manager: Arc<FailoverManager>) -> Self {
        Self {
            checker,
            manager,
            slow_probe: Duration::from_secs(2),
        }
    }

    /// Region latency above this is flagged by the performance suite
    pub fn with_slow_probe_threshold(mut self, threshold: Duration) -> Self {
        self.slow_probe = threshold;
        self
    }

    /// Wire the HTTP collaborators and the sled store described by `config`
    pub async fn from_config(
        config: &RegionGuardConfig,
        metrics: Option<Arc<RegionGuardMetrics>>,
    ) -> Result<Self> {
        let regions = config.region_pair()?;

        let mut checker = HealthChecker::from_config(config)?;
        if let Some(metrics) = &metrics {
            checker = checker.with_metrics(Arc::clone(metrics));
        }
        let checker = Arc::new(checker);

        let client = Client::builder()
            .timeout(config.collaborators.request_timeout())
            .build()
            .context("failed to build collaborator HTTP client")?;
        let collaborators = Collaborators {
            traffic: Arc::new(HttpTrafficController::new(
                client.clone(),
                &config.collaborators.traffic_control_url,
            )),
            replication: Arc::new(HttpReplicationMonitor::new(
                client.clone(),
                &config.collaborators.replication_status_url,
            )),
            notifiers: vec![
                Arc::new(LogNotifier) as Arc<dyn NotificationSink>,
                Arc::new(WebhookNotifier::new(client)),
            ],
        };

        std::fs::create_dir_all(&config.storage.state_dir).with_context(|| {
            format!(
                "failed to create state directory {}",
                config.storage.state_dir.display()
            )
        })?;
        let store = Arc::new(SledStateStore::open(config.storage.state_dir.join("routing"))?);

        let mut manager = FailoverManager::new(
            regions,
            config.policy.clone(),
            Arc::clone(&checker),
            collaborators,
            store,
            ManagerOptions::from_config(config),
        )
        .await?;
        if let Some(metrics) = metrics {
            manager = manager.with_metrics(metrics);
        }

        Ok(Self::new(checker, Arc::new(manager)).with_slow_probe_threshold(config.health.slow_probe()))
    }

    pub fn manager(&self) -> &Arc<FailoverManager> {
        &self.manager
    }

    /// Run one full evaluation cycle. Always produces a report.
    pub async fn run_evaluation_cycle(&self, options: &RunOptions) -> TestReport {
        let timestamp = Utc::now();
        let started = Instant::now();
        let mut recommendations = Vec::new();

        let suite_started = Instant::now();
        let (health_suite, outcome) = self.health_validation(&mut recommendations).await;
        let health_suite = health_suite.finish(suite_started.elapsed().as_millis() as u64);

        let suite_started = Instant::now();
        let (dr_suite, dr_test) = if options.skip_e2e {
            (TestSuite::skipped(DR_SUITE, "skipped by --skip-e2e"), None)
        } else if outcome.automatic_failover_triggered {
            (
                TestSuite::skipped(DR_SUITE, "failover executed during this cycle"),
                None,
            )
        } else {
            self.dr_validation(&mut recommendations).await
        };
        let dr_suite = dr_suite.finish(suite_started.elapsed().as_millis() as u64);

        let failover_report = self.manager.generate_failover_report().await;

        let suite_started = Instant::now();
        let (performance_suite, performance) =
            self.performance(&outcome, dr_test.as_ref(), &failover_report, &mut recommendations);
        let performance_suite = performance_suite.finish(suite_started.elapsed().as_millis() as u64);

        let validation = self.failover_validation(outcome, dr_test, &failover_report);
        let report = TestReport::new(
            timestamp,
            started.elapsed().as_millis() as u64,
            vec![health_suite, dr_suite, performance_suite],
            validation,
            performance,
            recommendations,
        );

        match report.overall_result {
            Verdict::Pass => info!("Evaluation cycle passed in {}ms", report.test_duration),
            Verdict::Warning => warn!(
                "Evaluation cycle finished with {} warning(s)",
                report.summary.warnings
            ),
            Verdict::Fail => error!(
                "Evaluation cycle failed: {} failed case(s)",
                report.summary.failed
            ),
        }
        report
    }

    /// Evaluate on the policy's interval until `shutdown` fires.
    ///
    /// A changed `health_check_interval_sec` takes effect after the next tick.
    pub async fn run_scheduled<F>(
        &self,
        options: RunOptions,
        mut shutdown: broadcast::Receiver<()>,
        mut on_report: F,
    ) -> Result<()>
    where
        F: FnMut(&TestReport) + Send,
    {
        let mut period = self.manager.policy().await.health_check_interval();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Scheduled evaluation every {:?}", period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_evaluation_cycle(&options).await;
                    on_report(&report);

                    let current = self.manager.policy().await.health_check_interval();
                    if current != period {
                        info!("Evaluation interval changed from {:?} to {:?}", period, current);
                        period = current;
                        ticker = interval_at(tokio::time::Instant::now() + period, period);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Stopping scheduled evaluation");
                    break;
                }
            }
        }
        self.manager.flush_notifications().await;
        Ok(())
    }

    async fn health_validation(&self, recommendations: &mut Vec<String>) -> (TestSuite, HealthOutcome) {
        let mut suite = TestSuite::new(HEALTH_SUITE);
        let mut outcome = HealthOutcome::default();

        let snapshots = match self.checker.check_all_services().await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                error!("Health check failed: {}", e);
                suite.push(TestCase::failed("check_all_services", e.to_string()));
                recommendations.push(format!("Fix the health check configuration: {}", e));
                return (suite, outcome);
            }
        };

        let mut triggered: Option<FailureAssessment> = None;
        for (name, snapshot) in &snapshots {
            outcome.latencies.insert(name.clone(), snapshot.latency_ms);
            match self.manager.record_snapshot(snapshot).await {
                Ok(assessment) => {
                    suite.push(TestCase::for_snapshot(snapshot, &assessment));
                    if assessment.threshold_reached {
                        triggered = Some(assessment);
                    }
                }
                Err(e) => suite.push(TestCase::failed(
                    format!("region_{}_failure_counting", name),
                    e.to_string(),
                )),
            }
        }

        if let Some(assessment) = triggered {
            self.act_on_threshold(&assessment, &mut suite, &mut outcome, recommendations)
                .await;
        } else {
            self.suggest_failback(&snapshots, recommendations).await;
        }

        (suite, outcome)
    }

    async fn act_on_threshold(
        &self,
        assessment: &FailureAssessment,
        suite: &mut TestSuite,
        outcome: &mut HealthOutcome,
        recommendations: &mut Vec<String>,
    ) {
        let standby = self.manager.regions().get(assessment.role.other()).name.clone();

        if assessment.role == RegionRole::Secondary {
            warn!(
                "ALERT: active standby region {} failed {} consecutive health checks",
                assessment.region, assessment.consecutive_failures
            );
            recommendations.push(format!(
                "Active region {} is failing while serving failed-over traffic; restore {} and fail back",
                assessment.region, standby
            ));
            return;
        }

        if !assessment.automatic_failover {
            warn!(
                "ALERT: primary region {} failed {} consecutive health checks; automatic failover is disabled",
                assessment.region, assessment.consecutive_failures
            );
            recommendations.push(format!(
                "Primary region {} failed {} consecutive health checks (threshold {}); initiate a manual failover to {}",
                assessment.region, assessment.consecutive_failures, assessment.threshold, standby
            ));
            return;
        }

        let reason = format!(
            "primary region {} failed {} consecutive health checks",
            assessment.region, assessment.consecutive_failures
        );
        match self.manager.execute_automatic_failover(&reason).await {
            Ok(result) => {
                suite.push(
                    TestCase::pass("automatic_failover")
                        .with_message(format!("traffic moved to {} in {}ms", standby, result.elapsed_ms)),
                );
                for warning in &result.warnings {
                    recommendations.push(format!("Review failover warning: {}", warning));
                }
                recommendations.push(format!(
                    "Investigate the outage in {} and fail back once it is healthy",
                    assessment.region
                ));
                outcome.automatic_failover_triggered = true;
                outcome.failover = Some(result);
            }
            Err(e) => {
                error!("Automatic failover failed: {}", e);
                suite.push(TestCase::failed("automatic_failover", e.to_string()));
                recommendations.push(format!(
                    "Automatic failover from {} failed ({}); manual intervention required",
                    assessment.region, e
                ));
            }
        }
    }

    async fn suggest_failback(
        &self,
        snapshots: &BTreeMap<String, HealthSnapshot>,
        recommendations: &mut Vec<String>,
    ) {
        let active = self.manager.active_region().await;
        if active.role != RegionRole::Secondary {
            return;
        }
        let primary = self.manager.regions().primary();
        if snapshots
            .get(&primary.name)
            .is_some_and(|s| s.status.is_healthy())
        {
            recommendations.push(format!(
                "Primary region {} is healthy again; consider failing back from {}",
                primary.name, active.name
            ));
        }
    }

    async fn dr_validation(&self, recommendations: &mut Vec<String>) -> (TestSuite, Option<DrTestResult>) {
        let mut suite = TestSuite::new(DR_SUITE);
        match self.manager.test_disaster_recovery().await {
            Ok(result) => {
                if result.success {
                    suite.push(TestCase::pass("standby_readiness").with_message(format!(
                        "{} ready, estimated recovery {}ms",
                        result.target_region, result.rto_estimate_ms
                    )));
                } else {
                    suite.push(TestCase::failed(
                        "standby_readiness",
                        result.issues.join("; "),
                    ));
                    for issue in &result.issues {
                        recommendations.push(format!("Resolve DR readiness issue: {}", issue));
                    }
                }
                (suite, Some(result))
            }
            Err(e) => {
                warn!("DR test could not run: {}", e);
                suite.push(TestCase::failed("test_disaster_recovery", e.to_string()));
                (suite, None)
            }
        }
    }

    fn performance(
        &self,
        outcome: &HealthOutcome,
        dr_test: Option<&DrTestResult>,
        report: &FailoverReport,
        recommendations: &mut Vec<String>,
    ) -> (TestSuite, PerformanceMetrics) {
        let mut suite = TestSuite::new(PERFORMANCE_SUITE);
        let policy = &report.policy;
        let rto_target = policy.rto_target().as_millis() as u64;
        let rpo_target = policy.rpo_target().as_millis() as u64;

        let last_failover_ms = outcome
            .failover
            .as_ref()
            .map(|f| f.elapsed_ms)
            .or(report.last_failover_ms);

        let metrics = PerformanceMetrics {
            rto_target_ms: rto_target,
            rpo_target_ms: rpo_target,
            rto_estimate_ms: dr_test.map(|d| d.rto_estimate_ms),
            rpo_observed_ms: dr_test
                .and_then(|d| d.rpo_observed_ms)
                .or_else(|| outcome.failover.as_ref().and_then(|f| f.replication_lag_ms)),
            last_failover_ms,
            average_failover_ms: report.average_failover_ms,
            average_failback_ms: report.average_failback_ms,
            region_latency_ms: outcome.latencies.clone(),
        };

        if let Some(estimate) = metrics.rto_estimate_ms {
            suite.push(within_target("rto_estimate", estimate, rto_target));
        }
        if let Some(observed) = metrics.rpo_observed_ms {
            let case = within_target("rpo_observed", observed, rpo_target);
            if case.status != Verdict::Pass {
                recommendations.push(
                    "Replication lag exceeds the RPO target; investigate replication throughput"
                        .to_string(),
                );
            }
            suite.push(case);
        }
        if let Some(last) = last_failover_ms {
            suite.push(within_target("last_failover_duration", last, rto_target));
        }

        let slow_ms = self.slow_probe.as_millis() as u64;
        for (region, latency) in &metrics.region_latency_ms {
            suite.push(within_target(&format!("probe_latency_{}", region), *latency, slow_ms));
        }

        (suite, metrics)
    }

    fn failover_validation(
        &self,
        outcome: HealthOutcome,
        dr_test: Option<DrTestResult>,
        report: &FailoverReport,
    ) -> FailoverValidation {
        FailoverValidation {
            active_region: report.active_region.clone(),
            active_role: report.active_role,
            state: report.current_state,
            consecutive_failures: report.consecutive_failure_count,
            failure_threshold: report.policy.health_check_failure_threshold,
            automatic_failover_enabled: report.policy.automatic_failover,
            automatic_failover_triggered: outcome.automatic_failover_triggered,
            failover: outcome.failover,
            dr_test,
        }
    }
}

/// Warns when `observed` exceeds `target`
fn within_target(name: &str, observed: u64, target: u64) -> TestCase {
    let message = format!("{}ms (target {}ms)", observed, target);
    if observed <= target {
        TestCase::pass(name).with_message(message)
    } else {
        TestCase::new(name, Verdict::Warning).with_message(message)
    }
}
