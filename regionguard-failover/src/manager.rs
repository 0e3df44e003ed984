//! Failover state machine
//!
//! [`FailoverManager`] owns the [`RoutingState`]. Every failover, failback and
//! DR test runs under a single transition permit; a second request while one
//! is in flight is rejected rather than queued. Each step carries a timeout
//! and can be cancelled through [`FailoverManager::abort`], which always ends
//! in the pre-transition stable state.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use regionguard_common::{
    FailoverPolicy, HealthSnapshot, HealthStatus, Region, RegionGuardConfig, RegionGuardMetrics,
    RegionPair, RegionRole,
};
use regionguard_health::{HealthChecker, HealthTrend, SnapshotHistory};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, MutexGuard, RwLock};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::collaborators::{NotificationSink, ReplicationMonitor, TrafficController};
use crate::error::{FailoverError, Result, RollbackOutcome, TransitionStep};
use crate::policy::PolicyUpdate;
use crate::report::FailoverReport;
use crate::state::{FailoverEvent, FailoverEventType, ManagerState, RecoveryLevel, RoutingState};
use crate::store::StateStore;

/// Timing knobs that are not part of the operator-facing policy
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub step_timeout: Duration,
    pub rollback_attempts: u32,
    pub rollback_backoff: Duration,
    pub cutover_estimate: Duration,
    pub notify_timeout: Duration,
    pub history_capacity: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(30),
            rollback_attempts: 3,
            rollback_backoff: Duration::from_millis(500),
            cutover_estimate: Duration::from_secs(60),
            notify_timeout: Duration::from_secs(5),
            history_capacity: regionguard_common::DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl ManagerOptions {
    pub fn from_config(config: &RegionGuardConfig) -> Self {
        Self {
            step_timeout: config.failover.step_timeout(),
            rollback_attempts: config.failover.rollback_attempts,
            rollback_backoff: config.failover.rollback_backoff(),
            cutover_estimate: config.failover.cutover_estimate(),
            notify_timeout: config.failover.notify_timeout(),
            history_capacity: config.health.history_capacity,
        }
    }
}

/// External systems the manager drives
pub struct Collaborators {
    pub traffic: Arc<dyn TrafficController>,
    pub replication: Arc<dyn ReplicationMonitor>,
    pub notifiers: Vec<Arc<dyn NotificationSink>>,
}

/// Result of feeding one snapshot into failure counting
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureAssessment {
    pub region: String,
    pub role: RegionRole,
    pub is_active_region: bool,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub threshold: u32,
    pub threshold_reached: bool,
    pub automatic_failover: bool,
    pub trend: HealthTrend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverResult {
    pub event: FailoverEvent,
    pub state: ManagerState,
    pub elapsed_ms: u64,
    pub rto_target_ms: u64,
    pub rto_breached: bool,
    pub replication_lag_ms: Option<u64>,
    pub rpo_breached: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrTestResult {
    pub success: bool,
    pub rpo_observed_ms: Option<u64>,
    pub rto_estimate_ms: u64,
    pub issues: Vec<String>,
    pub target_region: String,
    pub duration_ms: u64,
    pub event_id: Uuid,
}

struct StepFailure {
    step: TransitionStep,
    cause: String,
    aborted: bool,
}

impl StepFailure {
    fn failed(step: TransitionStep, cause: impl Into<String>) -> Self {
        Self {
            step,
            cause: cause.into(),
            aborted: false,
        }
    }

    fn aborted(step: TransitionStep) -> Self {
        Self {
            step,
            cause: "aborted by operator".to_string(),
            aborted: true,
        }
    }

    fn describe(&self) -> String {
        format!("{} failed: {}", self.step, self.cause)
    }
}

#[derive(Default)]
struct StepReport {
    replication_lag: Option<Duration>,
    rpo_breached: bool,
    warnings: Vec<String>,
}

pub struct FailoverManager {
    regions: RegionPair,
    checker: Arc<HealthChecker>,
    collaborators: Collaborators,
    store: Arc<dyn StateStore>,
    options: ManagerOptions,
    metrics: Option<Arc<RegionGuardMetrics>>,

    policy: RwLock<Arc<FailoverPolicy>>,
    routing: RwLock<RoutingState>,
    snapshots: RwLock<HashMap<String, SnapshotHistory>>,

    /// Held for the whole of a failover, failback or DR test
    transition: Mutex<()>,
    cancel: Mutex<Option<CancellationToken>>,
    state_tx: watch::Sender<ManagerState>,
    notifications: Mutex<JoinSet<()>>,
}

impl FailoverManager {
    /// Create a manager, restoring the last persisted routing state if any
    pub async fn new(
        regions: RegionPair,
        policy: FailoverPolicy,
        checker: Arc<HealthChecker>,
        collaborators: Collaborators,
        store: Arc<dyn StateStore>,
        options: ManagerOptions,
    ) -> Result<Self> {
        policy
            .validate()
            .map_err(|e| FailoverError::InvalidRequest(e.to_string()))?;

        let routing = match store.load().await? {
            Some(state) => {
                info!(
                    "Restored routing state: {} region {} active, {} recorded events",
                    state.active_region,
                    regions.get(state.active_region).name,
                    state.history.len()
                );
                state
            }
            None => {
                let state = RoutingState::default();
                store.checkpoint(&state).await?;
                info!("Initialized routing state on primary region {}", regions.primary().name);
                state
            }
        };

        let (state_tx, _) = watch::channel(routing.manager_state());
        let snapshots = regions
            .iter()
            .map(|r| (r.name.clone(), SnapshotHistory::new(options.history_capacity)))
            .collect();

        Ok(Self {
            regions,
            checker,
            collaborators,
            store,
            options,
            metrics: None,
            policy: RwLock::new(Arc::new(policy)),
            routing: RwLock::new(routing),
            snapshots: RwLock::new(snapshots),
            transition: Mutex::new(()),
            cancel: Mutex::new(None),
            state_tx,
            notifications: Mutex::new(JoinSet::new()),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<RegionGuardMetrics>) -> Self {
        let routing = self.routing.get_mut();
        metrics
            .consecutive_failures
            .set(i64::from(routing.consecutive_failure_count));
        let names: Vec<&str> = self.regions.iter().map(|r| r.name.as_str()).collect();
        metrics.set_active_region(&self.regions.get(routing.active_region).name, &names);
        self.metrics = Some(metrics);
        self
    }

    pub fn regions(&self) -> &RegionPair {
        &self.regions
    }

    pub fn checker(&self) -> &Arc<HealthChecker> {
        &self.checker
    }

    pub fn state(&self) -> ManagerState {
        *self.state_tx.borrow()
    }

    /// Watch state-machine transitions as they happen
    pub fn subscribe(&self) -> watch::Receiver<ManagerState> {
        self.state_tx.subscribe()
    }

    pub async fn routing_state(&self) -> RoutingState {
        self.routing.read().await.clone()
    }

    pub async fn active_region(&self) -> Region {
        let role = self.routing.read().await.active_region;
        self.regions.get(role).clone()
    }

    pub async fn policy(&self) -> Arc<FailoverPolicy> {
        Arc::clone(&*self.policy.read().await)
    }

    pub async fn snapshot_history(&self, region: &str) -> Option<SnapshotHistory> {
        self.snapshots.read().await.get(region).cloned()
    }

    /// Merge `update` into the policy; applies from the next evaluation on
    #[instrument(skip(self))]
    pub async fn update_policy(&self, update: PolicyUpdate) -> Result<Arc<FailoverPolicy>> {
        let mut current = self.policy.write().await;
        let merged = update.apply(&current);
        merged
            .validate()
            .map_err(|e| FailoverError::InvalidRequest(e.to_string()))?;
        let merged = Arc::new(merged);
        *current = Arc::clone(&merged);
        info!(
            "Failover policy updated: automatic_failover={}, threshold={}, rto={}min, rpo={}min",
            merged.automatic_failover,
            merged.health_check_failure_threshold,
            merged.rto_target_min,
            merged.rpo_target_min
        );
        Ok(merged)
    }

    /// Feed one snapshot into failure counting for its region.
    ///
    /// For the active region an unhealthy snapshot increments the
    /// consecutive-failure count and a healthy one resets it; degraded leaves
    /// it unchanged. Never moves traffic.
    pub async fn record_snapshot(&self, snapshot: &HealthSnapshot) -> Result<FailureAssessment> {
        let region = self.regions.by_name(&snapshot.region).ok_or_else(|| {
            FailoverError::InvalidRequest(format!("snapshot for unknown region {}", snapshot.region))
        })?;

        let (trend, tail_failures) = {
            let mut histories = self.snapshots.write().await;
            let history = histories
                .entry(region.name.clone())
                .or_insert_with(|| SnapshotHistory::new(self.options.history_capacity));
            history.push(snapshot.clone());
            (history.trend(), history.consecutive_unhealthy() as u32)
        };

        let policy = self.policy().await;
        let mut routing = self.routing.write().await;
        let is_active_region = routing.active_region == region.role;

        let consecutive_failures = if is_active_region {
            let before = routing.consecutive_failure_count;
            match snapshot.status {
                HealthStatus::Unhealthy => {
                    routing.consecutive_failure_count = before.saturating_add(1)
                }
                HealthStatus::Healthy => routing.consecutive_failure_count = 0,
                HealthStatus::Degraded => {}
            }
            if routing.consecutive_failure_count != before {
                if let Some(metrics) = &self.metrics {
                    metrics
                        .consecutive_failures
                        .set(i64::from(routing.consecutive_failure_count));
                }
                if let Err(e) = self.store.checkpoint(&routing).await {
                    error!("Failed to persist failure count: {}", e);
                }
            }
            routing.consecutive_failure_count
        } else {
            tail_failures
        };

        let threshold = policy.health_check_failure_threshold;
        let threshold_reached = is_active_region && consecutive_failures >= threshold;
        if threshold_reached {
            warn!(
                "Active region {} has failed {} consecutive health checks (threshold {})",
                region.name, consecutive_failures, threshold
            );
        } else {
            debug!(
                "Recorded {} snapshot for {} ({} consecutive failures)",
                snapshot.status, region.name, consecutive_failures
            );
        }

        Ok(FailureAssessment {
            region: region.name.clone(),
            role: region.role,
            is_active_region,
            status: snapshot.status,
            consecutive_failures,
            threshold,
            threshold_reached,
            automatic_failover: policy.automatic_failover,
            trend,
        })
    }

    /// Operator-requested failover to the secondary region
    #[instrument(skip(self))]
    pub async fn execute_manual_failover(&self, reason: &str) -> Result<FailoverResult> {
        self.failover(FailoverEventType::Manual, reason).await
    }

    /// Policy-driven failover; refused unless the policy allows it and the
    /// failure threshold has been reached
    #[instrument(skip(self))]
    pub async fn execute_automatic_failover(&self, reason: &str) -> Result<FailoverResult> {
        self.failover(FailoverEventType::Automatic, reason).await
    }

    /// Return traffic to the primary; requires a fresh healthy primary snapshot
    #[instrument(skip(self))]
    pub async fn execute_failback(&self, reason: &str) -> Result<FailoverResult> {
        let reason = Self::validate_reason(reason)?;
        let _permit = self.acquire()?;

        if self.routing.read().await.active_region == RegionRole::Primary {
            return Err(FailoverError::PreconditionFailed(format!(
                "traffic is already served by primary region {}",
                self.regions.primary().name
            )));
        }

        let primary = self.regions.primary().clone();
        let snapshot = match timeout(self.options.step_timeout, self.checker.check_region(&primary)).await {
            Ok(result) => result?,
            Err(_) => HealthSnapshot::timed_out(&primary.name, self.options.step_timeout),
        };
        self.remember(&snapshot).await;

        if !snapshot.status.is_healthy() {
            warn!(
                "Refusing failback: primary region {} is {}",
                primary.name, snapshot.status
            );
            return Err(FailoverError::PreconditionFailed(format!(
                "primary region {} is {}; failback requires it to be healthy",
                primary.name, snapshot.status
            )));
        }

        self.transition(
            FailoverEventType::Failback,
            RegionRole::Secondary,
            RegionRole::Primary,
            reason,
            ManagerState::FailingBack,
        )
        .await
    }

    /// Exercise the failover checks against the standby region without
    /// moving traffic
    #[instrument(skip(self))]
    pub async fn test_disaster_recovery(&self) -> Result<DrTestResult> {
        let _permit = self.acquire()?;
        let policy = self.policy().await;
        let active_role = self.routing.read().await.active_region;
        let active = self.regions.get(active_role).clone();
        let standby = self.regions.get(active_role.other()).clone();

        let previous = self.state();
        let token = self.arm_cancellation().await;
        self.set_state(ManagerState::DrTestRunning);
        info!("Starting disaster recovery test against {}", standby);

        let started = Instant::now();
        let mut issues = Vec::new();
        let mut aborted = false;

        let checker = &self.checker;
        let probe = async { checker.check_region(&standby).await.map_err(anyhow::Error::from) };
        match self.guarded(TransitionStep::VerifyTarget, &token, probe).await {
            Ok(snapshot) => {
                self.remember(&snapshot).await;
                if !snapshot.status.is_healthy() {
                    let failing: Vec<String> = snapshot
                        .failing_services()
                        .into_iter()
                        .map(|(service, health)| match &health.detail {
                            Some(detail) => format!("{}: {}", service, detail),
                            None => format!("{}: {}", service, health.status),
                        })
                        .collect();
                    issues.push(format!(
                        "standby region {} is {} ({})",
                        standby.name,
                        snapshot.status,
                        failing.join(", ")
                    ));
                }
            }
            Err(failure) => {
                aborted |= failure.aborted;
                issues.push(failure.describe());
            }
        }

        let mut rpo_observed = None;
        if !aborted {
            let lag = self.collaborators.replication.replication_lag(&active, &standby);
            match self.guarded(TransitionStep::ReplicationCheck, &token, lag).await {
                Ok(lag) => {
                    rpo_observed = Some(lag);
                    if lag > policy.rpo_target() {
                        issues.push(format!(
                            "replication lag {}ms exceeds RPO target of {} min",
                            lag.as_millis(),
                            policy.rpo_target_min
                        ));
                    }
                }
                Err(failure) => {
                    aborted |= failure.aborted;
                    issues.push(failure.describe());
                }
            }
        }
        self.disarm_cancellation().await;

        let cutover = self
            .routing
            .read()
            .await
            .mean_duration_ms(FailoverEventType::is_failover)
            .map(|ms| Duration::from_millis(ms as u64))
            .unwrap_or(self.options.cutover_estimate);
        let rto_estimate = started.elapsed() + cutover;
        if !aborted && rto_estimate > policy.rto_target() {
            issues.push(format!(
                "estimated recovery time {}s exceeds RTO target of {} min",
                rto_estimate.as_secs(),
                policy.rto_target_min
            ));
        }

        let success = !aborted && issues.is_empty();
        let mut event = FailoverEvent::new(
            FailoverEventType::DrTest,
            "disaster recovery test",
            &active.name,
            &standby.name,
            started.elapsed(),
        )
        .with_level(RecoveryLevel::ValidationOnly);
        if aborted {
            event = event.failed("aborted by operator");
        } else if !success {
            event = event.failed(issues.join("; "));
        }

        self.append_event(&event).await;
        self.set_state(previous);
        self.record_metrics(&event, active_role);
        // Passing DR tests run every cycle; only failures reach operators
        if !event.success {
            self.dispatch(&event, &policy).await;
        }

        if aborted {
            warn!("Disaster recovery test aborted");
            return Err(FailoverError::Aborted {
                rollback: RollbackOutcome::not_needed(),
            });
        }

        if success {
            info!("Disaster recovery test passed in {}ms", event.duration_ms);
        } else {
            warn!("Disaster recovery test found {} issue(s)", issues.len());
        }

        Ok(DrTestResult {
            success,
            rpo_observed_ms: rpo_observed.map(|lag| lag.as_millis() as u64),
            rto_estimate_ms: rto_estimate.as_millis() as u64,
            issues,
            target_region: standby.name.clone(),
            duration_ms: event.duration_ms,
            event_id: event.id,
        })
    }

    /// Cancel the in-flight transition, if any. The transition rolls back and
    /// its caller receives [`FailoverError::Aborted`].
    pub async fn abort(&self) -> bool {
        match self.cancel.lock().await.as_ref() {
            Some(token) => {
                warn!("Operator abort requested during {}", self.state());
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn generate_failover_report(&self) -> FailoverReport {
        let policy = self.policy().await;
        let routing = self.routing.read().await;
        FailoverReport::build(
            &routing,
            self.state(),
            &self.regions.get(routing.active_region).name,
            &policy,
        )
    }

    async fn failover(&self, kind: FailoverEventType, reason: &str) -> Result<FailoverResult> {
        let reason = Self::validate_reason(reason)?;
        let _permit = self.acquire()?;

        if kind == FailoverEventType::Automatic {
            let policy = self.policy().await;
            if !policy.automatic_failover {
                return Err(FailoverError::PolicyViolation(
                    "automatic failover is disabled by policy".to_string(),
                ));
            }
            let failures = self.routing.read().await.consecutive_failure_count;
            if failures < policy.health_check_failure_threshold {
                return Err(FailoverError::PolicyViolation(format!(
                    "{} consecutive failures is below the threshold of {}",
                    failures, policy.health_check_failure_threshold
                )));
            }
        }

        if self.routing.read().await.active_region != RegionRole::Primary {
            return Err(FailoverError::PreconditionFailed(format!(
                "traffic is already served by secondary region {}",
                self.regions.secondary().name
            )));
        }

        self.transition(
            kind,
            RegionRole::Primary,
            RegionRole::Secondary,
            reason,
            ManagerState::FailingOver,
        )
        .await
    }

    async fn transition(
        &self,
        kind: FailoverEventType,
        from: RegionRole,
        to: RegionRole,
        reason: String,
        phase: ManagerState,
    ) -> Result<FailoverResult> {
        let source = self.regions.get(from).clone();
        let target = self.regions.get(to).clone();
        let policy = self.policy().await;
        let previous = self.state();

        let token = self.arm_cancellation().await;
        self.set_state(phase);
        info!("{}: {} -> {} ({})", phase, source.name, target.name, reason);

        let started = Instant::now();
        let mut report = StepReport::default();
        let outcome = self
            .run_steps(&source, &target, &policy, &token, &mut report)
            .await;
        self.disarm_cancellation().await;

        match outcome {
            Ok(()) => Ok(self
                .commit(kind, reason, &source, &target, to, started.elapsed(), &policy, report)
                .await),
            Err(failure) => Err(self
                .fail(kind, reason, &source, &target, previous, failure, started, &policy)
                .await),
        }
    }

    async fn run_steps(
        &self,
        source: &Region,
        target: &Region,
        policy: &FailoverPolicy,
        token: &CancellationToken,
        report: &mut StepReport,
    ) -> std::result::Result<(), StepFailure> {
        let checker = &self.checker;

        let probe = async { checker.check_region(target).await.map_err(anyhow::Error::from) };
        let snapshot = self.guarded(TransitionStep::VerifyTarget, token, probe).await?;
        self.remember(&snapshot).await;
        match snapshot.status {
            HealthStatus::Unhealthy => {
                return Err(StepFailure::failed(
                    TransitionStep::VerifyTarget,
                    format!("target region {} is unhealthy", target.name),
                ));
            }
            HealthStatus::Degraded => {
                report
                    .warnings
                    .push(format!("target region {} is degraded", target.name));
            }
            HealthStatus::Healthy => {}
        }

        let lag = self.collaborators.replication.replication_lag(source, target);
        let lag = self.guarded(TransitionStep::ReplicationCheck, token, lag).await?;
        report.replication_lag = Some(lag);
        if lag > policy.rpo_target() {
            warn!(
                "Replication lag {}ms from {} to {} exceeds RPO target of {} min",
                lag.as_millis(),
                source.name,
                target.name,
                policy.rpo_target_min
            );
            report.rpo_breached = true;
            report.warnings.push(format!(
                "replication lag {}ms exceeds RPO target of {} min",
                lag.as_millis(),
                policy.rpo_target_min
            ));
        }

        let cutover = self.collaborators.traffic.set_active_region(target);
        self.guarded(TransitionStep::TrafficCutover, token, cutover).await?;

        let probe = async { checker.check_region(target).await.map_err(anyhow::Error::from) };
        let verified = self.guarded(TransitionStep::VerifyCutover, token, probe).await?;
        self.remember(&verified).await;
        if verified.status == HealthStatus::Unhealthy {
            return Err(StepFailure::failed(
                TransitionStep::VerifyCutover,
                format!("target region {} became unhealthy after cutover", target.name),
            ));
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn commit(
        &self,
        kind: FailoverEventType,
        reason: String,
        source: &Region,
        target: &Region,
        to: RegionRole,
        elapsed: Duration,
        policy: &FailoverPolicy,
        report: StepReport,
    ) -> FailoverResult {
        let event = FailoverEvent::new(kind, reason, &source.name, &target.name, elapsed);
        let mut warnings = report.warnings;

        {
            let mut routing = self.routing.write().await;
            routing.active_region = to;
            if kind == FailoverEventType::Failback {
                routing.last_failback_at = Some(event.timestamp);
            } else {
                routing.last_failover_at = Some(event.timestamp);
            }
            routing.consecutive_failure_count = 0;
            routing.history.push(event.clone());
            if let Err(e) = self.store.append(&event, &routing).await {
                error!("Failed to persist {} event {}: {}", kind, event.id, e);
                warnings.push(format!("routing state not persisted: {}", e));
            }
        }

        let state = ManagerState::stable_for(to);
        self.set_state(state);
        if let Some(metrics) = &self.metrics {
            metrics.consecutive_failures.set(0);
        }
        self.record_metrics(&event, to);
        self.dispatch(&event, policy).await;

        let rto_target = policy.rto_target();
        let rto_breached = elapsed > rto_target;
        if rto_breached {
            warn!(
                "{} to {} took {}s, over the RTO target of {} min",
                kind,
                target.name,
                elapsed.as_secs(),
                policy.rto_target_min
            );
        }
        info!("{} to {} completed in {}ms", kind, target.name, event.duration_ms);

        FailoverResult {
            elapsed_ms: event.duration_ms,
            event,
            state,
            rto_target_ms: rto_target.as_millis() as u64,
            rto_breached,
            replication_lag_ms: report.replication_lag.map(|lag| lag.as_millis() as u64),
            rpo_breached: report.rpo_breached,
            warnings,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn fail(
        &self,
        kind: FailoverEventType,
        reason: String,
        source: &Region,
        target: &Region,
        previous: ManagerState,
        failure: StepFailure,
        started: Instant,
        policy: &FailoverPolicy,
    ) -> FailoverError {
        error!("{} to {} failed at {}: {}", kind, target.name, failure.step, failure.cause);

        let rollback = if failure.step.touches_routing() {
            self.rollback(source).await
        } else {
            RollbackOutcome::not_needed()
        };
        let level = if rollback.attempted {
            RecoveryLevel::FullRollback
        } else {
            RecoveryLevel::ValidationOnly
        };

        let event = FailoverEvent::new(kind, reason, &source.name, &target.name, started.elapsed())
            .failed(format!("{}; rollback {}", failure.describe(), rollback))
            .with_level(level);
        self.append_event(&event).await;
        self.set_state(previous);
        let active = self.routing.read().await.active_region;
        self.record_metrics(&event, active);
        self.dispatch(&event, policy).await;

        if failure.aborted {
            FailoverError::Aborted { rollback }
        } else {
            FailoverError::PartialFailover {
                step: failure.step,
                cause: failure.cause,
                rollback,
            }
        }
    }

    /// Re-assert `original` through the traffic controller, with backoff
    async fn rollback(&self, original: &Region) -> RollbackOutcome {
        let attempts = self.options.rollback_attempts.max(1);
        let mut backoff = self.options.rollback_backoff;
        let mut last_error = None;

        for attempt in 1..=attempts {
            info!("Rolling traffic back to {} (attempt {}/{})", original.name, attempt, attempts);
            let restore = self.collaborators.traffic.set_active_region(original);
            match timeout(self.options.step_timeout, restore).await {
                Ok(Ok(())) => {
                    return RollbackOutcome {
                        attempted: true,
                        succeeded: true,
                        attempts: attempt,
                        error: None,
                    };
                }
                Ok(Err(e)) => last_error = Some(format!("{:#}", e)),
                Err(_) => {
                    last_error = Some(format!("timed out after {:?}", self.options.step_timeout))
                }
            }
            warn!(
                "Rollback attempt {} to {} failed: {}",
                attempt,
                original.name,
                last_error.as_deref().unwrap_or("")
            );
            if attempt < attempts {
                sleep(backoff).await;
                backoff *= 2;
            }
        }

        error!(
            "Rollback to {} failed after {} attempts; routing needs operator attention",
            original.name, attempts
        );
        RollbackOutcome {
            attempted: true,
            succeeded: false,
            attempts,
            error: last_error,
        }
    }

    /// Run one step under the step timeout, racing operator abort
    async fn guarded<T>(
        &self,
        step: TransitionStep,
        token: &CancellationToken,
        work: impl Future<Output = anyhow::Result<T>>,
    ) -> std::result::Result<T, StepFailure> {
        debug!("Running step: {}", step);
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(StepFailure::aborted(step)),
            outcome = timeout(self.options.step_timeout, work) => match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(StepFailure::failed(step, format!("{:#}", e))),
                Err(_) => Err(StepFailure::failed(
                    step,
                    format!("timed out after {:?}", self.options.step_timeout),
                )),
            },
        }
    }

    fn acquire(&self) -> Result<MutexGuard<'_, ()>> {
        self.transition.try_lock().map_err(|_| {
            let state = self.state();
            warn!("Rejecting request: a transition is already running ({})", state);
            FailoverError::ConcurrentTransition(state)
        })
    }

    fn validate_reason(reason: &str) -> Result<String> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(FailoverError::InvalidRequest("a reason is required".to_string()));
        }
        Ok(reason.to_string())
    }

    fn set_state(&self, state: ManagerState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("State {} -> {}", previous, state);
        }
    }

    async fn arm_cancellation(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock().await = Some(token.clone());
        token
    }

    async fn disarm_cancellation(&self) {
        self.cancel.lock().await.take();
    }

    async fn remember(&self, snapshot: &HealthSnapshot) {
        if let Some(history) = self.snapshots.write().await.get_mut(&snapshot.region) {
            history.push(snapshot.clone());
        }
    }

    async fn append_event(&self, event: &FailoverEvent) {
        let mut routing = self.routing.write().await;
        routing.history.push(event.clone());
        if let Err(e) = self.store.append(event, &routing).await {
            error!("Failed to persist {} event {}: {}", event.event_type, event.id, e);
        }
    }

    fn record_metrics(&self, event: &FailoverEvent, active: RegionRole) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        let outcome = if event.success { "success" } else { "failure" };
        metrics
            .transitions_total
            .with_label_values(&[event.event_type.as_str(), outcome])
            .inc();
        metrics
            .transition_duration
            .with_label_values(&[event.event_type.as_str()])
            .observe(event.duration_ms as f64 / 1000.0);
        let names: Vec<&str> = self.regions.iter().map(|r| r.name.as_str()).collect();
        metrics.set_active_region(&self.regions.get(active).name, &names);
    }

    /// Deliver `event` to every sink on a spawned task so delivery never
    /// holds up the transition. Finished deliveries are reaped here.
    async fn dispatch(&self, event: &FailoverEvent, policy: &FailoverPolicy) {
        let mut pending = self.notifications.lock().await;
        while pending.try_join_next().is_some() {}

        for sink in &self.collaborators.notifiers {
            let sink = Arc::clone(sink);
            let event = event.clone();
            let endpoints = policy.notification_endpoints.clone();
            let limit = self.options.notify_timeout;
            pending.spawn(async move {
                match timeout(limit, sink.notify(&event, &endpoints)).await {
                    Ok(Ok(())) => debug!("Notification for event {} delivered", event.id),
                    Ok(Err(e)) => warn!("Notification for event {} failed: {:#}", event.id, e),
                    Err(_) => warn!("Notification for event {} timed out after {:?}", event.id, limit),
                }
            });
        }
    }

    /// Wait for in-flight notifications to finish, returning how many were
    /// awaited. Each delivery is already bounded by the notify timeout.
    pub async fn flush_notifications(&self) -> usize {
        let mut pending = std::mem::take(&mut *self.notifications.lock().await);
        let mut flushed = 0;
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                warn!("Notification task did not complete: {}", e);
            }
            flushed += 1;
        }
        if flushed > 0 {
            debug!("Flushed {} pending notification(s)", flushed);
        }
        flushed
    }
}
