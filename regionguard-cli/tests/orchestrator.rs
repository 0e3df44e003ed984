//! Evaluation-cycle scenarios against in-memory collaborators

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regionguard_cli::{Orchestrator, RunOptions, Verdict, DR_SUITE, HEALTH_SUITE, PERFORMANCE_SUITE};
use regionguard_common::{
    FailoverPolicy, HealthSettings, HealthStatus, Region, RegionEndpoints, RegionPair, RegionRole,
    ServiceHealth, ServiceKind,
};
use regionguard_failover::{
    Collaborators, FailoverEvent, FailoverEventType, FailoverManager, ManagerOptions,
    ManagerState, MemoryStateStore, NotificationSink, ReplicationMonitor, TrafficController,
};
use regionguard_health::{HealthChecker, ProbeError, ServiceProbe};

#[derive(Clone, Copy)]
enum Scripted {
    Status(HealthStatus),
    Misconfigured,
}

/// Database probe whose answer per region can be changed between cycles
#[derive(Default)]
struct DatabaseProbe {
    script: Mutex<HashMap<String, Scripted>>,
}

impl DatabaseProbe {
    fn set(&self, region: &str, script: Scripted) {
        self.script.lock().unwrap().insert(region.to_string(), script);
    }
}

#[async_trait]
impl ServiceProbe for DatabaseProbe {
    fn service(&self) -> ServiceKind {
        ServiceKind::Database
    }

    async fn probe(&self, region: &Region) -> Result<ServiceHealth, ProbeError> {
        let script = self.script.lock().unwrap().get(&region.name).copied();
        match script {
            Some(Scripted::Status(status)) => Ok(ServiceHealth::new(status, Duration::from_millis(4))),
            Some(Scripted::Misconfigured) => Err(ProbeError::Misconfigured(
                "database_address has no port".to_string(),
            )),
            None => Ok(ServiceHealth::new(HealthStatus::Healthy, Duration::from_millis(4))),
        }
    }
}

#[derive(Default)]
struct RecordingTraffic {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl TrafficController for RecordingTraffic {
    async fn set_active_region(&self, region: &Region) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(region.name.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<FailoverEventType>>,
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, event: &FailoverEvent, _endpoints: &[String]) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.event_type);
        Ok(())
    }
}

struct FixedLag(Duration);

#[async_trait]
impl ReplicationMonitor for FixedLag {
    async fn replication_lag(&self, _from: &Region, _to: &Region) -> anyhow::Result<Duration> {
        Ok(self.0)
    }
}

fn region(name: &str, role: RegionRole) -> Region {
    Region {
        name: name.to_string(),
        role,
        code: format!("{}-1", name),
        endpoints: RegionEndpoints {
            api_base_url: format!("https://api.{}.example.com", name),
            database_address: format!("db.{}.example.com:5432", name),
            ..Default::default()
        },
    }
}

struct Setup {
    orchestrator: Orchestrator,
    probe: Arc<DatabaseProbe>,
    traffic: Arc<RecordingTraffic>,
    notifier: Arc<RecordingNotifier>,
}

async fn setup(policy: FailoverPolicy) -> Setup {
    let east = region("east", RegionRole::Primary);
    let west = region("west", RegionRole::Secondary);
    let probe = Arc::new(DatabaseProbe::default());
    let settings = HealthSettings {
        probe_timeout_ms: 200,
        global_timeout_ms: 1000,
        ..Default::default()
    };
    let checker = Arc::new(HealthChecker::new(
        vec![east.clone(), west.clone()],
        vec![probe.clone() as Arc<dyn ServiceProbe>],
        &settings,
    ));

    let traffic = Arc::new(RecordingTraffic::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let collaborators = Collaborators {
        traffic: traffic.clone(),
        replication: Arc::new(FixedLag(Duration::from_millis(800))),
        notifiers: vec![notifier.clone() as Arc<dyn NotificationSink>],
    };
    let manager = FailoverManager::new(
        RegionPair::new(east, west).unwrap(),
        policy,
        Arc::clone(&checker),
        collaborators,
        Arc::new(MemoryStateStore::new()),
        ManagerOptions {
            step_timeout: Duration::from_secs(2),
            rollback_backoff: Duration::from_millis(10),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    Setup {
        orchestrator: Orchestrator::new(checker, Arc::new(manager)),
        probe,
        traffic,
        notifier,
    }
}

fn policy(automatic_failover: bool) -> FailoverPolicy {
    FailoverPolicy {
        automatic_failover,
        health_check_failure_threshold: 3,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_healthy_cycle_passes() {
    let s = setup(policy(false)).await;
    let report = s.orchestrator.run_evaluation_cycle(&RunOptions::default()).await;

    assert_eq!(report.overall_result, Verdict::Pass);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.test_suites.len(), 3);
    assert!(!report.suite(DR_SUITE).unwrap().skipped);
    assert!(report.failover_validation.dr_test.as_ref().unwrap().success);
    assert_eq!(report.performance_metrics.rpo_observed_ms, Some(800));
    assert!(report.recommendations.is_empty());
    assert_eq!(report.failover_validation.state, ManagerState::StablePrimary);
}

#[tokio::test]
async fn test_repeated_healthy_cycles_stay_quiet() {
    let s = setup(policy(false)).await;
    for _ in 0..5 {
        let report = s.orchestrator.run_evaluation_cycle(&RunOptions::default()).await;
        assert_eq!(report.overall_result, Verdict::Pass);
        assert!(report.performance_metrics.last_failover_ms.is_none());
    }

    let manager = s.orchestrator.manager();
    assert_eq!(manager.flush_notifications().await, 0);
    assert!(s.notifier.events.lock().unwrap().is_empty());
    assert_eq!(manager.generate_failover_report().await.counts.dr_test, 5);
}

#[tokio::test]
async fn test_automatic_failover_after_threshold() {
    let s = setup(policy(true)).await;
    s.probe.set("east", Scripted::Status(HealthStatus::Unhealthy));
    let options = RunOptions { skip_e2e: true };

    for cycle in 1..=2 {
        let report = s.orchestrator.run_evaluation_cycle(&options).await;
        assert_eq!(report.failover_validation.consecutive_failures, cycle);
        assert!(!report.failover_validation.automatic_failover_triggered);
        assert_eq!(report.overall_result, Verdict::Fail);
    }

    let report = s.orchestrator.run_evaluation_cycle(&options).await;
    assert!(report.failover_validation.automatic_failover_triggered);
    assert_eq!(report.failover_validation.active_region, "west");
    assert_eq!(report.failover_validation.state, ManagerState::StableSecondary);
    let failover = report.failover_validation.failover.as_ref().unwrap();
    assert_eq!(failover.event.event_type, FailoverEventType::Automatic);
    assert_eq!(*s.traffic.calls.lock().unwrap(), vec!["west"]);

    let manager = s.orchestrator.manager();
    manager.flush_notifications().await;
    assert_eq!(*s.notifier.events.lock().unwrap(), vec![FailoverEventType::Automatic]);
    assert_eq!(manager.active_region().await.name, "west");
    assert_eq!(manager.routing_state().await.consecutive_failure_count, 0);
}

#[tokio::test]
async fn test_threshold_without_automatic_failover_recommends() {
    let s = setup(policy(false)).await;
    s.probe.set("east", Scripted::Status(HealthStatus::Unhealthy));
    let options = RunOptions { skip_e2e: true };

    let mut report = s.orchestrator.run_evaluation_cycle(&options).await;
    for _ in 0..2 {
        report = s.orchestrator.run_evaluation_cycle(&options).await;
    }

    assert!(!report.failover_validation.automatic_failover_triggered);
    assert_eq!(report.failover_validation.active_region, "east");
    assert!(report
        .recommendations
        .iter()
        .any(|r| r.contains("manual failover")));
    assert!(s.traffic.calls.lock().unwrap().is_empty());
    assert!(s.orchestrator.manager().routing_state().await.history.is_empty());
}

#[tokio::test]
async fn test_suite_errors_do_not_abort_cycle() {
    let s = setup(policy(false)).await;
    s.probe.set("west", Scripted::Misconfigured);

    let report = s.orchestrator.run_evaluation_cycle(&RunOptions::default()).await;
    assert_eq!(report.overall_result, Verdict::Fail);
    assert_eq!(report.exit_code(), 1);

    let health = report.suite(HEALTH_SUITE).unwrap();
    assert_eq!(health.status, Verdict::Fail);
    assert_eq!(health.cases[0].name, "check_all_services");

    let dr = report.suite(DR_SUITE).unwrap();
    assert!(!dr.skipped);
    assert_eq!(dr.status, Verdict::Fail);
    assert!(report.suite(PERFORMANCE_SUITE).is_some());
}

#[tokio::test]
async fn test_degraded_standby_warns() {
    let s = setup(policy(false)).await;
    s.probe.set("west", Scripted::Status(HealthStatus::Degraded));

    let report = s.orchestrator.run_evaluation_cycle(&RunOptions { skip_e2e: true }).await;
    assert_eq!(report.overall_result, Verdict::Warning);
    assert_eq!(report.exit_code(), 0);
    assert!(report.suite(DR_SUITE).unwrap().skipped);
}

#[tokio::test]
async fn test_healthy_primary_after_failover_suggests_failback() {
    let s = setup(policy(false)).await;
    s.orchestrator
        .manager()
        .execute_manual_failover("maintenance")
        .await
        .unwrap();

    let report = s.orchestrator.run_evaluation_cycle(&RunOptions { skip_e2e: true }).await;
    assert!(report.recommendations.iter().any(|r| r.contains("failing back")));
    assert!(report.performance_metrics.last_failover_ms.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_loop_stops_on_shutdown() {
    let s = setup(policy(false)).await;
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let reports = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&reports);

    let stopper = tokio::spawn(async move {
        // First tick fires at once, the second after the 30s policy interval
        tokio::time::sleep(Duration::from_secs(45)).await;
        shutdown_tx.send(()).unwrap();
    });

    s.orchestrator
        .run_scheduled(RunOptions { skip_e2e: true }, shutdown_rx, move |_| {
            *counter.lock().unwrap() += 1;
        })
        .await
        .unwrap();
    stopper.await.unwrap();

    assert_eq!(*reports.lock().unwrap(), 2);
}
