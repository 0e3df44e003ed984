use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use regionguard_common::{
    HealthSettings, HealthSnapshot, Region, RegionGuardConfig, RegionGuardMetrics, ServiceHealth,
    ServiceKind,
};
use reqwest::Client;
use thiserror::Error;
use tokio::time::{timeout, timeout_at};
use tracing::{debug, instrument, warn};

use crate::probe::{default_probes, ProbeError, ServiceProbe};

#[derive(Error, Debug)]
pub enum HealthError {
    #[error("region {region}: {service} probe misconfigured: {reason}")]
    Misconfigured {
        region: String,
        service: ServiceKind,
        reason: String,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Probes every configured region and aggregates per-service results
pub struct HealthChecker {
    regions: Vec<Region>,
    probes: Vec<Arc<dyn ServiceProbe>>,
    probe_timeout: Duration,
    global_timeout: Duration,
    metrics: Option<Arc<RegionGuardMetrics>>,
}

impl HealthChecker {
    pub fn new(
        regions: Vec<Region>,
        probes: Vec<Arc<dyn ServiceProbe>>,
        settings: &HealthSettings,
    ) -> Self {
        Self {
            regions,
            probes,
            probe_timeout: settings.probe_timeout(),
            global_timeout: settings.global_timeout(),
            metrics: None,
        }
    }

    /// Checker with the standard HTTP/TCP probes for the configured regions
    pub fn from_config(config: &RegionGuardConfig) -> Result<Self, HealthError> {
        let client = Client::builder()
            .timeout(config.health.probe_timeout())
            .user_agent(concat!("regionguard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HealthError::Client(e.to_string()))?;
        Ok(Self::new(
            config.regions.clone(),
            default_probes(client, &config.health),
            &config.health,
        ))
    }

    pub fn with_metrics(mut self, metrics: Arc<RegionGuardMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Probe every service of one region concurrently.
    ///
    /// Timeouts and unreachable services become unhealthy entries in the
    /// snapshot; only a misconfigured endpoint is returned as an error.
    #[instrument(skip(self, region), fields(region = %region.name))]
    pub async fn check_region(&self, region: &Region) -> Result<HealthSnapshot, HealthError> {
        let start = Instant::now();
        let probes = self.probes.iter().filter(|probe| probe.applies_to(region));

        let outcomes = join_all(probes.map(|probe| async move {
            let started = Instant::now();
            let outcome = match timeout(self.probe_timeout, probe.probe(region)).await {
                Ok(Ok(health)) => Ok(health),
                Ok(Err(ProbeError::Misconfigured(reason))) => Err(reason),
                Ok(Err(ProbeError::Timeout(after))) => {
                    warn!("{} probe for {} timed out", probe.service(), region.name);
                    Ok(ServiceHealth::timeout(after))
                }
                Ok(Err(e @ ProbeError::Unreachable(_))) => {
                    warn!("{} probe for {} failed: {}", probe.service(), region.name, e);
                    Ok(ServiceHealth::unhealthy(started.elapsed(), e.to_string()))
                }
                Err(_) => {
                    warn!(
                        "{} probe for {} exceeded {:?}",
                        probe.service(),
                        region.name,
                        self.probe_timeout
                    );
                    Ok(ServiceHealth::timeout(self.probe_timeout))
                }
            };
            (probe.service(), outcome)
        }))
        .await;

        let mut services = BTreeMap::new();
        for (service, outcome) in outcomes {
            let health = outcome.map_err(|reason| HealthError::Misconfigured {
                region: region.name.clone(),
                service,
                reason,
            })?;
            if !health.status.is_healthy() {
                if let Some(metrics) = &self.metrics {
                    metrics
                        .probe_failures_total
                        .with_label_values(&[region.name.as_str(), service.as_str()])
                        .inc();
                }
            }
            services.insert(service, health);
        }

        let snapshot = HealthSnapshot::from_services(&region.name, services, start.elapsed());
        debug!(
            "Region {} is {} ({}ms)",
            region.name, snapshot.status, snapshot.latency_ms
        );
        Ok(snapshot)
    }

    /// Check every configured region against one global deadline.
    ///
    /// Regions that miss the deadline are reported unhealthy with the
    /// `timed_out` marker instead of being omitted.
    #[instrument(skip(self))]
    pub async fn check_all_services(
        &self,
    ) -> Result<BTreeMap<String, HealthSnapshot>, HealthError> {
        let deadline = tokio::time::Instant::now() + self.global_timeout;

        let checks = self.regions.iter().map(|region| async move {
            match timeout_at(deadline, self.check_region(region)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        "Region {} did not respond within {:?}",
                        region.name, self.global_timeout
                    );
                    Ok(HealthSnapshot::timed_out(&region.name, self.global_timeout))
                }
            }
        });

        let mut snapshots = BTreeMap::new();
        for result in join_all(checks).await {
            let snapshot = result?;
            snapshots.insert(snapshot.region.clone(), snapshot);
        }
        Ok(snapshots)
    }
}
