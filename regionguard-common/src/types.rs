use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RegionGuardError, Result};

/// Per-probe timeout used when the configuration does not override it
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of snapshots kept per region for trend detection
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// Role a region plays in the deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionRole {
    Primary,
    Secondary,
}

impl RegionRole {
    /// The opposite role in a primary/secondary pair
    pub fn other(self) -> Self {
        match self {
            RegionRole::Primary => RegionRole::Secondary,
            RegionRole::Secondary => RegionRole::Primary,
        }
    }
}

impl fmt::Display for RegionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionRole::Primary => write!(f, "primary"),
            RegionRole::Secondary => write!(f, "secondary"),
        }
    }
}

/// Endpoints used to probe and steer a region
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionEndpoints {
    /// API base URL; `/health` is appended when probing
    pub api_base_url: String,

    /// Database connection target (`host:port`)
    pub database_address: String,

    /// Managed database cluster identifier
    #[serde(default)]
    pub database_cluster_id: Option<String>,

    /// CDN distribution URL; no CDN probe when absent
    #[serde(default)]
    pub cdn_url: Option<String>,

    /// DNS health-check identifier handed to the traffic controller
    #[serde(default)]
    pub dns_health_check_id: Option<String>,
}

/// A named deployment target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub role: RegionRole,
    /// Cloud region code, e.g. "us-east-1"
    pub code: String,
    pub endpoints: RegionEndpoints,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.code)
    }
}

/// The configured primary and secondary regions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionPair {
    primary: Region,
    secondary: Region,
}

impl RegionPair {
    pub fn new(primary: Region, secondary: Region) -> Result<Self> {
        if primary.role != RegionRole::Primary {
            return Err(RegionGuardError::InvalidRegion(format!(
                "region {} is configured as {}, expected primary",
                primary.name, primary.role
            )));
        }
        if secondary.role != RegionRole::Secondary {
            return Err(RegionGuardError::InvalidRegion(format!(
                "region {} is configured as {}, expected secondary",
                secondary.name, secondary.role
            )));
        }
        if primary.name == secondary.name {
            return Err(RegionGuardError::InvalidRegion(format!(
                "primary and secondary share the name {}",
                primary.name
            )));
        }
        Ok(Self { primary, secondary })
    }

    /// Build a pair from an unordered list; exactly one region per role
    pub fn from_regions(regions: &[Region]) -> Result<Self> {
        let pick = |role: RegionRole| -> Result<Region> {
            let mut matching = regions.iter().filter(|r| r.role == role);
            let region = matching.next().ok_or_else(|| {
                RegionGuardError::InvalidRegion(format!("no {} region configured", role))
            })?;
            if matching.next().is_some() {
                return Err(RegionGuardError::InvalidRegion(format!(
                    "more than one {} region configured",
                    role
                )));
            }
            Ok(region.clone())
        };
        Self::new(pick(RegionRole::Primary)?, pick(RegionRole::Secondary)?)
    }

    pub fn get(&self, role: RegionRole) -> &Region {
        match role {
            RegionRole::Primary => &self.primary,
            RegionRole::Secondary => &self.secondary,
        }
    }

    pub fn primary(&self) -> &Region {
        &self.primary
    }

    pub fn secondary(&self) -> &Region {
        &self.secondary
    }

    pub fn by_name(&self, name: &str) -> Option<&Region> {
        self.iter().find(|r| r.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        [&self.primary, &self.secondary].into_iter()
    }
}

/// Services probed in every region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Api,
    Database,
    Cdn,
}

impl ServiceKind {
    /// Critical services drive a region to unhealthy on their own
    pub fn is_critical(self) -> bool {
        matches!(self, ServiceKind::Api | ServiceKind::Database)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceKind::Api => "api",
            ServiceKind::Database => "database",
            ServiceKind::Cdn => "cdn",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health status levels, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        self.max(other)
    }

    pub fn is_healthy(self) -> bool {
        self == HealthStatus::Healthy
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Outcome of probing one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub status: HealthStatus,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default)]
    pub timed_out: bool,
}

impl ServiceHealth {
    pub fn new(status: HealthStatus, latency: Duration) -> Self {
        Self {
            status,
            latency_ms: latency.as_millis() as u64,
            detail: None,
            timed_out: false,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn unhealthy(latency: Duration, detail: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unhealthy, latency).with_detail(detail)
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            latency_ms: after.as_millis() as u64,
            detail: Some(format!("probe timed out after {}ms", after.as_millis())),
            timed_out: true,
        }
    }
}

/// Point-in-time health assessment of one region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub region: String,
    pub timestamp: DateTime<Utc>,
    pub status: HealthStatus,
    pub services: BTreeMap<ServiceKind, ServiceHealth>,
    pub latency_ms: u64,
    #[serde(default)]
    pub timed_out: bool,
}

impl HealthSnapshot {
    /// Build a snapshot and derive the region status from its services
    pub fn from_services(
        region: impl Into<String>,
        services: BTreeMap<ServiceKind, ServiceHealth>,
        latency: Duration,
    ) -> Self {
        let status = aggregate_status(&services);
        Self {
            region: region.into(),
            timestamp: Utc::now(),
            status,
            services,
            latency_ms: latency.as_millis() as u64,
            timed_out: false,
        }
    }

    /// Snapshot for a region that did not answer before the deadline
    pub fn timed_out(region: impl Into<String>, after: Duration) -> Self {
        Self {
            region: region.into(),
            timestamp: Utc::now(),
            status: HealthStatus::Unhealthy,
            services: BTreeMap::new(),
            latency_ms: after.as_millis() as u64,
            timed_out: true,
        }
    }

    /// Services that are not healthy, worst first
    pub fn failing_services(&self) -> Vec<(ServiceKind, &ServiceHealth)> {
        let mut failing: Vec<_> = self
            .services
            .iter()
            .filter(|(_, health)| !health.status.is_healthy())
            .map(|(kind, health)| (*kind, health))
            .collect();
        failing.sort_by(|a, b| b.1.status.cmp(&a.1.status));
        failing
    }
}

/// Worst-of aggregation over per-service results.
///
/// A critical service that is unhealthy makes the region unhealthy. Any other
/// non-healthy service (a degraded critical service, or a non-critical service
/// in any failing state) makes it degraded.
pub fn aggregate_status(services: &BTreeMap<ServiceKind, ServiceHealth>) -> HealthStatus {
    services
        .iter()
        .map(|(kind, health)| match (kind.is_critical(), health.status) {
            (true, status) => status,
            (false, HealthStatus::Healthy) => HealthStatus::Healthy,
            (false, _) => HealthStatus::Degraded,
        })
        .fold(HealthStatus::Healthy, HealthStatus::worst)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(name: &str, role: RegionRole) -> Region {
        Region {
            name: name.to_string(),
            role,
            code: format!("{}-1", name),
            endpoints: RegionEndpoints::default(),
        }
    }

    fn services(entries: &[(ServiceKind, HealthStatus)]) -> BTreeMap<ServiceKind, ServiceHealth> {
        entries
            .iter()
            .map(|(kind, status)| (*kind, ServiceHealth::new(*status, Duration::from_millis(5))))
            .collect()
    }

    #[test]
    fn test_aggregate_all_healthy() {
        let s = services(&[
            (ServiceKind::Api, HealthStatus::Healthy),
            (ServiceKind::Database, HealthStatus::Healthy),
            (ServiceKind::Cdn, HealthStatus::Healthy),
        ]);
        assert_eq!(aggregate_status(&s), HealthStatus::Healthy);
    }

    #[test]
    fn test_aggregate_critical_unhealthy() {
        let s = services(&[
            (ServiceKind::Api, HealthStatus::Healthy),
            (ServiceKind::Database, HealthStatus::Unhealthy),
            (ServiceKind::Cdn, HealthStatus::Healthy),
        ]);
        assert_eq!(aggregate_status(&s), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_aggregate_cdn_only_degrades() {
        let s = services(&[
            (ServiceKind::Api, HealthStatus::Healthy),
            (ServiceKind::Database, HealthStatus::Healthy),
            (ServiceKind::Cdn, HealthStatus::Unhealthy),
        ]);
        assert_eq!(aggregate_status(&s), HealthStatus::Degraded);
    }

    #[test]
    fn test_region_pair_validation() {
        let pair = RegionPair::from_regions(&[
            region("west", RegionRole::Secondary),
            region("east", RegionRole::Primary),
        ])
        .unwrap();
        assert_eq!(pair.primary().name, "east");
        assert_eq!(pair.get(RegionRole::Secondary).name, "west");
        assert_eq!(pair.by_name("west").map(|r| r.role), Some(RegionRole::Secondary));

        assert!(RegionPair::from_regions(&[region("east", RegionRole::Primary)]).is_err());
        assert!(RegionPair::from_regions(&[
            region("east", RegionRole::Primary),
            region("central", RegionRole::Primary),
            region("west", RegionRole::Secondary),
        ])
        .is_err());
    }

    #[test]
    fn test_snapshot_serializes_service_keys() {
        let snapshot = HealthSnapshot::from_services(
            "east",
            services(&[(ServiceKind::Api, HealthStatus::Degraded)]),
            Duration::from_millis(12),
        );
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["services"]["api"]["status"], "degraded");
        assert_eq!(json["latencyMs"], 12);
    }
}
