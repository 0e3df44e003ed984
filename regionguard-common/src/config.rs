use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RegionGuardError, Result};
use crate::policy::FailoverPolicy;
use crate::types::{Region, RegionPair, DEFAULT_HISTORY_CAPACITY, DEFAULT_PROBE_TIMEOUT};

/// Prefix for environment overrides, e.g. `REGIONGUARD__POLICY__AUTOMATIC_FAILOVER=true`
pub const ENV_PREFIX: &str = "REGIONGUARD";

/// Top-level configuration, loaded once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionGuardConfig {
    /// Exactly one primary and one secondary region
    pub regions: Vec<Region>,

    #[serde(default)]
    pub policy: FailoverPolicy,

    #[serde(default)]
    pub health: HealthSettings,

    #[serde(default)]
    pub failover: FailoverSettings,

    #[serde(default)]
    pub collaborators: CollaboratorSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

/// Probe timing and snapshot retention
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    /// Timeout for a single service probe
    pub probe_timeout_ms: u64,

    /// Deadline for a whole `check_all_services` round
    pub global_timeout_ms: u64,

    /// Snapshots retained per region
    pub history_capacity: usize,

    /// Database connects slower than this are reported degraded
    pub slow_probe_ms: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT.as_millis() as u64,
            global_timeout_ms: 30_000,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            slow_probe_ms: 2_000,
        }
    }
}

impl HealthSettings {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn global_timeout(&self) -> Duration {
        Duration::from_millis(self.global_timeout_ms)
    }

    pub fn slow_probe(&self) -> Duration {
        Duration::from_millis(self.slow_probe_ms)
    }
}

/// Timing of the transition steps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverSettings {
    /// Timeout applied to each failover/failback step
    pub step_timeout_ms: u64,

    /// Attempts to re-assert the original region after a failed cutover
    pub rollback_attempts: u32,

    /// Initial delay between rollback attempts, doubled each retry
    pub rollback_backoff_ms: u64,

    /// Assumed cutover time when no failover has been measured yet
    pub cutover_estimate_ms: u64,

    /// Upper bound on a single notification delivery
    pub notify_timeout_ms: u64,
}

impl Default for FailoverSettings {
    fn default() -> Self {
        Self {
            step_timeout_ms: 30_000,
            rollback_attempts: 3,
            rollback_backoff_ms: 500,
            cutover_estimate_ms: 60_000,
            notify_timeout_ms: 5_000,
        }
    }
}

impl FailoverSettings {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn rollback_backoff(&self) -> Duration {
        Duration::from_millis(self.rollback_backoff_ms)
    }

    pub fn cutover_estimate(&self) -> Duration {
        Duration::from_millis(self.cutover_estimate_ms)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }
}

/// Where the external traffic and replication services live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorSettings {
    /// Base URL of the traffic-control service (DNS failover routing)
    pub traffic_control_url: String,

    /// Base URL of the replication-status service
    pub replication_status_url: String,

    /// HTTP timeout for collaborator calls
    pub request_timeout_ms: u64,
}

impl Default for CollaboratorSettings {
    fn default() -> Self {
        Self {
            traffic_control_url: "http://localhost:8470".to_string(),
            replication_status_url: "http://localhost:8471".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl CollaboratorSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Durable routing state location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub state_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/regionguard"),
        }
    }
}

impl RegionGuardConfig {
    /// Load from a TOML file with `REGIONGUARD__*` environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RegionGuardError::Config(format!(
                "configuration file {} does not exist",
                path.display()
            )));
        }

        let config = Config::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let loaded: RegionGuardConfig = config.try_deserialize()?;
        loaded.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(loaded)
    }

    /// Parse a TOML document directly, without environment overrides
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(contents, config::FileFormat::Toml))
            .build()?;
        let loaded: RegionGuardConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        let pair = self.region_pair()?;
        for region in pair.iter() {
            if region.endpoints.api_base_url.is_empty() {
                return Err(RegionGuardError::InvalidRegion(format!(
                    "region {} has no api_base_url",
                    region.name
                )));
            }
            if region.endpoints.database_address.is_empty() {
                return Err(RegionGuardError::InvalidRegion(format!(
                    "region {} has no database_address",
                    region.name
                )));
            }
        }
        self.policy.validate()?;
        if self.health.probe_timeout_ms == 0 || self.health.global_timeout_ms == 0 {
            return Err(RegionGuardError::Config("health timeouts must be non-zero".to_string()));
        }
        if self.health.history_capacity == 0 {
            return Err(RegionGuardError::Config("history_capacity must be at least 1".to_string()));
        }
        if self.failover.step_timeout_ms == 0 {
            return Err(RegionGuardError::Config("step_timeout_ms must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn region_pair(&self) -> Result<RegionPair> {
        RegionPair::from_regions(&self.regions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[[regions]]
name = "east"
role = "primary"
code = "us-east-1"
[regions.endpoints]
api_base_url = "https://api.east.example.com"
database_address = "db.east.example.com:5432"
cdn_url = "https://cdn.example.com"

[[regions]]
name = "west"
role = "secondary"
code = "us-west-2"
[regions.endpoints]
api_base_url = "https://api.west.example.com"
database_address = "db.west.example.com:5432"

[policy]
automatic_failover = true
health_check_failure_threshold = 4

[health]
probe_timeout_ms = 2500
"#;

    #[test]
    fn test_parse_sample() {
        let config = RegionGuardConfig::from_toml_str(SAMPLE).unwrap();
        let pair = config.region_pair().unwrap();
        assert_eq!(pair.primary().code, "us-east-1");
        assert_eq!(pair.secondary().endpoints.cdn_url, None);
        assert!(config.policy.automatic_failover);
        assert_eq!(config.policy.health_check_failure_threshold, 4);
        assert_eq!(config.health.probe_timeout(), Duration::from_millis(2500));
        assert_eq!(config.health.history_capacity, DEFAULT_HISTORY_CAPACITY);
        assert_eq!(config.failover.rollback_attempts, 3);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = RegionGuardConfig::load(file.path()).unwrap();
        assert_eq!(config.regions.len(), 2);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = RegionGuardConfig::load("/nonexistent/regionguard.toml").unwrap_err();
        assert!(matches!(err, RegionGuardError::Config(_)));
    }

    #[test]
    fn test_single_region_rejected() {
        let single = SAMPLE.split("[[regions]]\nname = \"west\"").next().unwrap();
        assert!(RegionGuardConfig::from_toml_str(single).is_err());
    }
}
