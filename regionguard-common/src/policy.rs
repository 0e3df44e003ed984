use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RegionGuardError, Result};

/// Upper bound for RTO and RPO targets, one week in minutes
pub const MAX_TARGET_MIN: u64 = 7 * 24 * 60;

/// Failover policy read by the manager on every evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FailoverPolicy {
    /// Fail over without an operator when the failure threshold is reached
    #[serde(alias = "automatic_failover")]
    pub automatic_failover: bool,

    /// Consecutive unhealthy snapshots of the active region before failover
    #[serde(alias = "health_check_failure_threshold")]
    pub health_check_failure_threshold: u32,

    /// Seconds between scheduled evaluation cycles
    #[serde(alias = "health_check_interval_sec")]
    pub health_check_interval_sec: u64,

    /// Recovery Time Objective in minutes
    #[serde(alias = "rto_target_min")]
    pub rto_target_min: u64,

    /// Recovery Point Objective in minutes
    #[serde(alias = "rpo_target_min")]
    pub rpo_target_min: u64,

    /// Webhook URLs notified of transitions and failed DR tests
    #[serde(alias = "notification_endpoints")]
    pub notification_endpoints: Vec<String>,
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self {
            automatic_failover: false,
            health_check_failure_threshold: 3,
            health_check_interval_sec: 30,
            rto_target_min: 15,
            rpo_target_min: 5,
            notification_endpoints: Vec::new(),
        }
    }
}

impl FailoverPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.health_check_failure_threshold == 0 {
            return Err(RegionGuardError::Config(
                "healthCheckFailureThreshold must be at least 1".to_string(),
            ));
        }
        if self.health_check_interval_sec == 0 {
            return Err(RegionGuardError::Config(
                "healthCheckIntervalSec must be at least 1".to_string(),
            ));
        }
        if self.rto_target_min == 0 {
            return Err(RegionGuardError::Config("rtoTargetMin must be at least 1".to_string()));
        }
        if self.rto_target_min > MAX_TARGET_MIN {
            return Err(RegionGuardError::Config(format!(
                "rtoTargetMin must be at most {}",
                MAX_TARGET_MIN
            )));
        }
        if self.rpo_target_min > MAX_TARGET_MIN {
            return Err(RegionGuardError::Config(format!(
                "rpoTargetMin must be at most {}",
                MAX_TARGET_MIN
            )));
        }
        if let Some(bad) = self
            .notification_endpoints
            .iter()
            .find(|e| !(e.starts_with("http://") || e.starts_with("https://")))
        {
            return Err(RegionGuardError::Config(format!(
                "notification endpoint {} is not an http(s) URL",
                bad
            )));
        }
        Ok(())
    }

    pub fn rto_target(&self) -> Duration {
        Duration::from_secs(self.rto_target_min.saturating_mul(60))
    }

    pub fn rpo_target(&self) -> Duration {
        Duration::from_secs(self.rpo_target_min.saturating_mul(60))
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        let policy = FailoverPolicy::default();
        policy.validate().unwrap();
        assert!(!policy.automatic_failover);
        assert_eq!(policy.rto_target(), Duration::from_secs(900));
        assert_eq!(policy.rpo_target(), Duration::from_secs(300));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let policy = FailoverPolicy {
            health_check_failure_threshold: 0,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_targets_beyond_one_week_rejected() {
        let policy = FailoverPolicy {
            rto_target_min: u64::MAX / 30,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
        assert_eq!(policy.rto_target(), Duration::from_secs(u64::MAX));

        let policy = FailoverPolicy {
            rpo_target_min: MAX_TARGET_MIN + 1,
            ..Default::default()
        };
        assert!(policy.validate().is_err());

        let policy = FailoverPolicy {
            rto_target_min: MAX_TARGET_MIN,
            rpo_target_min: MAX_TARGET_MIN,
            ..Default::default()
        };
        policy.validate().unwrap();
    }

    #[test]
    fn test_accepts_snake_case_keys() {
        let policy: FailoverPolicy = serde_json::from_str(
            r#"{"automatic_failover": true, "health_check_failure_threshold": 5}"#,
        )
        .unwrap();
        assert!(policy.automatic_failover);
        assert_eq!(policy.health_check_failure_threshold, 5);
        assert_eq!(policy.rpo_target_min, 5);
    }
}
