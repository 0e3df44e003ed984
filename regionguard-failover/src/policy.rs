use serde::{Deserialize, Serialize};

pub use regionguard_common::FailoverPolicy;

/// Partial policy; `None` fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyUpdate {
    pub automatic_failover: Option<bool>,
    pub health_check_failure_threshold: Option<u32>,
    pub health_check_interval_sec: Option<u64>,
    pub rto_target_min: Option<u64>,
    pub rpo_target_min: Option<u64>,
    pub notification_endpoints: Option<Vec<String>>,
}

impl PolicyUpdate {
    pub fn is_empty(&self) -> bool {
        *self == PolicyUpdate::default()
    }

    /// Merge onto `base`, producing a new policy
    pub fn apply(&self, base: &FailoverPolicy) -> FailoverPolicy {
        FailoverPolicy {
            automatic_failover: self.automatic_failover.unwrap_or(base.automatic_failover),
            health_check_failure_threshold: self
                .health_check_failure_threshold
                .unwrap_or(base.health_check_failure_threshold),
            health_check_interval_sec: self
                .health_check_interval_sec
                .unwrap_or(base.health_check_interval_sec),
            rto_target_min: self.rto_target_min.unwrap_or(base.rto_target_min),
            rpo_target_min: self.rpo_target_min.unwrap_or(base.rpo_target_min),
            notification_endpoints: self
                .notification_endpoints
                .clone()
                .unwrap_or_else(|| base.notification_endpoints.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_merges_only_set_fields() {
        let base = FailoverPolicy::default();
        let update = PolicyUpdate {
            automatic_failover: Some(true),
            rto_target_min: Some(30),
            ..Default::default()
        };
        let merged = update.apply(&base);
        assert!(merged.automatic_failover);
        assert_eq!(merged.rto_target_min, 30);
        assert_eq!(merged.health_check_failure_threshold, base.health_check_failure_threshold);
        assert!(!update.is_empty());
        assert!(PolicyUpdate::default().is_empty());
    }
}
