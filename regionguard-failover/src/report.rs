use chrono::{DateTime, Utc};
use regionguard_common::{FailoverPolicy, RegionRole};
use serde::{Deserialize, Serialize};

use crate::state::{FailoverEventType, ManagerState, RoutingState};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCounts {
    pub manual: usize,
    pub automatic: usize,
    pub failback: usize,
    pub dr_test: usize,
}

/// Read-only summary over the routing history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverReport {
    pub generated_at: DateTime<Utc>,
    pub current_state: ManagerState,
    pub active_region: String,
    pub active_role: RegionRole,
    pub consecutive_failure_count: u32,
    pub last_failover_at: Option<DateTime<Utc>>,
    pub last_failback_at: Option<DateTime<Utc>>,
    pub total_events: usize,
    pub counts: EventCounts,
    pub successful: usize,
    pub failed: usize,
    pub average_failover_ms: Option<f64>,
    pub average_failback_ms: Option<f64>,
    /// Duration of the most recent successful failover
    pub last_failover_ms: Option<u64>,
    pub policy: FailoverPolicy,
}

impl FailoverReport {
    pub fn build(
        routing: &RoutingState,
        current_state: ManagerState,
        active_region: &str,
        policy: &FailoverPolicy,
    ) -> Self {
        let mut counts = EventCounts::default();
        for event in &routing.history {
            match event.event_type {
                FailoverEventType::Manual => counts.manual += 1,
                FailoverEventType::Automatic => counts.automatic += 1,
                FailoverEventType::Failback => counts.failback += 1,
                FailoverEventType::DrTest => counts.dr_test += 1,
            }
        }
        let successful = routing.history.iter().filter(|e| e.success).count();

        Self {
            generated_at: Utc::now(),
            current_state,
            active_region: active_region.to_string(),
            active_role: routing.active_region,
            consecutive_failure_count: routing.consecutive_failure_count,
            last_failover_at: routing.last_failover_at,
            last_failback_at: routing.last_failback_at,
            total_events: routing.history.len(),
            counts,
            successful,
            failed: routing.history.len() - successful,
            average_failover_ms: routing.mean_duration_ms(FailoverEventType::is_failover),
            average_failback_ms: routing
                .mean_duration_ms(|t| t == FailoverEventType::Failback),
            last_failover_ms: routing
                .history
                .iter()
                .rev()
                .find(|e| e.success && e.event_type.is_failover())
                .map(|e| e.duration_ms),
            policy: policy.clone(),
        }
    }
}
