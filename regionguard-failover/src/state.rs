use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regionguard_common::RegionRole;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// States of the failover state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    StablePrimary,
    StableSecondary,
    FailingOver,
    FailingBack,
    DrTestRunning,
}

impl ManagerState {
    /// Stable state for traffic served by `role`
    pub fn stable_for(role: RegionRole) -> Self {
        match role {
            RegionRole::Primary => ManagerState::StablePrimary,
            RegionRole::Secondary => ManagerState::StableSecondary,
        }
    }

    pub fn is_stable(self) -> bool {
        matches!(self, ManagerState::StablePrimary | ManagerState::StableSecondary)
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ManagerState::StablePrimary => "STABLE_PRIMARY",
            ManagerState::StableSecondary => "STABLE_SECONDARY",
            ManagerState::FailingOver => "FAILING_OVER",
            ManagerState::FailingBack => "FAILING_BACK",
            ManagerState::DrTestRunning => "DR_TEST_RUNNING",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverEventType {
    Manual,
    Automatic,
    Failback,
    DrTest,
}

impl FailoverEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            FailoverEventType::Manual => "manual",
            FailoverEventType::Automatic => "automatic",
            FailoverEventType::Failback => "failback",
            FailoverEventType::DrTest => "dr_test",
        }
    }

    /// Manual and automatic events both move traffic to the secondary
    pub fn is_failover(self) -> bool {
        matches!(self, FailoverEventType::Manual | FailoverEventType::Automatic)
    }
}

impl fmt::Display for FailoverEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Escalation tier a transition reached.
///
/// The operational runbook distinguishes a validation-only pass, a traffic
/// reroute and a full rollback; each recorded event carries the tier that was
/// actually exercised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryLevel {
    /// Checks ran, routing was never touched
    ValidationOnly,
    /// Traffic was moved to the target region
    TrafficReroute,
    /// A cutover was issued and then reverted
    FullRollback,
}

/// Immutable audit record of one state-machine transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: FailoverEventType,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub from_region: String,
    pub to_region: String,
    pub success: bool,
    pub duration_ms: u64,
    pub recovery_level: RecoveryLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FailoverEvent {
    pub fn new(
        event_type: FailoverEventType,
        reason: impl Into<String>,
        from_region: impl Into<String>,
        to_region: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            timestamp: Utc::now(),
            reason: reason.into(),
            from_region: from_region.into(),
            to_region: to_region.into(),
            success: true,
            duration_ms: duration.as_millis() as u64,
            recovery_level: RecoveryLevel::TrafficReroute,
            error: None,
        }
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    pub fn with_level(mut self, level: RecoveryLevel) -> Self {
        self.recovery_level = level;
        self
    }
}

/// The single piece of mutable shared state, owned by the failover manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingState {
    pub active_region: RegionRole,
    pub last_failover_at: Option<DateTime<Utc>>,
    pub last_failback_at: Option<DateTime<Utc>>,
    pub consecutive_failure_count: u32,
    pub history: Vec<FailoverEvent>,
}

impl Default for RoutingState {
    fn default() -> Self {
        Self {
            active_region: RegionRole::Primary,
            last_failover_at: None,
            last_failback_at: None,
            consecutive_failure_count: 0,
            history: Vec::new(),
        }
    }
}

impl RoutingState {
    pub fn manager_state(&self) -> ManagerState {
        ManagerState::stable_for(self.active_region)
    }

    /// Mean duration of successful events matching `filter`
    pub fn mean_duration_ms(&self, filter: impl Fn(FailoverEventType) -> bool) -> Option<f64> {
        let durations: Vec<u64> = self
            .history
            .iter()
            .filter(|e| e.success && filter(e.event_type))
            .map(|e| e.duration_ms)
            .collect();
        if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<u64>() as f64 / durations.len() as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_shape() {
        let event = FailoverEvent::new(
            FailoverEventType::DrTest,
            "weekly drill",
            "east",
            "west",
            Duration::from_millis(1500),
        )
        .with_level(RecoveryLevel::ValidationOnly);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "dr_test");
        assert_eq!(json["fromRegion"], "east");
        assert_eq!(json["durationMs"], 1500);
        assert_eq!(json["recoveryLevel"], "validation_only");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_mean_duration_ignores_failures() {
        let mut state = RoutingState::default();
        state.history.push(FailoverEvent::new(
            FailoverEventType::Manual,
            "a",
            "east",
            "west",
            Duration::from_millis(100),
        ));
        state.history.push(
            FailoverEvent::new(FailoverEventType::Automatic, "b", "east", "west", Duration::from_millis(900))
                .failed("dns"),
        );
        state.history.push(FailoverEvent::new(
            FailoverEventType::Automatic,
            "c",
            "east",
            "west",
            Duration::from_millis(300),
        ));
        assert_eq!(state.mean_duration_ms(FailoverEventType::is_failover), Some(200.0));
        assert_eq!(state.mean_duration_ms(|t| t == FailoverEventType::Failback), None);
    }

    #[test]
    fn test_stable_state_follows_active_region() {
        let mut state = RoutingState::default();
        assert_eq!(state.manager_state(), ManagerState::StablePrimary);
        state.active_region = RegionRole::Secondary;
        assert_eq!(state.manager_state(), ManagerState::StableSecondary);
        assert!(!ManagerState::FailingOver.is_stable());
    }
}
