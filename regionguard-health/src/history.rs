use std::collections::VecDeque;

use regionguard_common::{HealthSnapshot, HealthStatus};
use serde::Serialize;

/// Direction of a region's health over the retained window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthTrend {
    Improving,
    Stable,
    Degrading,
}

/// Bounded ring buffer of the most recent snapshots for one region
#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    capacity: usize,
    snapshots: VecDeque<HealthSnapshot>,
}

impl SnapshotHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            snapshots: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, snapshot: HealthSnapshot) {
        if self.snapshots.len() == self.capacity {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
    }

    pub fn latest(&self) -> Option<&HealthSnapshot> {
        self.snapshots.back()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &HealthSnapshot> {
        self.snapshots.iter()
    }

    /// Unhealthy snapshots at the tail of the window
    pub fn consecutive_unhealthy(&self) -> usize {
        self.snapshots
            .iter()
            .rev()
            .take_while(|s| s.status == HealthStatus::Unhealthy)
            .count()
    }

    /// Fraction of retained snapshots that were healthy
    pub fn availability(&self) -> f64 {
        if self.snapshots.is_empty() {
            return 1.0;
        }
        let healthy = self.snapshots.iter().filter(|s| s.status.is_healthy()).count();
        healthy as f64 / self.snapshots.len() as f64
    }

    /// Compares the mean severity of the older and newer halves of the window
    pub fn trend(&self) -> HealthTrend {
        if self.snapshots.len() < 2 {
            return HealthTrend::Stable;
        }
        let severity = |s: &HealthSnapshot| match s.status {
            HealthStatus::Healthy => 0.0,
            HealthStatus::Degraded => 1.0,
            HealthStatus::Unhealthy => 2.0,
        };
        let mid = self.snapshots.len() / 2;
        let mean = |items: Vec<&HealthSnapshot>| {
            items.iter().map(|s| severity(*s)).sum::<f64>() / items.len() as f64
        };
        let older = mean(self.snapshots.iter().take(mid).collect());
        let newer = mean(self.snapshots.iter().skip(mid).collect());

        if newer > older + f64::EPSILON {
            HealthTrend::Degrading
        } else if newer + f64::EPSILON < older {
            HealthTrend::Improving
        } else {
            HealthTrend::Stable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn snapshot(status: HealthStatus) -> HealthSnapshot {
        let mut s = HealthSnapshot::from_services("east", BTreeMap::new(), Default::default());
        s.status = status;
        s
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let mut history = SnapshotHistory::new(2);
        history.push(snapshot(HealthStatus::Unhealthy));
        history.push(snapshot(HealthStatus::Healthy));
        history.push(snapshot(HealthStatus::Degraded));
        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().next().unwrap().status, HealthStatus::Healthy);
        assert_eq!(history.latest().unwrap().status, HealthStatus::Degraded);
    }

    #[test]
    fn test_consecutive_unhealthy_counts_tail() {
        let mut history = SnapshotHistory::new(10);
        for status in [
            HealthStatus::Unhealthy,
            HealthStatus::Healthy,
            HealthStatus::Unhealthy,
            HealthStatus::Unhealthy,
        ] {
            history.push(snapshot(status));
        }
        assert_eq!(history.consecutive_unhealthy(), 2);
        assert_eq!(history.availability(), 0.25);
    }

    #[test]
    fn test_trend() {
        let mut history = SnapshotHistory::new(4);
        history.push(snapshot(HealthStatus::Healthy));
        history.push(snapshot(HealthStatus::Healthy));
        history.push(snapshot(HealthStatus::Degraded));
        history.push(snapshot(HealthStatus::Unhealthy));
        assert_eq!(history.trend(), HealthTrend::Degrading);

        history.push(snapshot(HealthStatus::Healthy));
        history.push(snapshot(HealthStatus::Healthy));
        assert_eq!(history.trend(), HealthTrend::Improving);
    }

    fn status_strategy() -> impl Strategy<Value = HealthStatus> {
        prop_oneof![
            Just(HealthStatus::Healthy),
            Just(HealthStatus::Degraded),
            Just(HealthStatus::Unhealthy),
        ]
    }

    proptest! {
        #[test]
        fn prop_history_stays_bounded(
            capacity in 1usize..16,
            statuses in proptest::collection::vec(status_strategy(), 0..64),
        ) {
            let mut history = SnapshotHistory::new(capacity);
            for status in &statuses {
                history.push(snapshot(*status));
            }
            prop_assert!(history.len() <= capacity);
            prop_assert_eq!(history.len(), statuses.len().min(capacity));
            prop_assert!(history.consecutive_unhealthy() <= history.len());
            if let Some(last) = statuses.last() {
                prop_assert_eq!(history.latest().map(|s| s.status), Some(*last));
            }
        }
    }
}
