//! Prometheus metrics for RegionGuard
//!
//! One registry is shared by the health checker and the failover manager so
//! the CLI can export everything in a single text document.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

use crate::error::{RegionGuardError, Result};

/// Histogram buckets for transition durations (in seconds)
pub const TRANSITION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0];

pub struct RegionGuardMetrics {
    registry: Registry,

    /// Transitions by kind (manual, automatic, failback, dr_test) and outcome
    pub transitions_total: IntCounterVec,

    /// Transition wall time by kind
    pub transition_duration: HistogramVec,

    /// Consecutive unhealthy snapshots of the active region
    pub consecutive_failures: IntGauge,

    /// Failed probes by region and service
    pub probe_failures_total: IntCounterVec,

    /// 1 for the region currently receiving traffic, 0 otherwise
    pub active_region: IntGaugeVec,
}

impl RegionGuardMetrics {
    pub fn new(component: &str) -> Result<Self> {
        let registry = Registry::new();
        let opts = |name: &str, help: &str| {
            Opts::new(name, help).const_label("component", component)
        };

        let transitions_total = IntCounterVec::new(
            opts("regionguard_transitions_total", "Failover manager transitions"),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(transitions_total.clone()))?;

        let transition_duration = HistogramVec::new(
            HistogramOpts::new(
                "regionguard_transition_duration_seconds",
                "Duration of failover manager transitions",
            )
            .const_label("component", component)
            .buckets(TRANSITION_BUCKETS.to_vec()),
            &["kind"],
        )?;
        registry.register(Box::new(transition_duration.clone()))?;

        let consecutive_failures = IntGauge::with_opts(opts(
            "regionguard_consecutive_failures",
            "Consecutive unhealthy snapshots of the active region",
        ))?;
        registry.register(Box::new(consecutive_failures.clone()))?;

        let probe_failures_total = IntCounterVec::new(
            opts("regionguard_probe_failures_total", "Service probes that did not report healthy"),
            &["region", "service"],
        )?;
        registry.register(Box::new(probe_failures_total.clone()))?;

        let active_region = IntGaugeVec::new(
            opts("regionguard_active_region", "Region currently receiving traffic"),
            &["region"],
        )?;
        registry.register(Box::new(active_region.clone()))?;

        Ok(Self {
            registry,
            transitions_total,
            transition_duration,
            consecutive_failures,
            probe_failures_total,
            active_region,
        })
    }

    /// Mark `active` as the live region and every other name as standby
    pub fn set_active_region(&self, active: &str, all: &[&str]) {
        for name in all {
            self.active_region
                .with_label_values(&[name])
                .set(i64::from(*name == active));
        }
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| RegionGuardError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_registered_metrics() {
        let metrics = RegionGuardMetrics::new("test").unwrap();
        metrics
            .transitions_total
            .with_label_values(&["manual", "success"])
            .inc();
        metrics.set_active_region("east", &["east", "west"]);

        let text = metrics.export().unwrap();
        assert!(text.contains("regionguard_transitions_total"));
        assert!(text.contains("regionguard_active_region{component=\"test\",region=\"east\"} 1"));
        assert!(text.contains("regionguard_active_region{component=\"test\",region=\"west\"} 0"));
    }
}
