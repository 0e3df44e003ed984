pub mod types;
pub mod error;
pub mod config;
pub mod policy;
pub mod metrics;

pub use types::*;
pub use error::{RegionGuardError, Result};
pub use config::{
    RegionGuardConfig, HealthSettings, FailoverSettings, CollaboratorSettings, StorageSettings,
};
pub use policy::FailoverPolicy;
pub use metrics::RegionGuardMetrics;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_PROBE_TIMEOUT.as_secs(), 10);
        assert_eq!(DEFAULT_HISTORY_CAPACITY, 20);
    }
}
