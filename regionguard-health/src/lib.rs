//! Regional health probing for RegionGuard
//!
//! [`HealthChecker`] fans probes out across services and regions and folds
//! the results into immutable [`HealthSnapshot`](regionguard_common::HealthSnapshot)s.
//! [`SnapshotHistory`] keeps the most recent ones for trend detection.

pub mod checker;
pub mod history;
pub mod probe;

pub use checker::{HealthChecker, HealthError};
pub use history::{HealthTrend, SnapshotHistory};
pub use probe::{default_probes, ApiProbe, CdnProbe, DatabaseProbe, ProbeError, ServiceProbe};
