//! Region failover state machine for RegionGuard
//!
//! The [`FailoverManager`] is the only writer of the routing state. It counts
//! consecutive health-check failures of the active region, drives failover,
//! failback and disaster-recovery tests through the traffic and replication
//! collaborators, and persists every event to a [`StateStore`].

pub mod collaborators;
pub mod error;
pub mod manager;
pub mod policy;
pub mod report;
pub mod state;
pub mod store;

pub use collaborators::{
    HttpReplicationMonitor, HttpTrafficController, LogNotifier, NotificationSink,
    ReplicationMonitor, TrafficController, WebhookNotifier,
};
pub use error::{FailoverError, Result, RollbackOutcome, TransitionStep};
pub use manager::{
    Collaborators, DrTestResult, FailoverManager, FailoverResult, FailureAssessment,
    ManagerOptions,
};
pub use policy::{FailoverPolicy, PolicyUpdate};
pub use report::{EventCounts, FailoverReport};
pub use state::{FailoverEvent, FailoverEventType, ManagerState, RecoveryLevel, RoutingState};
pub use store::{MemoryStateStore, SledStateStore, StateStore};
