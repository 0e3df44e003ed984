use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::ManagerState;

/// Steps of a failover or failback, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionStep {
    VerifyTarget,
    ReplicationCheck,
    TrafficCutover,
    VerifyCutover,
}

impl TransitionStep {
    /// Steps at or after the cutover leave routing in need of a rollback
    pub fn touches_routing(self) -> bool {
        matches!(self, TransitionStep::TrafficCutover | TransitionStep::VerifyCutover)
    }
}

impl fmt::Display for TransitionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransitionStep::VerifyTarget => "verify target health",
            TransitionStep::ReplicationCheck => "replication check",
            TransitionStep::TrafficCutover => "traffic cutover",
            TransitionStep::VerifyCutover => "verify cutover",
        };
        f.write_str(name)
    }
}

/// What happened when the manager tried to restore the original routing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOutcome {
    pub attempted: bool,
    pub succeeded: bool,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RollbackOutcome {
    pub fn not_needed() -> Self {
        Self::default()
    }
}

impl fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.attempted, self.succeeded) {
            (false, _) => write!(f, "not needed"),
            (true, true) => write!(f, "succeeded after {} attempt(s)", self.attempts),
            (true, false) => write!(
                f,
                "FAILED after {} attempt(s): {}",
                self.attempts,
                self.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailoverError {
    #[error("another transition is in progress (state {0})")]
    ConcurrentTransition(ManagerState),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("{step} failed: {cause}; rollback {rollback}")]
    PartialFailover {
        step: TransitionStep,
        cause: String,
        rollback: RollbackOutcome,
    },

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("operation aborted by operator; rollback {rollback}")]
    Aborted { rollback: RollbackOutcome },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("health check error: {0}")]
    Health(String),

    #[error("state store error: {0}")]
    Store(String),
}

impl From<sled::Error> for FailoverError {
    fn from(error: sled::Error) -> Self {
        FailoverError::Store(error.to_string())
    }
}

impl From<serde_json::Error> for FailoverError {
    fn from(error: serde_json::Error) -> Self {
        FailoverError::Store(error.to_string())
    }
}

impl From<regionguard_health::HealthError> for FailoverError {
    fn from(error: regionguard_health::HealthError) -> Self {
        FailoverError::Health(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FailoverError>;
