//! Durable routing state
//!
//! Events are kept in an append-only log next to a checkpoint of the scalar
//! routing fields, so a restart rebuilds the active region and the full audit
//! trail.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regionguard_common::RegionRole;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{FailoverError, Result};
use crate::state::{FailoverEvent, RoutingState};

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Last persisted state, `None` on first start
    async fn load(&self) -> Result<Option<RoutingState>>;

    /// Append one event together with the state it produced
    async fn append(&self, event: &FailoverEvent, state: &RoutingState) -> Result<()>;

    /// Persist the scalar fields of `state` (no new event)
    async fn checkpoint(&self, state: &RoutingState) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Checkpoint {
    active_region: RegionRole,
    last_failover_at: Option<DateTime<Utc>>,
    last_failback_at: Option<DateTime<Utc>>,
    consecutive_failure_count: u32,
}

impl From<&RoutingState> for Checkpoint {
    fn from(state: &RoutingState) -> Self {
        Self {
            active_region: state.active_region,
            last_failover_at: state.last_failover_at,
            last_failback_at: state.last_failback_at,
            consecutive_failure_count: state.consecutive_failure_count,
        }
    }
}

impl Checkpoint {
    fn into_state(self, history: Vec<FailoverEvent>) -> RoutingState {
        RoutingState {
            active_region: self.active_region,
            last_failover_at: self.last_failover_at,
            last_failback_at: self.last_failback_at,
            consecutive_failure_count: self.consecutive_failure_count,
            history,
        }
    }
}

const CHECKPOINT_KEY: &[u8] = b"routing/checkpoint";
const EVENT_PREFIX: &[u8] = b"event/";

fn event_key(sequence: u64) -> Vec<u8> {
    let mut key = EVENT_PREFIX.to_vec();
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

/// sled-backed store; events and checkpoint land in one atomic batch
pub struct SledStateStore {
    db: sled::Db,
}

impl SledStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        debug!("Opened routing state store at {}", path.as_ref().display());
        Ok(Self { db })
    }
}

#[async_trait]
impl StateStore for SledStateStore {
    async fn load(&self) -> Result<Option<RoutingState>> {
        let Some(raw) = self.db.get(CHECKPOINT_KEY)? else {
            return Ok(None);
        };
        let checkpoint: Checkpoint = serde_json::from_slice(&raw)?;

        // Big-endian sequence keys iterate in append order
        let mut history = Vec::new();
        for entry in self.db.scan_prefix(EVENT_PREFIX) {
            let (_, value) = entry?;
            history.push(serde_json::from_slice::<FailoverEvent>(&value)?);
        }
        Ok(Some(checkpoint.into_state(history)))
    }

    async fn append(&self, event: &FailoverEvent, state: &RoutingState) -> Result<()> {
        let sequence = self.db.generate_id()?;
        let mut batch = sled::Batch::default();
        batch.insert(event_key(sequence), serde_json::to_vec(event)?);
        batch.insert(CHECKPOINT_KEY, serde_json::to_vec(&Checkpoint::from(state))?);
        self.db.apply_batch(batch)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn checkpoint(&self, state: &RoutingState) -> Result<()> {
        self.db
            .insert(CHECKPOINT_KEY, serde_json::to_vec(&Checkpoint::from(state))?)?;
        self.db.flush_async().await?;
        Ok(())
    }
}

/// In-process store for tests and dry runs
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<Option<RoutingState>>,
    fail_writes: AtomicBool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `state`, as if restored after a restart
    pub fn with_state(state: RoutingState) -> Self {
        Self {
            inner: Mutex::new(Some(state)),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(FailoverError::Store("store is read-only".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<Option<RoutingState>> {
        Ok(self.inner.lock().await.clone())
    }

    async fn append(&self, event: &FailoverEvent, state: &RoutingState) -> Result<()> {
        self.check_writable()?;
        let mut inner = self.inner.lock().await;
        let history = match inner.take() {
            Some(mut previous) => {
                previous.history.push(event.clone());
                previous.history
            }
            None => vec![event.clone()],
        };
        *inner = Some(Checkpoint::from(state).into_state(history));
        Ok(())
    }

    async fn checkpoint(&self, state: &RoutingState) -> Result<()> {
        self.check_writable()?;
        let mut inner = self.inner.lock().await;
        let history = inner.take().map(|s| s.history).unwrap_or_default();
        *inner = Some(Checkpoint::from(state).into_state(history));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FailoverEventType;
    use std::time::Duration;

    fn event(reason: &str) -> FailoverEvent {
        FailoverEvent::new(
            FailoverEventType::Manual,
            reason,
            "east",
            "west",
            Duration::from_millis(250),
        )
    }

    #[tokio::test]
    async fn test_sled_store_round_trips_state_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routing");

        {
            let store = SledStateStore::open(&path).unwrap();
            assert!(store.load().await.unwrap().is_none());

            let mut state = RoutingState::default();
            store.checkpoint(&state).await.unwrap();

            for reason in ["first", "second", "third"] {
                let e = event(reason);
                state.history.push(e.clone());
                state.active_region = RegionRole::Secondary;
                state.last_failover_at = Some(e.timestamp);
                store.append(&e, &state).await.unwrap();
            }
            state.consecutive_failure_count = 2;
            store.checkpoint(&state).await.unwrap();
        }

        let reopened = SledStateStore::open(&path).unwrap();
        let restored = reopened.load().await.unwrap().unwrap();
        assert_eq!(restored.active_region, RegionRole::Secondary);
        assert_eq!(restored.consecutive_failure_count, 2);
        let reasons: Vec<_> = restored.history.iter().map(|e| e.reason.as_str()).collect();
        assert_eq!(reasons, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_memory_store_failing_writes() {
        let store = MemoryStateStore::new();
        store.set_fail_writes(true);
        let state = RoutingState::default();
        assert!(matches!(
            store.checkpoint(&state).await,
            Err(FailoverError::Store(_))
        ));
        store.set_fail_writes(false);
        store.append(&event("ok"), &state).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap().history.len(), 1);
    }
}
