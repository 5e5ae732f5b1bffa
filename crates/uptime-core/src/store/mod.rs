mod memory;

pub use memory::MemoryStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::alerting::AlertState;
use crate::monitor::{Monitor, MonitorRun, MonitorSettings};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Monitor {0} not found")]
    NotFound(Uuid),
    #[error("Alert state for monitor {monitor_id} changed concurrently (expected revision {expected}, found {actual})")]
    Conflict {
        monitor_id: Uuid,
        expected: u64,
        actual: u64,
    },
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Everything one run writes. Applied all-or-nothing by [`MonitorStore::commit_run`].
#[derive(Debug, Clone)]
pub struct RunCommit {
    pub run: MonitorRun,
    /// Next alert state; its `revision` must equal the stored revision.
    pub alert_state: AlertState,
    pub last_run_at: DateTime<Utc>,
    pub next_run_at: DateTime<Utc>,
}

/// Persistence for monitors, their run history and alert state.
///
/// The engine only relies on two guarantees: `try_claim` is atomic per
/// monitor, and `commit_run` applies the run, the alert state and the
/// schedule together or not at all.
#[async_trait]
pub trait MonitorStore: Send + Sync {
    async fn insert_monitor(&self, monitor: Monitor) -> Result<Monitor, StoreError>;

    async fn update_monitor(&self, id: Uuid, settings: MonitorSettings, now: DateTime<Utc>) -> Result<Monitor, StoreError>;

    async fn get_monitor(&self, id: Uuid) -> Result<Option<Monitor>, StoreError>;

    async fn list_monitors(&self) -> Result<Vec<Monitor>, StoreError>;

    /// Removes the monitor with its runs, alert state and lease.
    async fn delete_monitor(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn set_paused(&self, id: Uuid, paused: bool, now: DateTime<Utc>) -> Result<Monitor, StoreError>;

    async fn due_monitors(&self, now: DateTime<Utc>) -> Result<Vec<Monitor>, StoreError>;

    /// Claims the execution lease for `id`. Returns `false` while another
    /// unexpired lease is held.
    async fn try_claim(&self, id: Uuid, token: Uuid, now: DateTime<Utc>, ttl: Duration) -> Result<bool, StoreError>;

    /// Pushes the lease expiry to `now + ttl`. Returns `false` if `token` no
    /// longer owns the lease.
    async fn renew(&self, id: Uuid, token: Uuid, now: DateTime<Utc>, ttl: Duration) -> Result<bool, StoreError>;

    /// Releases the lease if `token` still owns it.
    async fn release(&self, id: Uuid, token: Uuid) -> Result<(), StoreError>;

    /// Returns the stored alert state, or the healthy default.
    async fn alert_state(&self, id: Uuid) -> Result<AlertState, StoreError>;

    /// Applies the commit and returns the alert state as now persisted.
    async fn commit_run(&self, commit: RunCommit) -> Result<AlertState, StoreError>;

    /// Runs for one monitor, newest first.
    async fn list_runs(&self, id: Uuid, limit: usize) -> Result<Vec<MonitorRun>, StoreError>;

    /// Deletes runs that started before `cutoff`. Returns how many were removed.
    async fn prune_runs(&self, id: Uuid, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn account_retention_days(&self, owner_id: &str) -> Result<Option<u32>, StoreError>;

    async fn set_account_retention_days(&self, owner_id: &str, days: Option<u32>) -> Result<(), StoreError>;
}
