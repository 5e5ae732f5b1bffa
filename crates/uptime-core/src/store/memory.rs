use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::alerting::AlertState;
use crate::monitor::{Monitor, MonitorRun, MonitorSettings};

use super::{MonitorStore, RunCommit, StoreError};

#[derive(Debug, Clone, Copy)]
struct Lease {
    token: Uuid,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    monitors: HashMap<Uuid, Monitor>,
    runs: HashMap<Uuid, Vec<MonitorRun>>,
    alert_states: HashMap<Uuid, AlertState>,
    account_retention: HashMap<String, u32>,
}

/// Single-process store. Data tables sit behind one lock so a run commit is
/// atomic; leases live in a separate map so claiming never waits on readers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    leases: DashMap<Uuid, Lease>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MonitorStore for MemoryStore {
    async fn insert_monitor(&self, monitor: Monitor) -> Result<Monitor, StoreError> {
        let mut t = self.tables.write().await;
        t.monitors.insert(monitor.id, monitor.clone());
        Ok(monitor)
    }

    async fn update_monitor(&self, id: Uuid, settings: MonitorSettings, now: DateTime<Utc>) -> Result<Monitor, StoreError> {
        let mut t = self.tables.write().await;
        let monitor = t.monitors.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let was_schedulable = monitor.is_schedulable();
        monitor.settings = settings.normalized();
        monitor.updated_at = now;
        if !was_schedulable && monitor.is_schedulable() {
            monitor.next_run_at = Some(now);
        }
        Ok(monitor.clone())
    }

    async fn get_monitor(&self, id: Uuid) -> Result<Option<Monitor>, StoreError> {
        Ok(self.tables.read().await.monitors.get(&id).cloned())
    }

    async fn list_monitors(&self) -> Result<Vec<Monitor>, StoreError> {
        let t = self.tables.read().await;
        let mut monitors: Vec<Monitor> = t.monitors.values().cloned().collect();
        monitors.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(monitors)
    }

    async fn delete_monitor(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut t = self.tables.write().await;
        let existed = t.monitors.remove(&id).is_some();
        t.runs.remove(&id);
        t.alert_states.remove(&id);
        self.leases.remove(&id);
        Ok(existed)
    }

    async fn set_paused(&self, id: Uuid, paused: bool, now: DateTime<Utc>) -> Result<Monitor, StoreError> {
        let mut t = self.tables.write().await;
        let monitor = t.monitors.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if monitor.settings.is_paused && !paused {
            monitor.next_run_at = Some(now);
        }
        monitor.settings.is_paused = paused;
        monitor.updated_at = now;
        Ok(monitor.clone())
    }

    async fn due_monitors(&self, now: DateTime<Utc>) -> Result<Vec<Monitor>, StoreError> {
        let t = self.tables.read().await;
        let mut due: Vec<Monitor> = t.monitors.values().filter(|m| m.is_due(now)).cloned().collect();
        due.sort_by_key(|m| m.next_run_at);
        Ok(due)
    }

    async fn try_claim(&self, id: Uuid, token: Uuid, now: DateTime<Utc>, ttl: Duration) -> Result<bool, StoreError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::Unavailable(format!("lease ttl out of range: {}", e)))?;
        let lease = Lease {
            token,
            expires_at: now + ttl,
        };
        match self.leases.entry(id) {
            Entry::Occupied(mut held) => {
                if held.get().expires_at > now {
                    return Ok(false);
                }
                held.insert(lease);
                Ok(true)
            }
            Entry::Vacant(slot) => {
                slot.insert(lease);
                Ok(true)
            }
        }
    }

    async fn renew(&self, id: Uuid, token: Uuid, now: DateTime<Utc>, ttl: Duration) -> Result<bool, StoreError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::Unavailable(format!("lease ttl out of range: {}", e)))?;
        match self.leases.get_mut(&id) {
            Some(mut lease) if lease.token == token => {
                lease.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, id: Uuid, token: Uuid) -> Result<(), StoreError> {
        self.leases.remove_if(&id, |_, lease| lease.token == token);
        Ok(())
    }

    async fn alert_state(&self, id: Uuid) -> Result<AlertState, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .alert_states
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn commit_run(&self, commit: RunCommit) -> Result<AlertState, StoreError> {
        let RunCommit {
            run,
            mut alert_state,
            last_run_at,
            next_run_at,
        } = commit;
        let id = run.monitor_id;

        let mut t = self.tables.write().await;
        if !t.monitors.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }

        let current = t.alert_states.get(&id).map(|s| s.revision).unwrap_or(0);
        if alert_state.revision != current {
            return Err(StoreError::Conflict {
                monitor_id: id,
                expected: alert_state.revision,
                actual: current,
            });
        }

        // The row is created lazily: a monitor that has never failed has none.
        let untouched = AlertState {
            revision: alert_state.revision,
            ..AlertState::default()
        };
        if t.alert_states.contains_key(&id) || alert_state != untouched {
            alert_state.revision = current + 1;
            t.alert_states.insert(id, alert_state.clone());
        }

        t.runs.entry(id).or_default().push(run);
        if let Some(monitor) = t.monitors.get_mut(&id) {
            monitor.last_run_at = Some(last_run_at);
            monitor.next_run_at = Some(next_run_at);
        }
        Ok(alert_state)
    }

    async fn list_runs(&self, id: Uuid, limit: usize) -> Result<Vec<MonitorRun>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.runs
            .get(&id)
            .map(|runs| runs.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn prune_runs(&self, id: Uuid, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut t = self.tables.write().await;
        let Some(runs) = t.runs.get_mut(&id) else {
            return Ok(0);
        };
        let before = runs.len();
        runs.retain(|r| r.started_at >= cutoff);
        Ok(before - runs.len())
    }

    async fn account_retention_days(&self, owner_id: &str) -> Result<Option<u32>, StoreError> {
        Ok(self.tables.read().await.account_retention.get(owner_id).copied())
    }

    async fn set_account_retention_days(&self, owner_id: &str, days: Option<u32>) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        match days {
            Some(d) => {
                t.account_retention.insert(owner_id.to_string(), d);
            }
            None => {
                t.account_retention.remove(owner_id);
            }
        }
        Ok(())
    }
}
