use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use futures::stream::{self, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alerting::{apply_delivery, AlertDecision, AlertState};
use crate::checker::UrlChecker;
use crate::config::EngineConfig;
use crate::notify::{AlertNotification, Notifier};
use crate::store::{MonitorStore, RunCommit, StoreError};

use super::model::Monitor;
use super::retention;
use super::run::{MonitorRun, RunTrigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Active,
    Stopping,
    Stopped,
}

impl SchedulerState {
    pub fn can_transition_to(self, target: SchedulerState) -> bool {
        matches!(
            (self, target),
            (SchedulerState::Idle, SchedulerState::Active)
                | (SchedulerState::Active, SchedulerState::Stopping)
                | (SchedulerState::Stopping, SchedulerState::Stopped)
                | (SchedulerState::Stopped, SchedulerState::Active)
        )
    }
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Active => write!(f, "active"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Monitor {0} not found")]
    NotFound(Uuid),
    #[error("Monitor {0} is already running")]
    Busy(Uuid),
    #[error("Monitor {0} is no longer due")]
    NotDue(Uuid),
    #[error("Lease on monitor {0} expired before the run finished")]
    LeaseLost(Uuid),
    #[error("Scheduler cannot go from {from} to {to}")]
    InvalidTransition { from: SchedulerState, to: SchedulerState },
    #[error("Scheduler is shutting down")]
    ShuttingDown,
}

/// What one execution produced, as committed.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run: MonitorRun,
    pub decision: AlertDecision,
    pub alert_state: AlertState,
}

#[derive(Debug, Default)]
pub struct SchedulerStats {
    runs_total: AtomicU64,
    runs_failed: AtomicU64,
    alerts_sent: AtomicU64,
    alerts_failed: AtomicU64,
    skipped_busy: AtomicU64,
    commit_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub runs_total: u64,
    pub runs_failed: u64,
    pub alerts_sent: u64,
    pub alerts_failed: u64,
    pub skipped_busy: u64,
    pub commit_errors: u64,
}

impl SchedulerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            runs_total: self.runs_total.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            alerts_sent: self.alerts_sent.load(Ordering::Relaxed),
            alerts_failed: self.alerts_failed.load(Ordering::Relaxed),
            skipped_busy: self.skipped_busy.load(Ordering::Relaxed),
            commit_errors: self.commit_errors.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Drives monitors: finds due ones, probes them, decides and delivers
/// alerts, and commits the outcome.
///
/// Cheap to clone; clones share the same state, permits and counters.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn MonitorStore>,
    checker: Arc<dyn UrlChecker>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
    state: Arc<RwLock<SchedulerState>>,
    permits: Arc<Semaphore>,
    in_flight: Arc<DashSet<Uuid>>,
    stats: Arc<SchedulerStats>,
    last_tick: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        checker: Arc<dyn UrlChecker>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_checks.max(1)));
        Self {
            store,
            checker,
            notifier,
            config,
            state: Arc::new(RwLock::new(SchedulerState::Idle)),
            permits,
            in_flight: Arc::new(DashSet::new()),
            stats: Arc::new(SchedulerStats::default()),
            last_tick: Arc::new(RwLock::new(None)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MonitorStore> {
        &self.store
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    pub async fn last_tick(&self) -> Option<DateTime<Utc>> {
        *self.last_tick.read().await
    }

    /// Number of executions currently holding a slot or waiting for one.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        {
            let mut state = self.state.write().await;
            if *state == SchedulerState::Active {
                return Ok(());
            }
            if !state.can_transition_to(SchedulerState::Active) {
                return Err(SchedulerError::InvalidTransition {
                    from: *state,
                    to: SchedulerState::Active,
                });
            }
            *state = SchedulerState::Active;
        }

        info!(
            tick_ms = self.config.tick_interval.as_millis() as u64,
            max_concurrent = self.config.max_concurrent_checks,
            "Starting scheduler"
        );

        let scheduler = self.clone();
        tokio::spawn(async move {
            loop {
                {
                    let current_state = *scheduler.state.read().await;
                    if current_state != SchedulerState::Active {
                        *scheduler.state.write().await = SchedulerState::Stopped;
                        info!("Scheduler stopped");
                        break;
                    }
                }

                scheduler.dispatch_due(Utc::now()).await;
                tokio::time::sleep(jittered(scheduler.config.tick_interval)).await;
            }
        });

        Ok(())
    }

    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        if *state == SchedulerState::Active {
            *state = SchedulerState::Stopping;
            info!("Stopping scheduler");
        }
    }

    /// Spawns one task per due monitor that is not already in flight here.
    async fn dispatch_due(&self, now: DateTime<Utc>) {
        *self.last_tick.write().await = Some(now);

        let due = match self.store.due_monitors(now).await {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "Failed to list due monitors");
                return;
            }
        };

        for monitor in due {
            let Some(guard) = InFlight::enter(&self.in_flight, monitor.id) else {
                continue;
            };
            let scheduler = self.clone();
            tokio::spawn(async move {
                let _guard = guard;
                let id = monitor.id;
                let result = scheduler.execute(monitor, RunTrigger::Scheduled).await;
                log_failure(id, result.err());
            });
        }
    }

    /// Runs every due monitor and waits for all of them. Used by tests and
    /// one-shot callers; the background loop dispatches instead.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<Vec<RunOutcome>, SchedulerError> {
        *self.last_tick.write().await = Some(now);
        let due = self.store.due_monitors(now).await?;

        let results: Vec<(Uuid, Result<RunOutcome, SchedulerError>)> = stream::iter(due)
            .map(|monitor| async move {
                let id = monitor.id;
                (id, self.execute(monitor, RunTrigger::Scheduled).await)
            })
            .buffer_unordered(self.config.max_concurrent_checks.max(1))
            .collect()
            .await;

        let mut outcomes = Vec::with_capacity(results.len());
        for (id, result) in results {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => log_failure(id, Some(e)),
            }
        }
        Ok(outcomes)
    }

    /// Runs one monitor immediately, regardless of its schedule.
    pub async fn run_now(&self, monitor_id: Uuid) -> Result<RunOutcome, SchedulerError> {
        let monitor = self
            .store
            .get_monitor(monitor_id)
            .await?
            .ok_or(SchedulerError::NotFound(monitor_id))?;
        self.execute(monitor, RunTrigger::Manual).await
    }

    async fn execute(&self, monitor: Monitor, trigger: RunTrigger) -> Result<RunOutcome, SchedulerError> {
        let _permit = self.permits.acquire().await.map_err(|_| SchedulerError::ShuttingDown)?;

        let token = Uuid::new_v4();
        let ttl = monitor.timeout() + self.config.lease_grace;
        if !self.store.try_claim(monitor.id, token, Utc::now(), ttl).await? {
            SchedulerStats::bump(&self.stats.skipped_busy);
            return Err(SchedulerError::Busy(monitor.id));
        }
        let lease = LeaseGuard::new(self.store.clone(), monitor.id, token);

        let result = self.execute_claimed(monitor.id, trigger, token).await;

        lease.release().await;
        result
    }

    async fn execute_claimed(
        &self,
        monitor_id: Uuid,
        trigger: RunTrigger,
        token: Uuid,
    ) -> Result<RunOutcome, SchedulerError> {
        // Re-read under the lease: the listing may be stale, or another
        // worker may have just run it.
        let monitor = self
            .store
            .get_monitor(monitor_id)
            .await?
            .ok_or(SchedulerError::NotFound(monitor_id))?;
        if trigger == RunTrigger::Scheduled && !monitor.is_due(Utc::now()) {
            return Err(SchedulerError::NotDue(monitor_id));
        }

        let started_at = Utc::now();
        let result = self.checker.check(&monitor.check_request()).await;
        let finished_at = Utc::now();
        let passed = result.success;
        let run = MonitorRun::from_check(&monitor, trigger, started_at, finished_at, result);

        let before = self.store.alert_state(monitor.id).await?;
        let policy = monitor.alert_policy(self.config.repeat_failure_alert_every);
        let (next, decision) = policy.decide(&before, passed, finished_at);

        let (alert_state, run) = if decision.is_none() {
            (next, run.with_alert(decision, None))
        } else {
            let budget = self.config.notify_timeout;
            if !self
                .store
                .renew(monitor.id, token, Utc::now(), budget + self.config.lease_grace)
                .await?
            {
                return Err(SchedulerError::LeaseLost(monitor.id));
            }

            let notification = AlertNotification::new(&monitor, decision, &before, &next, &run);
            let delivery = match tokio::time::timeout(budget, self.notifier.notify(&notification)).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("Alert delivery timed out after {}ms", budget.as_millis())),
            };
            match &delivery {
                Ok(()) => {
                    SchedulerStats::bump(&self.stats.alerts_sent);
                    info!(monitor_id = %monitor.id, incident_id = next.incident_id, decision = %decision, "Alert delivered");
                }
                Err(e) => {
                    SchedulerStats::bump(&self.stats.alerts_failed);
                    warn!(monitor_id = %monitor.id, decision = %decision, error = %e, "Alert delivery failed");
                }
            }
            let state = apply_delivery(next, decision, &delivery, Utc::now());
            (state, run.with_alert(decision, Some(&delivery)))
        };

        let commit = RunCommit {
            run: run.clone(),
            alert_state,
            last_run_at: finished_at,
            next_run_at: monitor.next_run_after(finished_at),
        };
        let alert_state = match self.store.commit_run(commit).await {
            Ok(state) => state,
            Err(e) => {
                SchedulerStats::bump(&self.stats.commit_errors);
                return Err(e.into());
            }
        };

        SchedulerStats::bump(&self.stats.runs_total);
        if !run.success {
            SchedulerStats::bump(&self.stats.runs_failed);
        }
        debug!(
            monitor_id = %monitor.id,
            trigger = %trigger,
            success = run.success,
            status_code = ?run.status_code,
            duration_ms = run.duration_ms,
            consecutive_failures = alert_state.consecutive_failures,
            "Run committed"
        );

        retention::prune_runs(
            self.store.as_ref(),
            &monitor,
            Utc::now(),
            self.config.default_retention_days,
        )
        .await;

        Ok(RunOutcome {
            run,
            decision,
            alert_state,
        })
    }
}

/// Marks a monitor as dispatched by this scheduler until dropped, including
/// when the run task panics.
struct InFlight {
    set: Arc<DashSet<Uuid>>,
    id: Uuid,
}

impl InFlight {
    fn enter(set: &Arc<DashSet<Uuid>>, id: Uuid) -> Option<Self> {
        set.insert(id).then(|| Self { set: set.clone(), id })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

/// Releases the store lease when the run ends. If the run is dropped or
/// unwinds first, the release is spawned onto the runtime.
struct LeaseGuard {
    store: Arc<dyn MonitorStore>,
    id: Uuid,
    token: Uuid,
    held: bool,
}

impl LeaseGuard {
    fn new(store: Arc<dyn MonitorStore>, id: Uuid, token: Uuid) -> Self {
        Self {
            store,
            id,
            token,
            held: true,
        }
    }

    async fn release(mut self) {
        self.held = false;
        if let Err(e) = self.store.release(self.id, self.token).await {
            warn!(monitor_id = %self.id, error = %e, "Failed to release lease");
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let (store, id, token) = (self.store.clone(), self.id, self.token);
        handle.spawn(async move {
            if let Err(e) = store.release(id, token).await {
                warn!(monitor_id = %id, error = %e, "Failed to release abandoned lease");
            }
        });
    }
}

fn log_failure(monitor_id: Uuid, error: Option<SchedulerError>) {
    match error {
        None => {}
        Some(SchedulerError::Busy(_)) | Some(SchedulerError::NotDue(_)) => {
            debug!(monitor_id = %monitor_id, "Skipped monitor already handled elsewhere");
        }
        Some(e) => warn!(monitor_id = %monitor_id, error = %e, "Monitor run failed"),
    }
}

/// Tick interval with ±1/7 jitter so co-located schedulers drift apart.
fn jittered(base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let jitter_range = base_ms / 7;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range * 2) as i64 - jitter_range as i64
    } else {
        0
    };
    Duration::from_millis((base_ms as i64 + jitter).max(1) as u64)
}
