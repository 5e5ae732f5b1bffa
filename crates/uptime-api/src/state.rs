use std::sync::Arc;

use chrono::{DateTime, Utc};

use uptime_core::{EngineConfig, HttpChecker, LogNotifier, MemoryStore, MonitorStore, Scheduler};

pub const DEFAULT_OWNER: &str = "default";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MonitorStore>,
    pub scheduler: Scheduler,
    pub config: EngineConfig,
    /// Owner assigned to monitors created without an explicit `ownerId`.
    pub default_owner: String,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            store: Arc::clone(scheduler.store()),
            config: scheduler.config().clone(),
            scheduler,
            default_owner: DEFAULT_OWNER.to_string(),
            started_at: Utc::now(),
        }
    }

    /// In-memory store, real HTTP checker, alerts to the log.
    pub fn in_memory(config: EngineConfig) -> Self {
        let scheduler = Scheduler::new(
            Arc::new(MemoryStore::new()),
            Arc::new(HttpChecker::default()),
            Arc::new(LogNotifier),
            config,
        );
        Self::new(scheduler)
    }

    pub fn with_default_owner(mut self, owner: impl Into<String>) -> Self {
        self.default_owner = owner.into();
        self
    }
}
