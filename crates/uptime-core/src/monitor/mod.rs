pub mod error;
pub mod model;
pub mod retention;
pub mod run;
pub mod scheduler;
pub mod schema;

pub use error::ConfigError;
pub use model::{Header, Monitor, MonitorSettings, MAX_RETENTION_DAYS};
pub use retention::{prune_runs, resolve_retention_days};
pub use run::{MonitorRun, RequestMeta, ResponseMeta, RunTrigger};
pub use scheduler::{RunOutcome, Scheduler, SchedulerError, SchedulerState, SchedulerStats, StatsSnapshot};
pub use schema::{parse_import, ImportError, MonitorExport, EXPORT_VERSION};
