#![forbid(unsafe_code)]

pub mod alerting;
pub mod checker;
pub mod config;
pub mod monitor;
pub mod notify;
pub mod store;

pub use alerting::{apply_delivery, on_failure, on_success, AlertDecision, AlertPolicy, AlertState};
pub use checker::{
    is_success_status, parse_allowed_status_codes, CheckRequest, CheckResult, HttpChecker, MatchMode, MatchResult,
    MatchRule, MatchRules, ProbeErrorKind, StatusCodeError, UrlChecker,
};
pub use config::EngineConfig;
pub use monitor::{
    parse_import, ConfigError, Header, ImportError, Monitor, MonitorExport, MonitorRun, MonitorSettings, RunOutcome,
    RunTrigger, Scheduler, SchedulerError, SchedulerState, StatsSnapshot, MAX_RETENTION_DAYS,
};
pub use notify::{AlertNotification, LogNotifier, Notifier, NotifyError, WebhookConfig, WebhookNotifier};
pub use store::{MemoryStore, MonitorStore, RunCommit, StoreError};
