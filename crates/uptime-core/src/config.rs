use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::checker::DEFAULT_SNIPPET_LIMIT;
use crate::monitor::MAX_RETENTION_DAYS;

/// Runtime configuration for the scheduling and alerting engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How often the scheduler looks for due monitors (default: 5s).
    pub tick_interval: Duration,
    /// Check intervals (in seconds) a monitor may be configured with.
    pub allowed_intervals: Vec<u32>,
    /// Run history retention when neither the monitor nor its account override it.
    pub default_retention_days: u32,
    /// Minimum gap between failure reminders during one incident (default: 24h).
    pub repeat_failure_alert_every: Duration,
    /// Upper bound on probes in flight across all monitors.
    pub max_concurrent_checks: usize,
    /// Added to a monitor's timeout to form its execution lease.
    pub lease_grace: Duration,
    /// Upper bound on one alert delivery, retries included. The lease is
    /// renewed to cover it before the notifier runs.
    pub notify_timeout: Duration,
    /// Maximum number of response body bytes kept per run.
    pub snippet_limit_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            allowed_intervals: vec![30, 60, 120, 300, 600, 900, 1800, 3600],
            default_retention_days: 90,
            repeat_failure_alert_every: Duration::from_secs(24 * 60 * 60),
            max_concurrent_checks: 8,
            lease_grace: Duration::from_secs(30),
            notify_timeout: Duration::from_secs(60),
            snippet_limit_bytes: DEFAULT_SNIPPET_LIMIT,
        }
    }
}

impl EngineConfig {
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(Duration::from_millis(10));
        self
    }

    pub fn with_allowed_intervals(mut self, mut intervals: Vec<u32>) -> Self {
        intervals.sort_unstable();
        intervals.dedup();
        self.allowed_intervals = intervals;
        self
    }

    pub fn with_default_retention_days(mut self, days: u32) -> Self {
        self.default_retention_days = days.clamp(1, MAX_RETENTION_DAYS);
        self
    }

    pub fn with_repeat_failure_alert_every(mut self, every: Duration) -> Self {
        self.repeat_failure_alert_every = every;
        self
    }

    pub fn with_max_concurrent_checks(mut self, max: usize) -> Self {
        self.max_concurrent_checks = max.max(1);
        self
    }

    pub fn with_lease_grace(mut self, grace: Duration) -> Self {
        self.lease_grace = grace;
        self
    }

    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn with_snippet_limit_bytes(mut self, limit: usize) -> Self {
        self.snippet_limit_bytes = limit;
        self
    }

    pub fn is_allowed_interval(&self, seconds: u32) -> bool {
        self.allowed_intervals.contains(&seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.default_retention_days, 90);
        assert_eq!(c.repeat_failure_alert_every, Duration::from_secs(86_400));
        assert_eq!(c.snippet_limit_bytes, 256 * 1024);
        assert_eq!(c.notify_timeout, Duration::from_secs(60));
        assert!(c.is_allowed_interval(300));
        assert!(!c.is_allowed_interval(7));
    }

    #[test]
    fn builders_clamp_degenerate_values() {
        let c = EngineConfig::default()
            .with_max_concurrent_checks(0)
            .with_default_retention_days(0)
            .with_allowed_intervals(vec![60, 10, 60]);
        assert_eq!(c.max_concurrent_checks, 1);
        assert_eq!(c.default_retention_days, 1);
        let c = EngineConfig::default().with_default_retention_days(u32::MAX);
        assert_eq!(c.default_retention_days, MAX_RETENTION_DAYS);
        assert_eq!(c.allowed_intervals, vec![10, 60]);
    }
}
