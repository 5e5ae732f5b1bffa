use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::store::MonitorStore;

use super::model::Monitor;

/// Monitor override, then account override, then the server default.
pub fn resolve_retention_days(monitor_days: Option<u32>, account_days: Option<u32>, default_days: u32) -> u32 {
    monitor_days.or(account_days).unwrap_or(default_days)
}

/// Deletes run history that has aged out of the monitor's retention window.
///
/// Best effort: failures are logged and reported as zero removed rows.
pub async fn prune_runs(store: &dyn MonitorStore, monitor: &Monitor, now: DateTime<Utc>, default_days: u32) -> usize {
    let account_days = if monitor.settings.run_retention_days.is_some() {
        None
    } else {
        match store.account_retention_days(&monitor.owner_id).await {
            Ok(days) => days,
            Err(e) => {
                warn!(monitor_id = %monitor.id, owner_id = %monitor.owner_id, error = %e, "Failed to read account retention");
                None
            }
        }
    };

    let days = resolve_retention_days(monitor.settings.run_retention_days, account_days, default_days);
    let cutoff = chrono::Duration::try_days(i64::from(days)).and_then(|window| now.checked_sub_signed(window));
    let Some(cutoff) = cutoff else {
        warn!(monitor_id = %monitor.id, retention_days = days, "Retention window out of range, skipping prune");
        return 0;
    };

    match store.prune_runs(monitor.id, cutoff).await {
        Ok(removed) => {
            if removed > 0 {
                debug!(monitor_id = %monitor.id, removed, retention_days = days, "Pruned run history");
            }
            removed
        }
        Err(e) => {
            warn!(monitor_id = %monitor.id, error = %e, "Run retention pruning failed");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::AlertState;
    use crate::checker::CheckResult;
    use crate::monitor::{MonitorRun, MonitorSettings, RunTrigger};
    use crate::store::{MemoryStore, RunCommit};
    use chrono::TimeZone;

    #[test]
    fn first_present_value_wins() {
        assert_eq!(resolve_retention_days(Some(7), Some(30), 90), 7);
        assert_eq!(resolve_retention_days(None, Some(30), 90), 30);
        assert_eq!(resolve_retention_days(None, None, 90), 90);
    }

    async fn seed(store: &MemoryStore, monitor: &Monitor, ages_in_days: &[i64], now: DateTime<Utc>) {
        for age in ages_in_days {
            let at = now - chrono::Duration::days(*age);
            let run = MonitorRun::from_check(monitor, RunTrigger::Scheduled, at, at, CheckResult::default());
            store
                .commit_run(RunCommit {
                    run,
                    alert_state: AlertState::default(),
                    last_run_at: at,
                    next_run_at: at,
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn prunes_with_account_override() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let store = MemoryStore::new();
        let monitor = store
            .insert_monitor(Monitor::new("acct", MonitorSettings::new("m", "https://example.com"), now))
            .await
            .unwrap();
        store.set_account_retention_days("acct", Some(10)).await.unwrap();
        seed(&store, &monitor, &[1, 9, 11, 40], now).await;

        assert_eq!(prune_runs(&store, &monitor, now, 90).await, 2);
        assert_eq!(store.list_runs(monitor.id, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn monitor_override_beats_account() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let store = MemoryStore::new();
        let mut settings = MonitorSettings::new("m", "https://example.com");
        settings.run_retention_days = Some(2);
        let monitor = store.insert_monitor(Monitor::new("acct", settings, now)).await.unwrap();
        store.set_account_retention_days("acct", Some(30)).await.unwrap();
        seed(&store, &monitor, &[1, 3, 20], now).await;

        assert_eq!(prune_runs(&store, &monitor, now, 90).await, 2);
    }

    #[tokio::test]
    async fn default_window_keeps_recent_history() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let store = MemoryStore::new();
        let monitor = store
            .insert_monitor(Monitor::new("acct", MonitorSettings::new("m", "https://example.com"), now))
            .await
            .unwrap();
        seed(&store, &monitor, &[0, 89, 91], now).await;

        assert_eq!(prune_runs(&store, &monitor, now, 90).await, 1);
    }

    #[tokio::test]
    async fn out_of_range_window_skips_pruning() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let store = MemoryStore::new();
        let mut settings = MonitorSettings::new("m", "https://example.com");
        settings.run_retention_days = Some(u32::MAX);
        let monitor = store.insert_monitor(Monitor::new("acct", settings, now)).await.unwrap();
        seed(&store, &monitor, &[1, 400], now).await;

        assert_eq!(prune_runs(&store, &monitor, now, 90).await, 0);
        assert_eq!(store.list_runs(monitor.id, 10).await.unwrap().len(), 2);

        store.set_account_retention_days("acct", Some(u32::MAX)).await.unwrap();
        let plain = store
            .insert_monitor(Monitor::new("acct", MonitorSettings::new("p", "https://example.com"), now))
            .await
            .unwrap();
        assert_eq!(prune_runs(&store, &plain, now, 90).await, 0);
    }
}
