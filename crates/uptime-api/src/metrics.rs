use std::fmt::Write;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};

use crate::error::ApiError;
use crate::state::AppState;

fn escape_label(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn seconds(t: DateTime<Utc>) -> f64 {
    t.timestamp() as f64 + (t.timestamp_subsec_millis() as f64 / 1000.0)
}

pub async fn metrics_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let mut out = String::with_capacity(4096);
    let monitors = state.store.list_monitors().await?;

    writeln!(out, "# TYPE uptime_monitor_info info").unwrap();
    writeln!(out, "# HELP uptime_monitor_info Configured uptime monitors").unwrap();
    for m in &monitors {
        writeln!(
            out,
            "uptime_monitor_info{{monitor_id=\"{}\",owner_id=\"{}\",name=\"{}\",url=\"{}\",method=\"{}\"}} 1",
            m.id,
            escape_label(&m.owner_id),
            escape_label(&m.settings.name),
            escape_label(&m.settings.url),
            m.settings.method
        )
        .unwrap();
    }

    writeln!(out, "# TYPE uptime_monitor_schedulable gauge").unwrap();
    writeln!(out, "# HELP uptime_monitor_schedulable 1 if the monitor is enabled and not paused").unwrap();
    for m in &monitors {
        writeln!(
            out,
            "uptime_monitor_schedulable{{monitor_id=\"{}\"}} {}",
            m.id,
            if m.is_schedulable() { 1 } else { 0 }
        )
        .unwrap();
    }

    let mut up = Vec::with_capacity(monitors.len());
    let mut alerts = Vec::with_capacity(monitors.len());
    for m in &monitors {
        let last = state.store.list_runs(m.id, 1).await?.into_iter().next();
        up.push((m.id, last));
        alerts.push((m, state.store.alert_state(m.id).await?));
    }

    writeln!(out, "# TYPE uptime_monitor_up gauge").unwrap();
    writeln!(out, "# HELP uptime_monitor_up 1 if the most recent run succeeded").unwrap();
    for (id, last) in &up {
        if let Some(run) = last {
            writeln!(out, "uptime_monitor_up{{monitor_id=\"{}\"}} {}", id, if run.success { 1 } else { 0 }).unwrap();
        }
    }

    writeln!(out, "# TYPE uptime_monitor_last_duration_seconds gauge").unwrap();
    writeln!(out, "# HELP uptime_monitor_last_duration_seconds Duration of the most recent run").unwrap();
    for (id, last) in &up {
        if let Some(run) = last {
            writeln!(
                out,
                "uptime_monitor_last_duration_seconds{{monitor_id=\"{}\"}} {:.3}",
                id,
                run.duration_ms as f64 / 1000.0
            )
            .unwrap();
        }
    }

    writeln!(out, "# TYPE uptime_monitor_last_run_timestamp_seconds gauge").unwrap();
    writeln!(out, "# HELP uptime_monitor_last_run_timestamp_seconds Unix timestamp of the most recent run").unwrap();
    for m in &monitors {
        if let Some(t) = m.last_run_at {
            writeln!(out, "uptime_monitor_last_run_timestamp_seconds{{monitor_id=\"{}\"}} {:.3}", m.id, seconds(t)).unwrap();
        }
    }

    writeln!(out, "# TYPE uptime_monitor_consecutive_failures gauge").unwrap();
    writeln!(out, "# HELP uptime_monitor_consecutive_failures Length of the current failure streak").unwrap();
    for (m, alert) in &alerts {
        writeln!(
            out,
            "uptime_monitor_consecutive_failures{{monitor_id=\"{}\"}} {}",
            m.id, alert.consecutive_failures
        )
        .unwrap();
    }

    writeln!(out, "# TYPE uptime_monitor_alerted gauge").unwrap();
    writeln!(out, "# HELP uptime_monitor_alerted 1 while the failure streak is at or above the alert threshold").unwrap();
    for (m, alert) in &alerts {
        writeln!(
            out,
            "uptime_monitor_alerted{{monitor_id=\"{}\"}} {}",
            m.id,
            if alert.is_alerted(m.settings.alert_after_consecutive_failures) { 1 } else { 0 }
        )
        .unwrap();
    }

    let sched = state.scheduler.stats();
    let scheduler_state = state.scheduler.state().await.to_string();

    writeln!(out, "# TYPE uptime_scheduler_state stateset").unwrap();
    writeln!(out, "# HELP uptime_scheduler_state Current state of the scheduler").unwrap();
    for variant in &["idle", "active", "stopping", "stopped"] {
        writeln!(
            out,
            "uptime_scheduler_state{{state=\"{}\"}} {}",
            variant,
            if scheduler_state == *variant { 1 } else { 0 }
        )
        .unwrap();
    }

    for (name, help, value) in [
        ("uptime_runs", "Runs committed", sched.runs_total),
        ("uptime_runs_failed", "Committed runs that failed", sched.runs_failed),
        ("uptime_alerts_sent", "Alerts the notifier accepted", sched.alerts_sent),
        ("uptime_alerts_failed", "Alerts the notifier rejected", sched.alerts_failed),
        ("uptime_runs_skipped_busy", "Runs skipped because the monitor lease was held", sched.skipped_busy),
        ("uptime_commit_errors", "Run commits rejected by storage", sched.commit_errors),
    ] {
        writeln!(out, "# TYPE {} counter", name).unwrap();
        writeln!(out, "# HELP {} {}", name, help).unwrap();
        writeln!(out, "{}_total {}", name, value).unwrap();
    }

    writeln!(out, "# TYPE uptime_scheduler_last_tick_timestamp_seconds gauge").unwrap();
    writeln!(out, "# HELP uptime_scheduler_last_tick_timestamp_seconds Unix timestamp of the last scheduler tick").unwrap();
    if let Some(t) = state.scheduler.last_tick().await {
        writeln!(out, "uptime_scheduler_last_tick_timestamp_seconds {:.3}", seconds(t)).unwrap();
    }

    writeln!(out, "# TYPE uptime_process_uptime_seconds gauge").unwrap();
    writeln!(out, "# HELP uptime_process_uptime_seconds Time since the server started").unwrap();
    let uptime = (Utc::now() - state.started_at).num_milliseconds() as f64 / 1000.0;
    writeln!(out, "uptime_process_uptime_seconds {:.3}", uptime).unwrap();

    writeln!(out, "# EOF").unwrap();

    Ok((
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        out,
    ))
}
