use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::alerting::AlertDecision;
use crate::checker::{CheckResult, MatchResult, ProbeErrorKind};

use super::model::{Header, Monitor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduled,
    Manual,
}

impl fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// What was sent, kept for diagnosing failed runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
    pub method: String,
    pub url: String,
    pub headers: Vec<Header>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub timeout_seconds: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
}

/// Immutable record of one monitor execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorRun {
    pub id: Uuid,
    pub monitor_id: Uuid,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status_code: Option<u16>,
    pub success: bool,
    pub error_message: Option<String>,
    pub error_kind: Option<ProbeErrorKind>,
    pub response_snippet: String,
    pub match_results: Vec<MatchResult>,
    pub request: RequestMeta,
    pub response: ResponseMeta,
    pub alert_decision: AlertDecision,
    pub alert_sent: bool,
    pub alert_error: Option<String>,
}

impl MonitorRun {
    pub fn from_check(
        monitor: &Monitor,
        trigger: RunTrigger,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        result: CheckResult,
    ) -> Self {
        let request = RequestMeta {
            method: monitor.settings.method.clone(),
            url: monitor.settings.url.clone(),
            headers: monitor.settings.headers.clone(),
            content_type: monitor.settings.content_type.clone(),
            timeout_seconds: monitor.settings.timeout_seconds,
        };

        Self {
            id: Uuid::new_v4(),
            monitor_id: monitor.id,
            trigger,
            started_at,
            finished_at,
            duration_ms: result.duration_ms,
            status_code: result.status_code,
            success: result.success,
            error_message: result.error_message,
            error_kind: result.error_kind,
            response_snippet: result.response_snippet,
            match_results: result.match_results,
            request,
            response: ResponseMeta {
                headers: result.headers,
                content_type: result.content_type,
                content_length: result.content_length,
            },
            alert_decision: AlertDecision::None,
            alert_sent: false,
            alert_error: None,
        }
    }

    pub fn with_alert(mut self, decision: AlertDecision, delivery: Option<&Result<(), String>>) -> Self {
        self.alert_decision = decision;
        match delivery {
            Some(Ok(())) => {
                self.alert_sent = true;
                self.alert_error = None;
            }
            Some(Err(e)) => {
                self.alert_sent = false;
                self.alert_error = Some(e.clone());
            }
            None => {}
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::model::MonitorSettings;

    fn monitor() -> Monitor {
        let mut settings = MonitorSettings::new("api", "https://api.example.com/health");
        settings.headers = vec![Header::new("Authorization", "Bearer x"), Header::new("Accept", "a"), Header::new("Accept", "b")];
        Monitor::new("acct", settings, Utc::now())
    }

    #[test]
    fn run_copies_check_result() {
        let m = monitor();
        let now = Utc::now();
        let result = CheckResult {
            status_code: Some(503),
            success: false,
            error_message: Some("Unexpected status code 503".into()),
            duration_ms: 42,
            content_length: Some(10),
            ..CheckResult::default()
        };
        let run = MonitorRun::from_check(&m, RunTrigger::Scheduled, now, now, result);
        assert_eq!(run.monitor_id, m.id);
        assert_eq!(run.status_code, Some(503));
        assert_eq!(run.duration_ms, 42);
        assert_eq!(run.response.content_length, Some(10));
        assert_eq!(run.request.headers.len(), 3);
        assert_eq!(run.request.headers[0], Header::new("Authorization", "Bearer x"));
        assert!(!run.alert_sent);
    }

    #[test]
    fn alert_bookkeeping() {
        let m = monitor();
        let now = Utc::now();
        let run = MonitorRun::from_check(&m, RunTrigger::Manual, now, now, CheckResult::default())
            .with_alert(AlertDecision::Failure, Some(&Err("webhook 500".into())));
        assert_eq!(run.alert_decision, AlertDecision::Failure);
        assert!(!run.alert_sent);
        assert_eq!(run.alert_error.as_deref(), Some("webhook 500"));

        let run = run.with_alert(AlertDecision::Failure, Some(&Ok(())));
        assert!(run.alert_sent);
        assert_eq!(run.alert_error, None);
    }

    #[test]
    fn trigger_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&RunTrigger::Manual).unwrap(), "\"manual\"");
        assert_eq!(RunTrigger::Scheduled.to_string(), "scheduled");
    }
}
