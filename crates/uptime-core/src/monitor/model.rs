use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::alerting::AlertPolicy;
use crate::checker::{parse_allowed_status_codes, CheckRequest, MatchRule, MatchRules};
use crate::config::EngineConfig;

use super::error::ConfigError;

pub const MIN_ALERT_THRESHOLD: u32 = 1;
pub const MAX_ALERT_THRESHOLD: u32 = 20;
pub const MAX_RETENTION_DAYS: u32 = 36_500;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

fn default_method() -> String {
    "GET".into()
}

fn default_true() -> bool {
    true
}

fn default_timeout_seconds() -> u32 {
    30
}

fn default_interval_seconds() -> u32 {
    300
}

fn default_threshold() -> u32 {
    1
}

/// User-editable monitor definition. This is also the import/export shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSettings {
    pub name: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u32,
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u32,
    #[serde(default = "default_threshold")]
    pub alert_after_consecutive_failures: u32,
    #[serde(default)]
    pub alert_email_override: Option<String>,
    #[serde(default)]
    pub allowed_status_codes: Option<String>,
    #[serde(default)]
    pub run_retention_days: Option<u32>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub match_rules: Vec<MatchRule>,
}

impl MonitorSettings {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            method: default_method(),
            enabled: true,
            is_paused: false,
            timeout_seconds: default_timeout_seconds(),
            interval_seconds: default_interval_seconds(),
            alert_after_consecutive_failures: default_threshold(),
            alert_email_override: None,
            allowed_status_codes: None,
            run_retention_days: None,
            content_type: None,
            body: None,
            headers: Vec::new(),
            match_rules: Vec::new(),
        }
    }

    /// Trims text fields, upper-cases the method and turns blank optionals into `None`.
    pub fn normalized(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self.url = self.url.trim().to_string();
        self.method = self.method.trim().to_ascii_uppercase();
        self.alert_email_override = blank_to_none(self.alert_email_override);
        self.allowed_status_codes = blank_to_none(self.allowed_status_codes);
        self.content_type = blank_to_none(self.content_type);
        self.body = self.body.filter(|b| !b.is_empty());
        for h in &mut self.headers {
            h.name = h.name.trim().to_string();
        }
        self
    }

    pub fn validate(&self, config: &EngineConfig) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }

        let parsed = url::Url::parse(self.url.trim()).map_err(|e| ConfigError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ConfigError::InvalidUrl {
                url: self.url.clone(),
                reason: "scheme must be http or https".into(),
            });
        }

        let method = self.method.trim();
        if method.is_empty() || Method::from_bytes(method.to_ascii_uppercase().as_bytes()).is_err() {
            return Err(ConfigError::InvalidMethod(self.method.clone()));
        }

        if self.timeout_seconds == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        if !config.is_allowed_interval(self.interval_seconds) {
            let allowed = config
                .allowed_intervals
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ConfigError::IntervalNotAllowed {
                seconds: self.interval_seconds,
                allowed,
            });
        }

        if !(MIN_ALERT_THRESHOLD..=MAX_ALERT_THRESHOLD).contains(&self.alert_after_consecutive_failures) {
            return Err(ConfigError::ThresholdOutOfRange(self.alert_after_consecutive_failures));
        }

        if let Some(codes) = &self.allowed_status_codes {
            parse_allowed_status_codes(codes)?;
        }

        if let Some(days) = self.run_retention_days {
            if !(1..=MAX_RETENTION_DAYS).contains(&days) {
                return Err(ConfigError::RetentionOutOfRange(days));
            }
        }

        if let Some(email) = self.alert_email_override.as_deref().map(str::trim) {
            if !email.is_empty() && !looks_like_email(email) {
                return Err(ConfigError::InvalidAlertEmail(email.to_string()));
            }
        }

        for h in &self.headers {
            HeaderName::from_bytes(h.name.trim().as_bytes()).map_err(|_| ConfigError::InvalidHeader {
                name: h.name.clone(),
                reason: "not a valid header name".into(),
            })?;
            HeaderValue::from_str(h.value.trim()).map_err(|_| ConfigError::InvalidHeader {
                name: h.name.clone(),
                reason: "value contains invalid characters".into(),
            })?;
        }

        for (index, rule) in self.match_rules.iter().enumerate() {
            if rule.pattern.is_empty() {
                return Err(ConfigError::InvalidMatchRule {
                    index,
                    reason: "pattern must not be empty".into(),
                });
            }
            rule.validate()
                .map_err(|reason| ConfigError::InvalidMatchRule { index, reason })?;
        }

        Ok(())
    }

    /// Compares two definitions ignoring header order.
    pub fn equivalent(&self, other: &MonitorSettings) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.headers.sort();
        b.headers.sort();
        a == b
    }
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn looks_like_email(s: &str) -> bool {
    s.split(',')
        .map(str::trim)
        .all(|addr| matches!(addr.split_once('@'), Some((local, domain)) if !local.is_empty() && domain.contains('.')))
}

/// A stored monitor: its definition plus identity and scheduling bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    pub id: Uuid,
    pub owner_id: String,
    #[serde(flatten)]
    pub settings: MonitorSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl Monitor {
    /// New monitors are due straight away.
    pub fn new(owner_id: impl Into<String>, settings: MonitorSettings, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            settings: settings.normalized(),
            created_at: now,
            updated_at: now,
            next_run_at: Some(now),
            last_run_at: None,
        }
    }

    pub fn is_schedulable(&self) -> bool {
        self.settings.enabled && !self.settings.is_paused
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_schedulable() && self.next_run_at.is_none_or(|next| next <= now)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.settings.interval_seconds))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.settings.timeout_seconds))
    }

    /// Fixed-interval scheduling: the next run is measured from when this one finished.
    pub fn next_run_after(&self, finished_at: DateTime<Utc>) -> DateTime<Utc> {
        finished_at + chrono::Duration::seconds(i64::from(self.settings.interval_seconds))
    }

    pub fn alert_policy(&self, repeat_every: Duration) -> AlertPolicy {
        AlertPolicy::new(self.settings.alert_after_consecutive_failures, repeat_every)
    }

    pub fn check_request(&self) -> CheckRequest {
        let headers = self
            .settings
            .headers
            .iter()
            .map(|h| (h.name.clone(), h.value.clone()))
            .collect();

        CheckRequest {
            url: self.settings.url.clone(),
            method: self.settings.method.clone(),
            headers,
            content_type: self.settings.content_type.clone(),
            body: self.settings.body.clone(),
            timeout: self.timeout(),
            match_rules: MatchRules::new(self.settings.match_rules.clone()),
            allowed_status_codes: self.settings.allowed_status_codes.clone(),
        }
    }
}
