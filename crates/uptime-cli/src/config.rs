//! TOML configuration file schema and parsing.
//!
//! Example config file:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//! log_format = "json"
//!
//! [engine]
//! tick_interval_ms = 5000
//! max_concurrent_checks = 16
//! default_retention_days = 90
//! repeat_failure_alert_hours = 24
//! notify_timeout_secs = 60
//!
//! [[webhook]]
//! url = "https://hooks.example.com/uptime"
//! events = ["failure", "recovered"]
//! secret = "shared-secret"
//!
//! [accounts.acme]
//! retention_days = 30
//!
//! [[monitor]]
//! owner = "acme"
//! name = "Storefront"
//! url = "https://shop.example.com/health"
//! interval_seconds = 60
//! alert_after_consecutive_failures = 3
//! allowed_status_codes = "401;403"
//! headers = { "X-Api-Key" = "k" }
//! match_rules = [{ mode = "contains", pattern = "ok" }]
//! ```

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use uptime_core::{EngineConfig, Header, MatchRule, MonitorSettings, WebhookConfig, MAX_RETENTION_DAYS};

pub const DEFAULT_OWNER: &str = "default";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub webhook: Vec<WebhookConfig>,

    #[serde(default)]
    pub accounts: BTreeMap<String, AccountConfig>,

    #[serde(default)]
    pub monitor: Vec<MonitorDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_format: default_log_format(),
        }
    }
}

pub fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_log_format() -> String {
    "pretty".into()
}

/// Overrides for [`EngineConfig`]. Anything left out keeps the engine default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineSection {
    pub tick_interval_ms: Option<u64>,
    pub allowed_intervals: Option<Vec<u32>>,
    pub default_retention_days: Option<u32>,
    pub repeat_failure_alert_hours: Option<u64>,
    pub max_concurrent_checks: Option<usize>,
    pub lease_grace_secs: Option<u64>,
    pub notify_timeout_secs: Option<u64>,
    pub snippet_limit_bytes: Option<usize>,
}

impl EngineSection {
    pub fn to_engine_config(&self) -> EngineConfig {
        let mut c = EngineConfig::default();
        if let Some(ms) = self.tick_interval_ms {
            c = c.with_tick_interval(Duration::from_millis(ms));
        }
        if let Some(v) = &self.allowed_intervals {
            c = c.with_allowed_intervals(v.clone());
        }
        if let Some(v) = self.default_retention_days {
            c = c.with_default_retention_days(v);
        }
        if let Some(h) = self.repeat_failure_alert_hours {
            c = c.with_repeat_failure_alert_every(Duration::from_secs(h * 60 * 60));
        }
        if let Some(v) = self.max_concurrent_checks {
            c = c.with_max_concurrent_checks(v);
        }
        if let Some(s) = self.lease_grace_secs {
            c = c.with_lease_grace(Duration::from_secs(s));
        }
        if let Some(s) = self.notify_timeout_secs {
            c = c.with_notify_timeout(Duration::from_secs(s));
        }
        if let Some(v) = self.snippet_limit_bytes {
            c = c.with_snippet_limit_bytes(v);
        }
        c
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub retention_days: Option<u32>,
}

/// A monitor seeded at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorDef {
    #[serde(default = "default_owner")]
    pub owner: String,
    pub name: String,
    pub url: String,
    pub method: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub paused: bool,
    pub timeout_seconds: Option<u32>,
    pub interval_seconds: Option<u32>,
    pub alert_after_consecutive_failures: Option<u32>,
    pub alert_email_override: Option<String>,
    pub allowed_status_codes: Option<String>,
    pub run_retention_days: Option<u32>,
    pub content_type: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub match_rules: Vec<MatchRule>,
}

fn default_owner() -> String {
    DEFAULT_OWNER.into()
}

fn default_true() -> bool {
    true
}

impl MonitorDef {
    pub fn to_settings(&self) -> MonitorSettings {
        let mut settings = MonitorSettings::new(&self.name, &self.url);
        if let Some(m) = &self.method {
            settings.method = m.clone();
        }
        settings.enabled = self.enabled;
        settings.is_paused = self.paused;
        if let Some(v) = self.timeout_seconds {
            settings.timeout_seconds = v;
        }
        if let Some(v) = self.interval_seconds {
            settings.interval_seconds = v;
        }
        if let Some(v) = self.alert_after_consecutive_failures {
            settings.alert_after_consecutive_failures = v;
        }
        settings.alert_email_override = self.alert_email_override.clone();
        settings.allowed_status_codes = self.allowed_status_codes.clone();
        settings.run_retention_days = self.run_retention_days;
        settings.content_type = self.content_type.clone();
        settings.body = self.body.clone();
        settings.headers = self.headers.iter().map(|(k, v)| Header::new(k, v)).collect();
        settings.match_rules = self.match_rules.clone();
        settings.normalized()
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        for (i, wh) in self.webhook.iter().enumerate() {
            url::Url::parse(&wh.url)
                .map_err(|e| format!("Invalid webhook URL at index {}: {} ({})", i, wh.url, e))?;
        }

        if self.engine.allowed_intervals.as_ref().is_some_and(|v| v.is_empty()) {
            return Err("engine.allowed_intervals must not be empty".into());
        }
        if let Some(days) = self.engine.default_retention_days.filter(|d| !valid_retention(*d)) {
            return Err(format!(
                "engine.default_retention_days must be between 1 and {}, got {}",
                MAX_RETENTION_DAYS, days
            ));
        }

        for (owner, account) in &self.accounts {
            if let Some(days) = account.retention_days.filter(|d| !valid_retention(*d)) {
                return Err(format!(
                    "accounts.{}.retention_days must be between 1 and {}, got {}",
                    owner, MAX_RETENTION_DAYS, days
                ));
            }
        }

        let engine = self.engine.to_engine_config();
        let mut seen = HashSet::new();
        for (i, m) in self.monitor.iter().enumerate() {
            let settings = m.to_settings();
            settings.validate(&engine)
                .map_err(|e| format!("Invalid monitor '{}' at index {}: {}", m.name, i, e))?;
            if !seen.insert((m.owner.as_str(), settings.name.clone())) {
                return Err(format!("Duplicate monitor name '{}' for owner '{}'", settings.name, m.owner));
            }
        }

        match self.server.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(format!(
                    "Invalid log_format '{}': must be 'pretty' or 'json'",
                    other
                ));
            }
        }

        Ok(())
    }
}

fn valid_retention(days: u32) -> bool {
    (1..=MAX_RETENTION_DAYS).contains(&days)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uptime_core::MatchMode;

    #[test]
    fn parse_minimal_config() {
        let toml = r#"
[[monitor]]
name = "home"
url = "https://example.com"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.monitor.len(), 1);
        assert_eq!(config.monitor[0].owner, "default");
        assert_eq!(config.server.log_format, "pretty");
        assert_eq!(config.server.listen.port(), 8080);

        let settings = config.monitor[0].to_settings();
        assert_eq!(settings.method, "GET");
        assert_eq!(settings.interval_seconds, 300);
        assert!(settings.enabled);

        let engine = config.engine.to_engine_config();
        assert_eq!(engine.default_retention_days, 90);
        assert_eq!(engine.tick_interval, Duration::from_secs(5));
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[server]
listen = "127.0.0.1:9090"
log_format = "json"

[engine]
tick_interval_ms = 1000
allowed_intervals = [60, 30]
default_retention_days = 14
repeat_failure_alert_hours = 6
max_concurrent_checks = 2
lease_grace_secs = 5
notify_timeout_secs = 20

[[webhook]]
url = "https://hooks.example.com/alerts"
events = ["failure", "recovered"]
secret = "my-key"

[accounts.acme]
retention_days = 30

[[monitor]]
owner = "acme"
name = "api"
url = "https://api.example.com/health"
method = "post"
interval_seconds = 30
alert_after_consecutive_failures = 3
allowed_status_codes = "401;403"
content_type = "application/json"
body = '{"ping":true}'
headers = { "X-Api-Key" = "k" }
match_rules = [
  { mode = "contains", pattern = "ok" },
  { mode = "regex", pattern = 'v\d+' },
]

[[monitor]]
name = "paused"
url = "https://example.com"
interval_seconds = 60
paused = true
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.listen.port(), 9090);
        assert_eq!(config.server.log_format, "json");
        assert_eq!(config.webhook[0].events, vec!["failure", "recovered"]);
        assert_eq!(config.webhook[0].secret.as_deref(), Some("my-key"));
        assert_eq!(config.accounts["acme"].retention_days, Some(30));

        let engine = config.engine.to_engine_config();
        assert_eq!(engine.tick_interval, Duration::from_secs(1));
        assert_eq!(engine.allowed_intervals, vec![30, 60]);
        assert_eq!(engine.default_retention_days, 14);
        assert_eq!(engine.repeat_failure_alert_every, Duration::from_secs(6 * 3600));
        assert_eq!(engine.max_concurrent_checks, 2);
        assert_eq!(engine.lease_grace, Duration::from_secs(5));
        assert_eq!(engine.notify_timeout, Duration::from_secs(20));

        let settings = config.monitor[0].to_settings();
        assert_eq!(settings.method, "POST");
        assert_eq!(settings.headers, vec![Header::new("X-Api-Key", "k")]);
        assert_eq!(settings.match_rules.len(), 2);
        assert_eq!(settings.match_rules[1].mode, MatchMode::Regex);
        assert!(config.monitor[1].to_settings().is_paused);
    }

    #[test]
    fn validate_rejects_interval_outside_allowed_set() {
        let toml = r#"
[engine]
allowed_intervals = [60]

[[monitor]]
name = "m"
url = "https://example.com"
interval_seconds = 30
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid monitor 'm' at index 0"), "{}", err);
    }

    #[test]
    fn validate_rejects_bad_status_codes() {
        let toml = r#"
[[monitor]]
name = "m"
url = "https://example.com"
allowed_status_codes = "404,700"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("700"), "{}", err);
    }

    #[test]
    fn validate_rejects_duplicate_monitor_names() {
        let toml = r#"
[[monitor]]
name = "same"
url = "https://a.example.com"

[[monitor]]
name = "same"
url = "https://b.example.com"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Duplicate monitor name"), "{}", err);
    }

    #[test]
    fn same_name_under_different_owners_is_fine() {
        let toml = r#"
[[monitor]]
owner = "a"
name = "same"
url = "https://a.example.com"

[[monitor]]
owner = "b"
name = "same"
url = "https://b.example.com"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_zero_account_retention() {
        let toml = r#"
[accounts.acme]
retention_days = 0
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("accounts.acme.retention_days"), "{}", err);
    }

    #[test]
    fn validate_rejects_unbounded_retention() {
        let toml = r#"
[engine]
default_retention_days = 200000000
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("engine.default_retention_days"), "{}", err);

        let toml = r#"
[accounts.acme]
retention_days = 4000000000
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("between 1 and 36500"), "{}", err);
    }

    #[test]
    fn validate_rejects_invalid_webhook_url() {
        let toml = r#"
[[webhook]]
url = "not-valid"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid webhook URL"), "{}", err);
    }

    #[test]
    fn validate_rejects_invalid_log_format() {
        let toml = r#"
[server]
log_format = "xml"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid log_format"), "{}", err);
    }
}
