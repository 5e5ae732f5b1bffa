//! Alert delivery.
//!
//! The scheduler hands every non-`None` [`AlertDecision`] to a [`Notifier`]
//! and waits for the outcome: the alert state only records an alert as sent
//! once the notifier returns `Ok`. [`WebhookNotifier`] POSTs a signed JSON
//! payload to every configured endpoint; [`LogNotifier`] just logs.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alerting::{AlertDecision, AlertState};
use crate::monitor::{Monitor, MonitorRun};

pub const SIGNATURE_HEADER: &str = "X-Uptime-Signature-256";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Failed to serialize notification: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{failed} of {total} webhook(s) failed: {}", .errors.join("; "))]
    Delivery {
        failed: usize,
        total: usize,
        errors: Vec<String>,
    },
}

/// One alert, with everything a channel needs to address and render it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertNotification {
    pub kind: AlertDecision,
    pub monitor_id: Uuid,
    pub monitor_name: String,
    pub url: String,
    pub owner_id: String,
    /// Recipient override; when `None` the owner's default recipient applies.
    pub alert_email_override: Option<String>,
    /// Stable for the lifetime of one incident, so recoveries can be de-duplicated.
    pub incident_id: u64,
    pub consecutive_failures: u32,
    pub incident_opened_at: Option<DateTime<Utc>>,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AlertNotification {
    /// `before` is the persisted state the decision was made from. A recovery
    /// reports the streak it ended, which only `before` still holds.
    pub fn new(
        monitor: &Monitor,
        kind: AlertDecision,
        before: &AlertState,
        after: &AlertState,
        run: &MonitorRun,
    ) -> Self {
        let (consecutive_failures, incident_opened_at) = match kind {
            AlertDecision::Recovered => (before.consecutive_failures, before.failure_incident_opened_at),
            _ => (after.consecutive_failures, after.failure_incident_opened_at),
        };

        Self {
            kind,
            monitor_id: monitor.id,
            monitor_name: monitor.settings.name.clone(),
            url: monitor.settings.url.clone(),
            owner_id: monitor.owner_id.clone(),
            alert_email_override: monitor.settings.alert_email_override.clone(),
            incident_id: after.incident_id,
            consecutive_failures,
            incident_opened_at,
            status_code: run.status_code,
            error_message: run.error_message.clone(),
            timestamp: run.finished_at,
        }
    }

    pub fn notification_type(&self) -> &'static str {
        self.kind.notification_type()
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &AlertNotification) -> Result<(), NotifyError>;
}

/// Configuration for a single webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// The URL to POST payloads to.
    pub url: String,

    /// Which notification types to deliver. Empty means all.
    #[serde(default)]
    pub events: Vec<String>,

    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_webhook_retries")]
    pub max_retries: u32,

    /// Optional HMAC-SHA256 signing secret for the `X-Uptime-Signature-256` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

fn default_webhook_timeout_ms() -> u64 {
    5000
}

fn default_webhook_retries() -> u32 {
    2
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            events: Vec::new(),
            timeout_ms: default_webhook_timeout_ms(),
            max_retries: default_webhook_retries(),
            secret: None,
        }
    }

    pub fn accepts(&self, notification_type: &str) -> bool {
        if self.events.is_empty() {
            return true;
        }
        self.events.iter().any(|e| e == notification_type)
    }
}

/// The JSON envelope POSTed to webhook endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub version: u8,
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub monitor_id: Uuid,
    pub incident_id: u64,
    pub data: serde_json::Value,
}

impl WebhookPayload {
    pub fn from_notification(n: &AlertNotification) -> Self {
        Self {
            version: 1,
            id: Uuid::new_v4().to_string(),
            timestamp: n.timestamp,
            notification_type: n.notification_type().to_string(),
            monitor_id: n.monitor_id,
            incident_id: n.incident_id,
            data: serde_json::json!({
                "monitor_name": n.monitor_name,
                "url": n.url,
                "owner_id": n.owner_id,
                "alert_email_override": n.alert_email_override,
                "consecutive_failures": n.consecutive_failures,
                "incident_opened_at": n.incident_opened_at,
                "status_code": n.status_code,
                "error_message": n.error_message,
            }),
        }
    }
}

pub struct WebhookNotifier {
    webhooks: Vec<WebhookConfig>,
    client: Client,
    backoff_base: Duration,
}

impl WebhookNotifier {
    pub fn new(webhooks: Vec<WebhookConfig>, client: Client) -> Self {
        Self {
            webhooks,
            client,
            backoff_base: Duration::from_millis(500),
        }
    }

    /// First retry delay; later retries double it.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn webhooks(&self) -> &[WebhookConfig] {
        &self.webhooks
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    /// Succeeds only when every endpoint that accepts this notification type
    /// took it. With no accepting endpoint there is nothing to deliver.
    async fn notify(&self, notification: &AlertNotification) -> Result<(), NotifyError> {
        let notification_type = notification.notification_type();
        let targets: Vec<&WebhookConfig> = self.webhooks.iter().filter(|wh| wh.accepts(notification_type)).collect();
        if targets.is_empty() {
            debug!(notification_type, "No webhook accepts notification");
            return Ok(());
        }

        let payload = WebhookPayload::from_notification(notification);
        let json_bytes = serde_json::to_vec(&payload)?;

        let deliveries = targets.iter().map(|wh| {
            let body = json_bytes.as_slice();
            async move {
                let result = deliver(
                    &self.client,
                    &wh.url,
                    body,
                    wh.secret.as_deref(),
                    Duration::from_millis(wh.timeout_ms),
                    wh.max_retries,
                    self.backoff_base,
                )
                .await;
                match &result {
                    Ok(()) => debug!(url = %wh.url, notification_type, "Webhook delivered"),
                    Err(e) => warn!(url = %wh.url, notification_type, error = %e, "Webhook delivery failed"),
                }
                result
            }
        });

        let errors: Vec<String> = futures::future::join_all(deliveries)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(NotifyError::Delivery {
                failed: errors.len(),
                total: targets.len(),
                errors,
            })
        }
    }
}

/// Logs alerts instead of delivering them. Used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, n: &AlertNotification) -> Result<(), NotifyError> {
        info!(
            monitor_id = %n.monitor_id,
            monitor = %n.monitor_name,
            url = %n.url,
            incident_id = n.incident_id,
            consecutive_failures = n.consecutive_failures,
            status_code = ?n.status_code,
            error = n.error_message.as_deref().unwrap_or(""),
            "Alert {}",
            n.kind
        );
        Ok(())
    }
}

async fn deliver(
    client: &Client,
    url: &str,
    body: &[u8],
    secret: Option<&str>,
    timeout: Duration,
    max_retries: u32,
    backoff_base: Duration,
) -> Result<(), String> {
    let mut last_error = String::new();

    for attempt in 0..=max_retries {
        if attempt > 0 {
            tokio::time::sleep(backoff_base * 2u32.saturating_pow(attempt - 1)).await;
        }

        let mut req = client
            .post(url)
            .header("Content-Type", "application/json")
            .header("User-Agent", concat!("uptime-monitor/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .body(body.to_vec());

        if let Some(secret) = secret {
            req = req.header(SIGNATURE_HEADER, format!("sha256={}", sign_payload(body, secret)));
        }

        match req.send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => {
                let status = resp.status();
                last_error = format!("HTTP {} from {}", status, url);
                if status.is_client_error() && status.as_u16() != 429 {
                    return Err(last_error);
                }
            }
            Err(e) => {
                last_error = format!("Request to {} failed: {}", url, e);
            }
        }
    }

    Err(last_error)
}

pub fn sign_payload(body: &[u8], secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
