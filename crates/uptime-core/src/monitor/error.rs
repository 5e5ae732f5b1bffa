use thiserror::Error;

use crate::checker::StatusCodeError;

/// Rejections raised when a monitor definition is written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Monitor name must not be empty")]
    EmptyName,
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Invalid HTTP method '{0}'")]
    InvalidMethod(String),
    #[error("Timeout must be greater than zero")]
    ZeroTimeout,
    #[error("Interval of {seconds}s is not allowed (allowed: {allowed})")]
    IntervalNotAllowed { seconds: u32, allowed: String },
    #[error("Alert threshold must be between 1 and 20, got {0}")]
    ThresholdOutOfRange(u32),
    #[error("Invalid allowed status codes: {0}")]
    AllowedStatusCodes(#[from] StatusCodeError),
    #[error("Run retention must be between 1 and 36500 days, got {0}")]
    RetentionOutOfRange(u32),
    #[error("Invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },
    #[error("Match rule {index} is invalid: {reason}")]
    InvalidMatchRule { index: usize, reason: String },
    #[error("Invalid alert email override '{0}'")]
    InvalidAlertEmail(String),
}
