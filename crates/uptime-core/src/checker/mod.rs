mod http;
pub mod matching;
pub mod status;

pub use http::HttpChecker;
pub use matching::{all_matched, MatchMode, MatchResult, MatchRule, MatchRules};
pub use status::{is_success_status, parse_allowed_status_codes, StatusCodeError};

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Default cap on how much of a response body is kept.
pub const DEFAULT_SNIPPET_LIMIT: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorKind {
    Timeout,
    Connection,
    Protocol,
    InvalidRequest,
}

impl fmt::Display for ProbeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Connection => write!(f, "connection"),
            Self::Protocol => write!(f, "protocol"),
            Self::InvalidRequest => write!(f, "invalid request"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub url: String,
    pub method: String,
    /// Sent in order; repeated names are sent as repeated headers.
    pub headers: Vec<(String, String)>,
    pub content_type: Option<String>,
    pub body: Option<String>,
    pub timeout: Duration,
    pub match_rules: MatchRules,
    pub allowed_status_codes: Option<String>,
}

impl CheckRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: Vec::new(),
            content_type: None,
            body: None,
            timeout: Duration::from_secs(30),
            match_rules: MatchRules::none(),
            allowed_status_codes: None,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, content_type: Option<String>, body: impl Into<String>) -> Self {
        self.content_type = content_type;
        self.body = Some(body.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_match_rules(mut self, rules: MatchRules) -> Self {
        self.match_rules = rules;
        self
    }

    pub fn with_allowed_status_codes(mut self, codes: impl Into<String>) -> Self {
        self.allowed_status_codes = Some(codes.into());
        self
    }
}

/// Outcome of a single probe. Network failures are represented here, never as `Err`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub success: bool,
    pub match_results: Vec<MatchResult>,
    pub response_snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ProbeErrorKind>,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    pub duration_ms: u64,
}

impl CheckResult {
    pub fn failed(kind: ProbeErrorKind, message: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            error_kind: Some(kind),
            duration_ms: duration.as_millis() as u64,
            ..Self::default()
        }
    }
}

/// Performs one HTTP probe.
///
/// Implementations must honour `request.timeout` as a hard deadline and
/// report every failure through [`CheckResult`]. The trait is object-safe
/// and Send + Sync so a single checker can be shared across scheduler tasks.
#[async_trait]
pub trait UrlChecker: Send + Sync {
    async fn check(&self, request: &CheckRequest) -> CheckResult;
}
