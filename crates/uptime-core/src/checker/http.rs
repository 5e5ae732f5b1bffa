use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response};
use tracing::debug;

use super::matching::all_matched;
use super::status::is_success_status;
use super::{CheckRequest, CheckResult, ProbeErrorKind, UrlChecker, DEFAULT_SNIPPET_LIMIT};

/// reqwest-backed checker with a shared connection pool and a bounded body reader.
#[derive(Debug, Clone)]
pub struct HttpChecker {
    client: Client,
    snippet_limit: usize,
}

impl HttpChecker {
    pub fn new(snippet_limit: usize) -> reqwest::Result<Self> {
        Ok(Self::with_client(Self::build_client()?, snippet_limit))
    }

    pub fn with_client(client: Client, snippet_limit: usize) -> Self {
        Self {
            client,
            snippet_limit,
        }
    }

    pub fn from_config(config: &crate::config::EngineConfig) -> reqwest::Result<Self> {
        Self::new(config.snippet_limit_bytes)
    }

    /// Timeouts are applied per request, so the client itself has none.
    pub fn build_client() -> reqwest::Result<Client> {
        Client::builder()
            .user_agent(concat!("uptime-monitor/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(8)
            .gzip(true)
            .build()
    }

    fn build_request(&self, request: &CheckRequest) -> Result<RequestBuilder, String> {
        let method = Method::from_bytes(request.method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| format!("Invalid HTTP method '{}'", request.method))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.trim().as_bytes())
                .map_err(|_| format!("Invalid header name '{}'", name))?;
            let value = HeaderValue::from_str(value.trim())
                .map_err(|_| format!("Invalid value for header '{}'", name))?;
            headers.append(name, value);
        }
        if let Some(ct) = request.content_type.as_deref().filter(|ct| !ct.trim().is_empty()) {
            let value = HeaderValue::from_str(ct.trim())
                .map_err(|_| format!("Invalid content type '{}'", ct))?;
            headers.insert(CONTENT_TYPE, value);
        }

        let mut builder = self
            .client
            .request(method, &request.url)
            .headers(headers)
            .timeout(request.timeout);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        Ok(builder)
    }

    async fn execute(&self, builder: RequestBuilder, request: &CheckRequest) -> reqwest::Result<CheckResult> {
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());
        let content_length = response.content_length();

        let mut result = CheckResult {
            status_code: Some(status),
            headers,
            content_type,
            content_length,
            ..CheckResult::default()
        };

        let body = match read_limited(response, self.snippet_limit).await {
            Ok(body) => body,
            Err(e) => {
                let kind = classify(&e);
                result.error_kind = Some(kind);
                result.error_message = Some(format!("Failed to read response body: {}", error_chain(&e)));
                return Ok(result);
            }
        };

        result.match_results = request.match_rules.evaluate(&body);
        let status_ok = is_success_status(status, request.allowed_status_codes.as_deref());
        let content_ok = all_matched(&result.match_results);
        result.success = status_ok && content_ok;

        if !status_ok {
            result.error_message = Some(format!("Unexpected status code {}", status));
        } else if !content_ok {
            let failed = result.match_results.iter().filter(|r| !r.matched).count();
            result.error_message = Some(format!(
                "{} of {} match rule(s) failed",
                failed,
                result.match_results.len()
            ));
        }
        result.response_snippet = body;
        Ok(result)
    }
}

#[async_trait]
impl UrlChecker for HttpChecker {
    async fn check(&self, request: &CheckRequest) -> CheckResult {
        let started = Instant::now();

        let builder = match self.build_request(request) {
            Ok(b) => b,
            Err(message) => {
                debug!(url = %request.url, %message, "Rejected check request");
                return CheckResult::failed(ProbeErrorKind::InvalidRequest, message, started.elapsed());
            }
        };

        // The per-request timeout covers connect and headers; the outer one also
        // bounds the body read.
        let outcome = tokio::time::timeout(request.timeout, self.execute(builder, request)).await;
        let elapsed = started.elapsed();

        let mut result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                let kind = classify(&e);
                CheckResult::failed(kind, format!("{} error: {}", kind, error_chain(&e)), elapsed)
            }
            Err(_) => CheckResult::failed(
                ProbeErrorKind::Timeout,
                format!("Request timed out after {}", format_timeout(request.timeout)),
                elapsed,
            ),
        };
        result.duration_ms = elapsed.as_millis() as u64;

        debug!(
            url = %request.url,
            status = ?result.status_code,
            success = result.success,
            duration_ms = result.duration_ms,
            "Check finished"
        );
        result
    }
}

impl Default for HttpChecker {
    fn default() -> Self {
        Self::with_client(Client::new(), DEFAULT_SNIPPET_LIMIT)
    }
}

async fn read_limited(mut response: Response, limit: usize) -> reqwest::Result<String> {
    let mut buf: Vec<u8> = Vec::with_capacity(limit.min(16 * 1024));
    while buf.len() < limit {
        let Some(chunk) = response.chunk().await? else {
            break;
        };
        let remaining = limit - buf.len();
        if chunk.len() > remaining {
            buf.extend_from_slice(&chunk[..remaining]);
        } else {
            buf.extend_from_slice(&chunk);
        }
    }
    Ok(snippet_from_bytes(&buf, limit))
}

/// Lossy UTF-8 decode that never exceeds `limit` bytes. A character split by
/// the byte cap, or widened by replacement, is dropped from the tail.
fn snippet_from_bytes(buf: &[u8], limit: usize) -> String {
    let mut text = String::from_utf8_lossy(buf).into_owned();
    if text.len() > limit {
        let mut end = limit;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

fn collect_headers(map: &HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in map {
        let value = String::from_utf8_lossy(value.as_bytes());
        out.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    out
}

fn classify(e: &reqwest::Error) -> ProbeErrorKind {
    if e.is_timeout() {
        ProbeErrorKind::Timeout
    } else if e.is_connect() {
        ProbeErrorKind::Connection
    } else if e.is_builder() {
        ProbeErrorKind::InvalidRequest
    } else {
        ProbeErrorKind::Protocol
    }
}

fn error_chain(e: &(dyn StdError + 'static)) -> String {
    let mut out = e.to_string();
    let mut source = e.source();
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        source = inner.source();
    }
    out
}

fn format_timeout(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::{MatchRule, MatchRules};
    use wiremock::matchers::{body_string, header, headers, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn checker() -> HttpChecker {
        HttpChecker::new(DEFAULT_SNIPPET_LIMIT).unwrap()
    }

    #[tokio::test]
    async fn captures_status_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-probe", "yes")
                    .set_body_raw("hello world", "text/plain"),
            )
            .mount(&server)
            .await;

        let result = checker()
            .check(&CheckRequest::get(format!("{}/ok", server.uri())))
            .await;
        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(result.status_code, Some(200));
        assert_eq!(result.response_snippet, "hello world");
        assert_eq!(result.headers.get("x-probe").map(String::as_str), Some("yes"));
        assert_eq!(result.content_type.as_deref(), Some("text/plain"));
        assert_eq!(result.content_length, Some(11));
        assert!(result.error_kind.is_none());
    }

    #[test]
    fn snippet_never_exceeds_limit() {
        let euro = "ab€".as_bytes();
        assert_eq!(snippet_from_bytes(&euro[..4], 4), "ab");
        assert_eq!(snippet_from_bytes(euro, 5), "ab€");

        let binary = [0xFFu8; 10];
        let text = snippet_from_bytes(&binary, 10);
        assert!(text.len() <= 10, "{}", text.len());
        assert_eq!(text, "\u{FFFD}\u{FFFD}\u{FFFD}");
    }

    #[tokio::test]
    async fn multibyte_body_is_cut_on_a_char_boundary() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("€€€€"))
            .mount(&server)
            .await;

        let checker = HttpChecker::with_client(HttpChecker::build_client().unwrap(), 10);
        let result = checker.check(&CheckRequest::get(server.uri())).await;
        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(result.response_snippet, "€€€");
    }

    #[tokio::test]
    async fn repeated_header_names_are_all_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(headers("x-tag", vec!["a", "b"]))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let request = CheckRequest::get(server.uri())
            .with_header("X-Tag", "a")
            .with_header("X-Tag", "b");
        let result = checker().check(&request).await;
        assert!(result.success, "{:?}", result.error_message);
    }

    #[tokio::test]
    async fn non_2xx_fails_unless_allowed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = format!("{}/gone", server.uri());
        let denied = checker().check(&CheckRequest::get(&url)).await;
        assert!(!denied.success);
        assert_eq!(denied.status_code, Some(404));
        assert!(denied.error_message.unwrap().contains("404"));

        let allowed = checker()
            .check(&CheckRequest::get(&url).with_allowed_status_codes("404,429"))
            .await;
        assert!(allowed.success);
    }

    #[tokio::test]
    async fn failed_match_rule_fails_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let request = CheckRequest::get(server.uri())
            .with_match_rules(MatchRules::new(vec![MatchRule::contains("Welcome")]));
        let result = checker().check(&request).await;
        assert!(!result.success);
        assert_eq!(result.status_code, Some(200));
        assert_eq!(result.match_results.len(), 1);
        assert!(result.error_message.unwrap().contains("match rule"));
    }

    #[tokio::test]
    async fn sends_method_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("x-token", "abc"))
            .and(header("content-type", "application/json"))
            .and(body_string(r#"{"ping":true}"#))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let request = CheckRequest::get(format!("{}/hook", server.uri()))
            .with_method("post")
            .with_header("X-Token", "abc")
            .with_body(Some("application/json".into()), r#"{"ping":true}"#);
        let result = checker().check(&request).await;
        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(result.status_code, Some(201));
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let request = CheckRequest::get(server.uri()).with_timeout(Duration::from_millis(200));
        let started = Instant::now();
        let result = checker().check(&request).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!result.success);
        assert_eq!(result.status_code, None);
        assert_eq!(result.error_kind, Some(ProbeErrorKind::Timeout));
    }

    #[tokio::test]
    async fn refused_connection_is_reported() {
        let request = CheckRequest::get("http://127.0.0.1:1/").with_timeout(Duration::from_secs(2));
        let result = checker().check(&request).await;
        assert!(!result.success);
        assert_eq!(result.status_code, None);
        assert_eq!(result.error_kind, Some(ProbeErrorKind::Connection));
        assert!(result.error_message.is_some());
    }

    #[tokio::test]
    async fn invalid_method_is_rejected_without_network() {
        let request = CheckRequest::get("http://127.0.0.1:1/").with_method("GE T");
        let result = checker().check(&request).await;
        assert_eq!(result.error_kind, Some(ProbeErrorKind::InvalidRequest));
        assert!(result.error_message.unwrap().contains("Invalid HTTP method"));
    }

    #[tokio::test]
    async fn body_snippet_is_capped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(10_000)))
            .mount(&server)
            .await;

        let checker = HttpChecker::new(1024).unwrap();
        let result = checker.check(&CheckRequest::get(server.uri())).await;
        assert!(result.success);
        assert_eq!(result.response_snippet.len(), 1024);
        assert_eq!(result.content_length, Some(10_000));
    }

    #[test]
    fn timeout_formatting() {
        assert_eq!(format_timeout(Duration::from_secs(10)), "10s");
        assert_eq!(format_timeout(Duration::from_millis(250)), "250ms");
    }
}
