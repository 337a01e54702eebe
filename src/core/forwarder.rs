//! Upstream forwarder: one logical call to the upstream with timeout and retries.
//!
//! Only transport failures (connect/reset, per-attempt timeout) are retried. A
//! response with any status code is final and returned as-is; interpreting it is
//! the orchestrator's job. Dropping the returned future cancels the in-flight
//! attempt and any pending backoff sleep.
use std::{sync::Arc, time::Duration};

use http::{HeaderMap, HeaderName, HeaderValue, Request, Uri, header};
use tokio::time::Instant;
use url::Url;

use crate::{
    config::{ConfigValidator, ProxyConfig, RetryPolicyConfig, ValidationResult},
    core::exchange::{GatewayRequest, GatewayResponse},
    metrics,
    ports::{HttpClient, TransportError},
};

/// Headers that only make sense for a single connection and are never forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Parsed retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryPolicyConfig) -> ValidationResult<Self> {
        Ok(Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: ConfigValidator::parse_duration(
                "retry_policy.backoff_base",
                &config.backoff_base,
            )?,
            backoff_max: ConfigValidator::parse_duration(
                "retry_policy.backoff_max",
                &config.backoff_max,
            )?,
        })
    }

    /// Sleep before retry number `attempt` (1-based count of failed attempts):
    /// `min(base * 2^(attempt-1), max)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.backoff_base
            .checked_mul(1u32 << exponent)
            .map_or(self.backoff_max, |d| d.min(self.backoff_max))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(2),
        }
    }
}

/// Upstream settings compiled from a [`ProxyConfig`].
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// `None` in mock mode
    pub target: Option<Url>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl UpstreamSettings {
    pub fn from_config(config: &ProxyConfig) -> ValidationResult<Self> {
        Ok(Self {
            target: config
                .target_base_url
                .as_deref()
                .map(|u| ConfigValidator::parse_url("proxy.target_base_url", u))
                .transpose()?,
            timeout: ConfigValidator::parse_duration(
                "proxy.default_timeout",
                &config.default_timeout,
            )?,
            retry: RetryPolicy::from_config(&config.retry_policy)?,
        })
    }
}

/// Errors after the retry budget is spent.
#[derive(Debug, thiserror::Error, Clone)]
#[non_exhaustive]
pub enum UpstreamError {
    #[error("upstream timed out after {attempts} attempt(s) ({elapsed:?})")]
    Timeout { elapsed: Duration, attempts: u32 },

    #[error("upstream connection failed after {attempts} attempt(s): {message}")]
    Connection {
        message: String,
        elapsed: Duration,
        attempts: u32,
    },

    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),
}

impl UpstreamError {
    pub fn attempts(&self) -> u32 {
        match self {
            UpstreamError::Timeout { attempts, .. } | UpstreamError::Connection { attempts, .. } => {
                *attempts
            }
            UpstreamError::InvalidRequest(_) => 0,
        }
    }

    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            UpstreamError::Timeout { elapsed, .. } | UpstreamError::Connection { elapsed, .. } => {
                Some(*elapsed)
            }
            UpstreamError::InvalidRequest(_) => None,
        }
    }
}

/// A received upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub response: GatewayResponse,
    pub attempts: u32,
    pub latency: Duration,
}

/// Sends requests upstream through the [`HttpClient`] port.
pub struct UpstreamForwarder {
    client: Arc<dyn HttpClient>,
}

impl UpstreamForwarder {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }

    /// Forward `request` to `upstream`, retrying transport failures per `settings`.
    pub async fn forward(
        &self,
        request: &GatewayRequest,
        upstream: &Url,
        settings: &UpstreamSettings,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let uri = target_uri(upstream, &request.uri)?;
        let headers = forwarded_headers(&request.headers);
        let host = upstream.host_str().unwrap_or("unknown");
        let _timer = metrics::UpstreamTimer::new(host);

        let started = Instant::now();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut outgoing = Request::builder()
                .method(request.method.clone())
                .uri(uri.clone())
                .body(request.body.clone())
                .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))?;
            *outgoing.headers_mut() = headers.clone();

            let failure = match tokio::time::timeout(settings.timeout, self.client.send(outgoing)).await {
                Ok(Ok(response)) => {
                    metrics::increment_upstream_request_total(host, response.status.as_str());
                    tracing::debug!(
                        upstream = %host,
                        status = response.status.as_u16(),
                        attempt,
                        "Upstream responded"
                    );
                    return Ok(UpstreamResponse {
                        response,
                        attempts: attempt,
                        latency: started.elapsed(),
                    });
                }
                Ok(Err(TransportError::InvalidRequest(message))) => {
                    return Err(UpstreamError::InvalidRequest(message));
                }
                Ok(Err(e)) => {
                    metrics::increment_upstream_request_total(host, "connection_error");
                    UpstreamError::Connection {
                        message: e.to_string(),
                        elapsed: started.elapsed(),
                        attempts: attempt,
                    }
                }
                Err(_) => {
                    metrics::increment_upstream_request_total(host, "timeout");
                    UpstreamError::Timeout {
                        elapsed: started.elapsed(),
                        attempts: attempt,
                    }
                }
            };

            if attempt >= settings.retry.max_attempts {
                tracing::warn!(upstream = %host, attempts = attempt, error = %failure, "Upstream retries exhausted");
                return Err(failure);
            }

            let delay = settings.retry.backoff(attempt);
            tracing::debug!(upstream = %host, attempt, delay = ?delay, error = %failure, "Retrying upstream call");
            tokio::time::sleep(delay).await;
        }
    }
}

/// `upstream` base (its path kept as a prefix) joined with the request path and query.
pub fn target_uri(upstream: &Url, request_uri: &Uri) -> Result<Uri, UpstreamError> {
    let mut url = upstream.clone();
    let prefix = upstream.path().trim_end_matches('/');
    url.set_path(&format!("{prefix}{}", request_uri.path()));
    url.set_query(request_uri.query());
    url.as_str()
        .parse::<Uri>()
        .map_err(|e| UpstreamError::InvalidRequest(format!("target URL {url}: {e}")))
}

/// Inbound headers minus hop-by-hop headers, `Host` and `Content-Length`.
/// The client sets the latter two for the outgoing connection. Upstream bodies
/// are requested unencoded so response plugins can read them.
pub fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        out.remove(name);
    }
    for name in HOP_BY_HOP {
        out.remove(name);
    }
    out.remove(header::HOST);
    out.remove(header::CONTENT_LENGTH);
    out.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    out
}
