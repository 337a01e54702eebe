//! Lightweight metrics helpers for Mirage.
//!
//! This module exposes a small set of convenience functions and RAII timers
//! wrapping the `metrics` crate macros. No exporter is embedded; the embedding
//! application installs whatever recorder it prefers.
//!
//! Provided metrics (labels vary by family):
//! * `mirage_requests_total` (counter: decision, status)
//! * `mirage_request_duration_seconds` (histogram: method)
//! * `mirage_upstream_requests_total` (counter: upstream, status)
//! * `mirage_upstream_duration_seconds` (histogram: upstream)
//! * `mirage_token_refresh_total` (counter: outcome)
//! * `mirage_plugin_aborts_total` (counter: stage, plugin)
use std::time::{Duration, Instant};

use metrics::{Unit, counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::Lazy;

pub const MIRAGE_REQUESTS_TOTAL: &str = "mirage_requests_total";
pub const MIRAGE_REQUEST_DURATION_SECONDS: &str = "mirage_request_duration_seconds";
pub const MIRAGE_UPSTREAM_REQUESTS_TOTAL: &str = "mirage_upstream_requests_total";
pub const MIRAGE_UPSTREAM_DURATION_SECONDS: &str = "mirage_upstream_duration_seconds";
pub const MIRAGE_TOKEN_REFRESH_TOTAL: &str = "mirage_token_refresh_total";
pub const MIRAGE_PLUGIN_ABORTS_TOTAL: &str = "mirage_plugin_aborts_total";

static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        MIRAGE_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of requests handled by the gateway, by routing decision."
    );
    describe_histogram!(
        MIRAGE_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "End-to-end latency of requests handled by the gateway."
    );
    describe_counter!(
        MIRAGE_UPSTREAM_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of upstream attempts, by upstream host and outcome."
    );
    describe_histogram!(
        MIRAGE_UPSTREAM_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of upstream calls including retries."
    );
    describe_counter!(
        MIRAGE_TOKEN_REFRESH_TOTAL,
        Unit::Count,
        "OAuth2 token endpoint calls, by outcome."
    );
    describe_counter!(
        MIRAGE_PLUGIN_ABORTS_TOTAL,
        Unit::Count,
        "Requests short-circuited by a plugin, by stage and plugin."
    );
});

/// Increment the total request counter once a request reaches a terminal state.
pub fn increment_request_total(decision: &str, status: u16) {
    counter!(
        MIRAGE_REQUESTS_TOTAL,
        "decision" => decision.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a completed inbound request's duration.
pub fn record_request_duration(method: &str, duration: Duration) {
    histogram!(
        MIRAGE_REQUEST_DURATION_SECONDS,
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Count one upstream attempt. `status` is the status code or a transport
/// failure label such as `timeout`.
pub fn increment_upstream_request_total(upstream: &str, status: &str) {
    counter!(
        MIRAGE_UPSTREAM_REQUESTS_TOTAL,
        "upstream" => upstream.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a completed upstream call duration.
pub fn record_upstream_duration(upstream: &str, duration: Duration) {
    histogram!(
        MIRAGE_UPSTREAM_DURATION_SECONDS,
        "upstream" => upstream.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn increment_token_refresh(outcome: &str) {
    counter!(MIRAGE_TOKEN_REFRESH_TOTAL, "outcome" => outcome.to_string()).increment(1);
}

pub fn increment_plugin_abort(stage: &str, plugin: &str) {
    counter!(
        MIRAGE_PLUGIN_ABORTS_TOTAL,
        "stage" => stage.to_string(),
        "plugin" => plugin.to_string()
    )
    .increment(1);
}

/// RAII helper measuring inbound request duration.
pub struct RequestTimer {
    start: Instant,
    method: String,
}

impl RequestTimer {
    pub fn new(method: &str) -> Self {
        Self {
            start: Instant::now(),
            method: method.to_string(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        record_request_duration(&self.method, self.start.elapsed());
    }
}

/// RAII helper measuring an upstream call, retries included.
pub struct UpstreamTimer {
    start: Instant,
    upstream: String,
}

impl UpstreamTimer {
    pub fn new(upstream: &str) -> Self {
        Self {
            start: Instant::now(),
            upstream: upstream.to_string(),
        }
    }
}

impl Drop for UpstreamTimer {
    fn drop(&mut self) {
        record_upstream_duration(&self.upstream, self.start.elapsed());
    }
}

/// Initialize metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    tracing::info!("Initializing Mirage metrics descriptions");
    Lazy::force(&DESCRIPTIONS);
    Ok(())
}
