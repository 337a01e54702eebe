//! Core gateway orchestration service.
//!
//! The `GatewayService` drives one request through its lifecycle:
//!
//! ```text
//! Received -> PreHooksRun -> Routed -> { MockServed | Forwarding -> Forwarded | FallbackServed }
//!          -> PostHooksRun -> Audited -> Done
//! ```
//!
//! with `Aborted` (a plugin answered) and `Failed` (an error response was
//! produced) as the other terminal states. Every request reads one
//! [`RuntimeSnapshot`] at entry, so a concurrent reload never mixes old and new
//! rules inside a request. `handle` never fails: errors become well-formed JSON
//! responses, and exactly one audit record is emitted per request, including
//! requests whose future is dropped before completion.
use std::sync::Arc;

use arc_swap::ArcSwap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use tracing::Instrument;
use url::Url;

use crate::{
    config::{AuthConfig, AuthScheme, MockMissPolicy, ProxyMode, RouteDecision},
    core::{
        audit::{AuditDecision, AuditEmitter, AuditRecord, PendingAudit, TerminalState},
        auth::{AuthInjector, Credential},
        error::GatewayError,
        exchange::{GatewayRequest, GatewayResponse},
        forwarder::{UpstreamError, UpstreamForwarder},
        matcher::RouteMatch,
        plugins::{PluginContext, StageOutcome},
        runtime::RuntimeSnapshot,
    },
    metrics,
    ports::{AuditSink, HttpClient, MockLookup, ScenarioResolver, SecretStore, TokenFetcher},
    tracing_setup::{create_request_span, create_upstream_span},
};

/// Lifecycle states of a request, logged at debug level on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Received,
    PreHooksRun,
    Routed,
    MockServed,
    Forwarding,
    Forwarded,
    FallbackServed,
    PostHooksRun,
    Audited,
    Done,
    Aborted,
    Failed,
}

struct PhaseTracker {
    phase: Phase,
}

impl PhaseTracker {
    fn new() -> Self {
        tracing::debug!(phase = ?Phase::Received, "Request received");
        Self {
            phase: Phase::Received,
        }
    }

    fn advance(&mut self, next: Phase) {
        tracing::debug!(from = ?self.phase, to = ?next, "Request state transition");
        self.phase = next;
    }
}

/// External collaborators of the gateway, all behind ports.
#[derive(Clone)]
pub struct Collaborators {
    pub http_client: Arc<dyn HttpClient>,
    pub token_fetcher: Arc<dyn TokenFetcher>,
    pub secrets: Arc<dyn SecretStore>,
    pub mocks: Arc<dyn MockLookup>,
    pub scenarios: Arc<dyn ScenarioResolver>,
    pub audit_sink: Arc<dyn AuditSink>,
}

/// Central orchestrator: plugins, routing, mock lookup, auth, forwarding and
/// audit for every request.
pub struct GatewayService {
    snapshot: ArcSwap<RuntimeSnapshot>,
    auth: AuthInjector,
    forwarder: UpstreamForwarder,
    mocks: Arc<dyn MockLookup>,
    scenarios: Arc<dyn ScenarioResolver>,
    audit: AuditEmitter,
}

impl GatewayService {
    pub fn new(snapshot: RuntimeSnapshot, collaborators: Collaborators) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
            auth: AuthInjector::new(collaborators.token_fetcher, collaborators.secrets),
            forwarder: UpstreamForwarder::new(collaborators.http_client),
            mocks: collaborators.mocks,
            scenarios: collaborators.scenarios,
            audit: AuditEmitter::new(collaborators.audit_sink),
        }
    }

    /// The snapshot new requests will use.
    pub fn snapshot(&self) -> Arc<RuntimeSnapshot> {
        self.snapshot.load_full()
    }

    /// Publish a new snapshot. In-flight requests finish on the old one. Cached
    /// credentials are dropped because auth settings may have changed.
    pub async fn reload(&self, snapshot: RuntimeSnapshot) {
        let rules = snapshot.matcher.len();
        let plugins = snapshot.plugins.len();
        self.snapshot.store(Arc::new(snapshot));
        self.auth.reset().await;
        tracing::info!(rules, plugins, "Gateway configuration reloaded");
    }

    pub fn auth(&self) -> &AuthInjector {
        &self.auth
    }

    pub fn scenario(&self) -> String {
        self.scenarios.current_scenario_key()
    }

    /// Handle one request. Never fails.
    pub async fn handle(&self, request: GatewayRequest) -> GatewayResponse {
        let snapshot = self.snapshot.load_full();
        let _timer = metrics::RequestTimer::new(request.method.as_str());
        let (request, correlation_id) = ensure_correlation_id(request, &snapshot.correlation_header);
        let span = create_request_span(request.method.as_str(), request.path(), &correlation_id);

        self.run(snapshot, request, correlation_id)
            .instrument(span)
            .await
    }

    /// Answer a request that was refused before it could be handled, for
    /// example because its body could not be read. Still audited, as `Failed`.
    pub fn reject(&self, method: &Method, uri: &Uri, headers: &HeaderMap, error: GatewayError) -> GatewayResponse {
        let snapshot = self.snapshot.load_full();
        let _timer = metrics::RequestTimer::new(method.as_str());
        let correlation_id =
            inbound_correlation_id(headers, &snapshot.correlation_header).unwrap_or_else(new_correlation_id);
        let span = create_request_span(method.as_str(), uri.path(), &correlation_id);
        let _entered = span.enter();

        let mut pending = PendingAudit::new(
            self.audit.clone(),
            AuditRecord::new(&correlation_id, method, uri.path()),
        );
        tracing::warn!(error = %error, status = error.status().as_u16(), "Request rejected");
        let response = error.to_response(&snapshot.correlation_header, &correlation_id);
        let record = pending.record();
        record.error = Some(error.to_string());
        record.response_status = Some(response.status.as_u16());
        finish(pending, TerminalState::Failed, &response);
        response
    }

    async fn run(
        &self,
        snapshot: Arc<RuntimeSnapshot>,
        request: GatewayRequest,
        correlation_id: String,
    ) -> GatewayResponse {
        let mut pending = PendingAudit::new(
            self.audit.clone(),
            AuditRecord::new(&correlation_id, &request.method, request.path()),
        );
        let mut phase = PhaseTracker::new();
        let mut ctx = PluginContext::new(correlation_id.clone());

        let request = match snapshot
            .plugins
            .run_pre(request, &mut ctx, &mut pending.record().plugin_outcomes)
            .await
        {
            StageOutcome::Completed(request) => request,
            StageOutcome::Aborted {
                plugin,
                response,
                reason,
            } => {
                phase.advance(Phase::Aborted);
                let response = with_correlation_id(response, &snapshot.correlation_header, &correlation_id);
                let record = pending.record();
                record.error = Some(format!("aborted by plugin {plugin}: {reason}"));
                record.response_status = Some(response.status.as_u16());
                finish(pending, TerminalState::Aborted, &response);
                return response;
            }
        };
        phase.advance(Phase::PreHooksRun);

        let scenario = self.scenarios.current_scenario_key();
        let route = snapshot
            .matcher
            .match_request(&request.method, request.path(), &request.headers);
        {
            let record = pending.record();
            record.scenario = Some(scenario.clone());
            record.route_decision = Some(route.decision);
            record.matched_rule_id = route.rule_id().map(str::to_string);
        }
        tracing::debug!(decision = %route.decision, rule = ?route.rule_id(), scenario = %scenario, "Request routed");
        phase.advance(Phase::Routed);

        let served = match route.decision {
            RouteDecision::Mock => {
                self.serve_mock(&snapshot, &route, &request, &scenario, pending.record(), &mut phase)
                    .await
            }
            RouteDecision::Proxy => {
                self.serve_proxy(&snapshot, &route, &request, &scenario, pending.record(), &mut phase)
                    .await
            }
        };

        let (response, mut state) = match served {
            Ok(response) => (response, TerminalState::Done),
            Err(error) => {
                tracing::warn!(error = %error, status = error.status().as_u16(), "Request failed");
                pending.record().error = Some(error.to_string());
                (
                    error.to_response(&snapshot.correlation_header, &correlation_id),
                    TerminalState::Failed,
                )
            }
        };

        let response = match snapshot
            .plugins
            .run_post(response, &mut ctx, &mut pending.record().plugin_outcomes)
            .await
        {
            StageOutcome::Completed(response) => {
                phase.advance(Phase::PostHooksRun);
                response
            }
            StageOutcome::Aborted {
                plugin,
                response,
                reason,
            } => {
                state = TerminalState::Aborted;
                let record = pending.record();
                if record.error.is_none() {
                    record.error = Some(format!("aborted by plugin {plugin}: {reason}"));
                }
                response
            }
        };

        let response = with_correlation_id(response, &snapshot.correlation_header, &correlation_id);
        pending.record().response_status = Some(response.status.as_u16());
        finish(pending, state, &response);

        phase.advance(match state {
            TerminalState::Done => Phase::Audited,
            TerminalState::Aborted => Phase::Aborted,
            TerminalState::Failed => Phase::Failed,
        });
        if state == TerminalState::Done {
            phase.advance(Phase::Done);
        }
        response
    }

    async fn serve_mock(
        &self,
        snapshot: &RuntimeSnapshot,
        route: &RouteMatch<'_>,
        request: &GatewayRequest,
        scenario: &str,
        record: &mut AuditRecord,
        phase: &mut PhaseTracker,
    ) -> Result<GatewayResponse, GatewayError> {
        if let Some(fixture) = self.mocks.lookup(request.path(), &request.method, scenario).await {
            phase.advance(Phase::MockServed);
            record.decision = Some(AuditDecision::Mock);
            return Ok(fixture.into());
        }

        let policy = route
            .rule
            .and_then(|rule| rule.on_mock_miss)
            .unwrap_or(snapshot.config.on_mock_miss);
        if policy == MockMissPolicy::Proxy && snapshot.mode() == ProxyMode::Hybrid {
            tracing::debug!(scenario = %scenario, "No fixture, falling through to upstream");
            return self
                .serve_proxy(snapshot, route, request, scenario, record, phase)
                .await;
        }

        Err(GatewayError::MockLookupMiss {
            method: request.method.to_string(),
            path: request.path().to_string(),
            scenario: scenario.to_string(),
        })
    }

    async fn serve_proxy(
        &self,
        snapshot: &RuntimeSnapshot,
        route: &RouteMatch<'_>,
        request: &GatewayRequest,
        scenario: &str,
        record: &mut AuditRecord,
        phase: &mut PhaseTracker,
    ) -> Result<GatewayResponse, GatewayError> {
        let upstream = route
            .rule
            .and_then(|rule| rule.upstream.as_ref())
            .or(snapshot.upstream.target.as_ref())
            .ok_or(GatewayError::NoUpstream)?;
        let auth = route
            .rule
            .and_then(|rule| rule.auth_override.as_ref())
            .unwrap_or(&snapshot.config.auth);
        let domain = upstream.host_str().unwrap_or_default();

        phase.advance(Phase::Forwarding);
        record.decision = Some(AuditDecision::Proxy);

        let mut result = self
            .forward_with_auth(snapshot, request, upstream, auth, domain, record)
            .await;

        let rejected = match &result {
            Ok((response, credential))
                if response.status == StatusCode::UNAUTHORIZED && auth.scheme() != AuthScheme::None =>
            {
                Some(credential.clone())
            }
            _ => None,
        };
        if let Some(rejected) = rejected {
            self.auth.invalidate(domain, auth, &rejected).await;
            if auth.scheme().is_refreshable() && snapshot.config.retry_on_unauthorized {
                tracing::info!(upstream = %domain, "Upstream rejected credential, retrying with a fresh token");
                result = self
                    .forward_with_auth(snapshot, request, upstream, auth, domain, record)
                    .await;
            }
        }

        match result.map(|(response, _)| response) {
            Ok(response) => {
                phase.advance(Phase::Forwarded);
                if response.status.is_client_error() || response.status.is_server_error() {
                    let error = format!("upstream returned status {}", response.status.as_u16());
                    if response.status == StatusCode::UNAUTHORIZED
                        && let Some(fixture) = self.fallback(snapshot, request, scenario, record, phase).await
                    {
                        record.error = Some(error);
                        return Ok(fixture);
                    }
                    record.error = Some(error);
                }
                Ok(response)
            }
            Err(GatewayError::Upstream(
                error @ (UpstreamError::Timeout { .. } | UpstreamError::Connection { .. }),
            )) => {
                phase.advance(Phase::Forwarded);
                if let Some(fixture) = self.fallback(snapshot, request, scenario, record, phase).await {
                    record.error = Some(error.to_string());
                    return Ok(fixture);
                }
                Err(GatewayError::Upstream(error))
            }
            Err(error) => Err(error),
        }
    }

    /// Resolve and inject the credential, then forward once (with transport
    /// retries). The credential comes back with the response so a 401 can name
    /// the token it rejected.
    async fn forward_with_auth(
        &self,
        snapshot: &RuntimeSnapshot,
        request: &GatewayRequest,
        upstream: &Url,
        auth: &AuthConfig,
        domain: &str,
        record: &mut AuditRecord,
    ) -> Result<(GatewayResponse, Credential), GatewayError> {
        let credential = self.auth.resolve(domain, auth).await?;
        let outgoing = self.auth.inject(request, &credential)?;

        let span = create_upstream_span(domain, request.method.as_str(), request.path());
        let result = self
            .forwarder
            .forward(&outgoing, upstream, &snapshot.upstream)
            .instrument(span.clone())
            .await;

        let (attempts, latency) = match &result {
            Ok(upstream_response) => {
                span.record("http.status_code", upstream_response.response.status.as_u16());
                record.upstream_status = Some(upstream_response.response.status.as_u16());
                (upstream_response.attempts, Some(upstream_response.latency))
            }
            Err(error) => (error.attempts(), error.elapsed()),
        };
        span.record("attempts", attempts);
        record.upstream_attempts += attempts;
        if let Some(latency) = latency {
            let ms = latency.as_millis() as u64;
            record.upstream_latency_ms = Some(record.upstream_latency_ms.unwrap_or(0) + ms);
        }

        result
            .map(|r| (r.response, credential))
            .map_err(GatewayError::from)
    }

    /// Fixture served in place of a failed upstream call, when enabled.
    async fn fallback(
        &self,
        snapshot: &RuntimeSnapshot,
        request: &GatewayRequest,
        scenario: &str,
        record: &mut AuditRecord,
        phase: &mut PhaseTracker,
    ) -> Option<GatewayResponse> {
        if !snapshot.config.fallback_on_error {
            return None;
        }
        let fixture = self.mocks.lookup(request.path(), &request.method, scenario).await?;
        tracing::info!(scenario = %scenario, "Upstream failed, serving fixture instead");
        phase.advance(Phase::FallbackServed);
        record.decision = Some(AuditDecision::ProxyFallbackToMock);
        Some(fixture.into())
    }
}

/// Reuse the inbound correlation id or generate one, and make sure the request
/// carries it upstream.
fn ensure_correlation_id(mut request: GatewayRequest, header: &HeaderName) -> (GatewayRequest, String) {
    let correlation_id = match inbound_correlation_id(&request.headers, header) {
        Some(id) => id,
        None => {
            let id = new_correlation_id();
            if let Ok(value) = HeaderValue::from_str(&id) {
                request.headers.insert(header.clone(), value);
            }
            id
        }
    };
    (request, correlation_id)
}

fn inbound_correlation_id(headers: &HeaderMap, header: &HeaderName) -> Option<String> {
    headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn with_correlation_id(
    mut response: GatewayResponse,
    header: &HeaderName,
    correlation_id: &str,
) -> GatewayResponse {
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        response.headers.insert(header.clone(), value);
    }
    response
}

fn finish(mut pending: PendingAudit, state: TerminalState, response: &GatewayResponse) {
    let decision = pending
        .record()
        .decision
        .map_or("none", AuditDecision::as_str);
    let span = tracing::Span::current();
    span.record("http.status_code", response.status.as_u16());
    span.record("decision", decision);
    metrics::increment_request_total(decision, response.status.as_u16());
    pending.complete(state);
}
