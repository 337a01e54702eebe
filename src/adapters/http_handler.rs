use std::{convert::Infallible, sync::Arc, time::Instant};

use axum::{
    Router,
    body::{Body as AxumBody, to_bytes},
    extract::Request,
    http::{StatusCode, header},
    routing::any,
};
use hyper::Response;
use tower_http::trace::TraceLayer;

use crate::core::{GatewayError, GatewayRequest, GatewayResponse, GatewayService};

pub const HEALTH_PATH: &str = "/__mirage/health";
pub const STATUS_PATH: &str = "/__mirage/status";

/// Axum-facing adapter: buffers inbound requests and hands them to the gateway.
///
/// Two reserved paths are answered locally; everything else is gateway traffic.
pub struct HttpHandler {
    gateway: Arc<GatewayService>,
    max_body_bytes: usize,
    started: Instant,
}

impl HttpHandler {
    pub fn new(gateway: Arc<GatewayService>, max_body_bytes: usize) -> Self {
        Self {
            gateway,
            max_body_bytes,
            started: Instant::now(),
        }
    }

    /// Router sending every path to [`HttpHandler::handle_request`].
    pub fn router(self: Arc<Self>) -> Router {
        let handler = self.clone();
        let route = any(move |req: Request| {
            let handler = handler.clone();
            async move { Ok::<_, Infallible>(handler.handle_request(req).await) }
        });

        Router::new()
            .route("/", route.clone())
            .route("/{*path}", route)
            .layer(TraceLayer::new_for_http())
    }

    pub async fn handle_request(&self, req: Request) -> Response<AxumBody> {
        match req.uri().path() {
            HEALTH_PATH => self.handle_health_check(),
            STATUS_PATH => self.handle_status(),
            _ => self.handle_gateway_request(req).await,
        }
    }

    fn handle_health_check(&self) -> Response<AxumBody> {
        json_response(
            StatusCode::OK,
            &serde_json::json!({
                "status": "healthy",
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }),
        )
    }

    fn handle_status(&self) -> Response<AxumBody> {
        let snapshot = self.gateway.snapshot();
        json_response(
            StatusCode::OK,
            &serde_json::json!({
                "service": "mirage",
                "version": env!("CARGO_PKG_VERSION"),
                "uptime_secs": self.started.elapsed().as_secs(),
                "mode": snapshot.mode(),
                "rules": snapshot.matcher.len(),
                "plugins": snapshot.plugins.len(),
                "scenario": self.gateway.scenario(),
                "auth_cache_entries": self.gateway.auth().cached_keys(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }),
        )
    }

    async fn handle_gateway_request(&self, req: Request) -> Response<AxumBody> {
        let (parts, body) = req.into_parts();

        let body = match to_bytes(body, self.max_body_bytes).await {
            Ok(body) => body,
            Err(e) => {
                let error = if exceeds_limit(&e) {
                    GatewayError::PayloadTooLarge {
                        limit: self.max_body_bytes,
                    }
                } else {
                    GatewayError::InvalidBody(e.to_string())
                };
                return into_axum(self.gateway.reject(&parts.method, &parts.uri, &parts.headers, error));
            }
        };

        let request = GatewayRequest {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
        };
        into_axum(self.gateway.handle(request).await)
    }
}

fn exceeds_limit(error: &axum::Error) -> bool {
    let mut source = std::error::Error::source(error);
    while let Some(err) = source {
        if err.is::<http_body_util::LengthLimitError>() {
            return true;
        }
        source = err.source();
    }
    false
}

fn json_response(status: StatusCode, value: &serde_json::Value) -> Response<AxumBody> {
    into_axum(GatewayResponse::json(status, value))
}

fn into_axum(response: GatewayResponse) -> Response<AxumBody> {
    let mut out = Response::new(AxumBody::from(response.body));
    *out.status_mut() = response.status;
    *out.headers_mut() = response.headers;
    // Length is recomputed from the buffered body
    out.headers_mut().remove(header::CONTENT_LENGTH);
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::http::Method;
    use bytes::Bytes;
    use http_body_util::BodyExt;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        adapters::{
            ChannelAuditSink, InMemoryFixtureStore, StaticScenarioResolver, StaticSecretStore,
        },
        config::{FixtureConfig, FixturesConfig, ProxyConfig, ProxyMode},
        core::{AuditRecord, AuthError, Collaborators, RuntimeSnapshot, TerminalState},
        ports::{FetchedToken, HttpClient, TokenFetcher, TokenRequest, TransportError},
    };

    struct NoUpstream;

    #[async_trait]
    impl HttpClient for NoUpstream {
        async fn send(&self, _req: hyper::Request<Bytes>) -> Result<GatewayResponse, TransportError> {
            Err(TransportError::Connection("no upstream in tests".to_string()))
        }
    }

    #[async_trait]
    impl TokenFetcher for NoUpstream {
        async fn fetch(&self, _request: &TokenRequest) -> Result<FetchedToken, AuthError> {
            Err(AuthError::TokenEndpoint("no token endpoint in tests".to_string()))
        }
    }

    fn router(max_body_bytes: usize) -> Router {
        audited_router(max_body_bytes).0
    }

    fn audited_router(max_body_bytes: usize) -> (Router, UnboundedReceiver<AuditRecord>) {
        let mut fixtures = FixturesConfig::default();
        fixtures.scenarios.insert(
            "default".to_string(),
            vec![FixtureConfig {
                method: "POST".to_string(),
                path: "/echo".to_string(),
                status: 201,
                headers: Default::default(),
                body: None,
                body_text: Some("created".to_string()),
            }],
        );

        let config = ProxyConfig::builder().mode(ProxyMode::Mock).build();
        let snapshot = RuntimeSnapshot::build(config, &[]).unwrap();
        let (audit_sink, audit) = ChannelAuditSink::new();
        let gateway = GatewayService::new(
            snapshot,
            Collaborators {
                http_client: Arc::new(NoUpstream),
                token_fetcher: Arc::new(NoUpstream),
                secrets: Arc::new(StaticSecretStore::new()),
                mocks: Arc::new(InMemoryFixtureStore::from_config(&fixtures).unwrap()),
                scenarios: Arc::new(StaticScenarioResolver::new("default")),
                audit_sink: Arc::new(audit_sink),
            },
        );
        (
            Arc::new(HttpHandler::new(Arc::new(gateway), max_body_bytes)).router(),
            audit,
        )
    }

    async fn body_json(response: Response<AxumBody>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = router(1024)
            .oneshot(hyper::Request::builder().uri(HEALTH_PATH).body(AxumBody::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_status_endpoint_reports_runtime() {
        let response = router(1024)
            .oneshot(hyper::Request::builder().uri(STATUS_PATH).body(AxumBody::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["mode"], "mock");
        assert_eq!(json["rules"], 0);
        assert_eq!(json["scenario"], "default");
    }

    #[tokio::test]
    async fn test_gateway_traffic_is_served() {
        let response = router(1024)
            .oneshot(
                hyper::Request::builder()
                    .method(Method::POST)
                    .uri("/echo")
                    .body(AxumBody::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().contains_key("x-correlation-id"));
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(bytes, Bytes::from_static(b"created"));
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected_and_audited() {
        let (router, mut audit) = audited_router(4);
        let response = router
            .oneshot(
                hyper::Request::builder()
                    .method(Method::POST)
                    .uri("/echo")
                    .header("x-correlation-id", "big-1")
                    .body(AxumBody::from("far too long"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(response.headers()["x-correlation-id"], "big-1");
        let json = body_json(response).await;
        assert_eq!(json["error"], "payload_too_large");
        assert_eq!(json["correlation_id"], "big-1");

        let record = tokio::time::timeout(std::time::Duration::from_secs(5), audit.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.correlation_id, "big-1");
        assert_eq!(record.method, "POST");
        assert_eq!(record.path, "/echo");
        assert_eq!(record.terminal_state, TerminalState::Failed);
        assert_eq!(record.response_status, Some(413));
        assert_eq!(record.decision, None);
        assert_eq!(record.error.as_deref(), Some("request body exceeds 4 bytes"));
        assert!(audit.try_recv().is_err());
    }
}
