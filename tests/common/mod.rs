//! In-memory fakes for the gateway's ports, shared by the integration tests.
#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header};
use mirage::{
    adapters::{ChannelAuditSink, StaticScenarioResolver, StaticSecretStore},
    config::{PluginSpec, ProxyConfig},
    core::{
        AuditRecord, AuthError, Collaborators, GatewayResponse, GatewayService, RuntimeSnapshot,
    },
    ports::{
        FetchedToken, FixtureResponse, HttpClient, MockLookup, TokenFetcher, TokenRequest,
        TransportError,
    },
};
use tokio::sync::{Notify, mpsc};

/// What the fake upstream does with one request.
#[derive(Clone)]
pub enum Behavior {
    Json(StatusCode, serde_json::Value),
    Status(StatusCode),
    ConnectionError,
    /// Never answers
    Hang,
    /// Waits for the notify, then answers 200 with the given body
    Gated(Arc<Notify>, serde_json::Value),
    /// Waits, then behaves like the inner behaviour
    Delayed(Duration, Box<Behavior>),
    /// Answers with exactly this response
    Response(GatewayResponse),
}

/// A request the fake upstream received.
#[derive(Debug, Clone)]
pub struct Seen {
    pub method: Method,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Scripted upstream: queued behaviours first, then the fallback behaviour.
pub struct FakeUpstream {
    script: Mutex<VecDeque<Behavior>>,
    fallback: Behavior,
    seen: Mutex<Vec<Seen>>,
}

impl FakeUpstream {
    pub fn new(fallback: Behavior) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn ok(body: serde_json::Value) -> Arc<Self> {
        Self::new(Behavior::Json(StatusCode::OK, body))
    }

    pub fn then(self: Arc<Self>, behavior: Behavior) -> Arc<Self> {
        self.script.lock().unwrap().push_back(behavior);
        self
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for FakeUpstream {
    async fn send(&self, req: Request<Bytes>) -> Result<GatewayResponse, TransportError> {
        let (parts, body) = req.into_parts();
        self.seen.lock().unwrap().push(Seen {
            method: parts.method,
            uri: parts.uri.to_string(),
            headers: parts.headers,
            body,
        });
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        respond(behavior).await
    }
}

async fn respond(mut behavior: Behavior) -> Result<GatewayResponse, TransportError> {
    loop {
        return match behavior {
            Behavior::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                behavior = *inner;
                continue;
            }
            Behavior::Json(status, body) => Ok(json(status, &body)),
            Behavior::Status(status) => Ok(GatewayResponse::new(status)),
            Behavior::Response(response) => Ok(response),
            Behavior::ConnectionError => Err(TransportError::Connection("connection refused".to_string())),
            Behavior::Hang => std::future::pending().await,
            Behavior::Gated(gate, body) => {
                gate.notified().await;
                Ok(json(StatusCode::OK, &body))
            }
        };
    }
}

fn json(status: StatusCode, body: &serde_json::Value) -> GatewayResponse {
    GatewayResponse::json(status, body)
}

/// Fixture lookup keyed by exact (method, path, scenario), counting every call.
#[derive(Default)]
pub struct FakeMocks {
    fixtures: HashMap<(Method, String, String), serde_json::Value>,
    lookups: AtomicUsize,
}

impl FakeMocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, method: Method, path: &str, body: serde_json::Value) -> Self {
        self.fixtures
            .insert((method, path.to_string(), "default".to_string()), body);
        self
    }

    pub fn with_scenario(
        mut self,
        scenario: &str,
        method: Method,
        path: &str,
        body: serde_json::Value,
    ) -> Self {
        self.fixtures
            .insert((method, path.to_string(), scenario.to_string()), body);
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MockLookup for FakeMocks {
    async fn lookup(&self, path: &str, method: &Method, scenario: &str) -> Option<FixtureResponse> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let body = self
            .fixtures
            .get(&(method.clone(), path.to_string(), scenario.to_string()))?;
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Some(FixtureResponse {
            status: StatusCode::OK,
            headers,
            body: Bytes::from(serde_json::to_vec(body).unwrap()),
        })
    }
}

/// Token endpoint that takes `delay` to answer and numbers its tokens.
pub struct FakeTokenFetcher {
    calls: AtomicUsize,
    delay: Duration,
    fail: bool,
}

impl FakeTokenFetcher {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail: true,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenFetcher for FakeTokenFetcher {
    async fn fetch(&self, request: &TokenRequest) -> Result<FetchedToken, AuthError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(AuthError::TokenEndpoint(format!(
                "{} returned status 503",
                request.token_endpoint
            )));
        }
        Ok(FetchedToken {
            access_token: mirage::core::Secret::new(format!("token-{n}")),
            expires_in: Some(Duration::from_secs(3600)),
        })
    }
}

/// A gateway wired to fakes, plus handles to inspect them.
pub struct Harness {
    pub gateway: Arc<GatewayService>,
    pub upstream: Arc<FakeUpstream>,
    pub mocks: Arc<FakeMocks>,
    pub tokens: Arc<FakeTokenFetcher>,
    pub scenarios: Arc<StaticScenarioResolver>,
    pub audit: mpsc::UnboundedReceiver<AuditRecord>,
}

impl Harness {
    pub fn new(config: ProxyConfig, plugins: &[PluginSpec], upstream: Arc<FakeUpstream>, mocks: FakeMocks) -> Self {
        Self::with_tokens(
            config,
            plugins,
            upstream,
            mocks,
            FakeTokenFetcher::new(Duration::from_millis(20)),
        )
    }

    pub fn with_tokens(
        config: ProxyConfig,
        plugins: &[PluginSpec],
        upstream: Arc<FakeUpstream>,
        mocks: FakeMocks,
        tokens: Arc<FakeTokenFetcher>,
    ) -> Self {
        let snapshot = RuntimeSnapshot::build(config, plugins).expect("test config must be valid");
        let mocks = Arc::new(mocks);
        let scenarios = Arc::new(StaticScenarioResolver::new("default"));
        let (sink, audit) = ChannelAuditSink::new();
        let gateway = Arc::new(GatewayService::new(
            snapshot,
            Collaborators {
                http_client: upstream.clone(),
                token_fetcher: tokens.clone(),
                secrets: Arc::new(StaticSecretStore::new().with_secret("client-secret", "s3cr3t")),
                mocks: mocks.clone(),
                scenarios: scenarios.clone(),
                audit_sink: Arc::new(sink),
            },
        ));
        Self {
            gateway,
            upstream,
            mocks,
            tokens,
            scenarios,
            audit,
        }
    }

    /// Next audit record, failing the test if none arrives.
    pub async fn next_audit(&mut self) -> AuditRecord {
        tokio::time::timeout(Duration::from_secs(5), self.audit.recv())
            .await
            .expect("audit record expected")
            .expect("audit channel open")
    }

    /// Assert no further audit record shows up.
    pub async fn assert_no_more_audits(&mut self) {
        tokio::task::yield_now().await;
        assert!(self.audit.try_recv().is_err(), "unexpected extra audit record");
    }
}

pub fn body_json(response: &GatewayResponse) -> serde_json::Value {
    serde_json::from_slice(&response.body).expect("JSON body")
}
