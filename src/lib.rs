//! Mirage - a hybrid mock/proxy API gateway.
//!
//! For every inbound request Mirage decides whether to answer from local fixture
//! data, forward to a live upstream, or forward and fall back to a fixture when the
//! upstream fails. Around that decision it injects per-upstream credentials and runs
//! an ordered plugin chain.
//!
//! # Features
//! - Ordered route rules (path glob or regex, methods, header predicates); first match wins
//! - `mock`, `proxy` and `hybrid` operating modes with explicit mock-miss behaviour
//! - API key, static bearer, basic and OAuth2 client-credentials auth, with single-flight
//!   token refresh under concurrency
//! - Per-attempt upstream timeouts with exponential backoff retries
//! - Pre-request / post-response plugin chain (redaction, header mutation, guards)
//! - Exactly one audit record per request, including cancelled requests
//! - Live configuration hot-reload with validation; in-flight requests keep their snapshot
//! - Metrics through the `metrics` facade & structured tracing via `tracing`
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use mirage::{
//!     adapters::{
//!         HttpClientAdapter, InMemoryFixtureStore, ReqwestTokenFetcher, StaticScenarioResolver,
//!         StaticSecretStore, TracingAuditSink,
//!     },
//!     core::{Collaborators, GatewayService, RuntimeSnapshot},
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let cfg = mirage::config::load_config("mirage.toml").await?;
//! let snapshot = RuntimeSnapshot::build(cfg.proxy.clone(), &cfg.plugins)?;
//! let gateway = Arc::new(GatewayService::new(
//!     snapshot,
//!     Collaborators {
//!         http_client: Arc::new(HttpClientAdapter::new()?),
//!         token_fetcher: Arc::new(ReqwestTokenFetcher::new(std::time::Duration::from_secs(10))?),
//!         secrets: Arc::new(StaticSecretStore::new()),
//!         mocks: Arc::new(InMemoryFixtureStore::from_config(&cfg.fixtures)?),
//!         scenarios: Arc::new(StaticScenarioResolver::new(&cfg.fixtures.active_scenario)),
//!         audit_sink: Arc::new(TracingAuditSink),
//!     },
//! ));
//! // Wire it into the HttpHandler adapter (see the binary crate)
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! routing, auth, forwarding and plugin logic inside `core`. The mock lookup, scenario
//! resolver, audit sink, token endpoint and secret store are all ports, so the gateway can
//! be embedded with different backends.
//!
//! # Error Handling
//! Library layers use `thiserror` enums; application edges return `eyre::Result<T>` with
//! `WrapErr` context. `GatewayService::handle` never fails: every error becomes a JSON
//! response carrying the correlation id.
//!
//! # Concurrency & Data Structures
//! The compiled configuration is published through `arc_swap`. The token cache is an
//! `scc::HashMap` whose slots are read lock-free.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{HttpClientAdapter, HttpHandler},
    core::{GatewayService, RuntimeSnapshot},
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
