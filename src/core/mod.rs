pub mod audit;
pub mod auth;
pub mod error;
pub mod exchange;
pub mod forwarder;
pub mod gateway;
pub mod matcher;
pub mod plugins;
pub mod runtime;

pub use audit::{AuditDecision, AuditRecord, TerminalState};
pub use auth::{AuthError, AuthInjector, Credential, Secret};
pub use error::GatewayError;
pub use exchange::{GatewayRequest, GatewayResponse};
pub use forwarder::{RetryPolicy, UpstreamError, UpstreamForwarder, UpstreamSettings};
pub use gateway::{Collaborators, GatewayService};
pub use matcher::{RouteMatch, RuleMatcher};
pub use plugins::{Plugin, PluginChain, PluginContext, PluginOutcome};
pub use runtime::RuntimeSnapshot;
