//! Plugin chain run before routing and after a response is produced.
//!
//! Plugins are ordered per stage by ascending priority (ties keep registration
//! order). Each plugin sees the output of the previous one and may continue,
//! replace the value, or abort with a response of its own. The chain holds no
//! per-request state; everything request scoped lives in [`PluginContext`].

pub mod chain;
pub mod guard;
pub mod headers;
pub mod redact;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
pub use chain::{PluginChain, StageOutcome};
pub use guard::{DenyPlugin, RequireHeaderPlugin};
pub use headers::HeadersPlugin;
pub use redact::RedactFieldsPlugin;
use serde::Serialize;

use crate::{
    config::{PluginKind, PluginStage, ValidationResult},
    core::exchange::{GatewayRequest, GatewayResponse},
};

/// Result of running one plugin on a value of type `T`.
#[derive(Debug, Clone)]
pub enum PluginOutcome<T> {
    /// Leave the value untouched
    Continue,
    /// Use this value from now on
    Replace(T),
    /// Stop the stage and answer with `response`
    Abort {
        response: GatewayResponse,
        reason: String,
    },
}

/// Request-scoped data shared by the plugins of one request.
#[derive(Debug, Clone, Default)]
pub struct PluginContext {
    pub correlation_id: String,
    values: HashMap<String, serde_json::Value>,
}

impl PluginContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            values: HashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.values.insert(key.into(), value);
    }
}

/// A request/response hook. Both methods default to [`PluginOutcome::Continue`].
#[async_trait]
pub trait Plugin: Send + Sync {
    async fn on_request(
        &self,
        _request: &GatewayRequest,
        _ctx: &mut PluginContext,
    ) -> PluginOutcome<GatewayRequest> {
        PluginOutcome::Continue
    }

    async fn on_response(
        &self,
        _response: &GatewayResponse,
        _ctx: &mut PluginContext,
    ) -> PluginOutcome<GatewayResponse> {
        PluginOutcome::Continue
    }
}

/// What a plugin did, as recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Continued,
    Modified,
    Aborted,
}

/// One executed plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginVerdict {
    pub stage: PluginStage,
    pub plugin: String,
    pub verdict: Verdict,
}

/// Instantiate a built-in plugin.
pub fn build_plugin(kind: &PluginKind) -> ValidationResult<Arc<dyn Plugin>> {
    Ok(match kind {
        PluginKind::RedactFields { fields } => Arc::new(RedactFieldsPlugin::new(fields.clone())),
        PluginKind::Headers { set, remove } => Arc::new(HeadersPlugin::from_config(set, remove)?),
        PluginKind::RequireHeader {
            header,
            status,
            message,
        } => Arc::new(RequireHeaderPlugin::new(header, *status, message)?),
        PluginKind::Deny {
            path_matches,
            method_is,
            has_header,
            status,
            message,
        } => Arc::new(DenyPlugin::new(
            path_matches.as_deref(),
            method_is.as_deref(),
            has_header.as_ref(),
            *status,
            message,
        )?),
    })
}
