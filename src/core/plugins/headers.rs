use std::collections::HashMap;

use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue};

use super::{Plugin, PluginContext, PluginOutcome};
use crate::{
    config::{ValidationError, ValidationResult},
    core::exchange::{GatewayRequest, GatewayResponse},
};

/// Sets and removes headers. Removal runs first.
pub struct HeadersPlugin {
    set: Vec<(HeaderName, HeaderValue)>,
    remove: Vec<HeaderName>,
}

impl HeadersPlugin {
    pub fn from_config(set: &HashMap<String, String>, remove: &[String]) -> ValidationResult<Self> {
        let invalid = |name: &str| ValidationError::InvalidField {
            field: "headers plugin".to_string(),
            message: format!("Invalid header '{name}'"),
        };

        let mut set = set
            .iter()
            .map(|(name, value)| {
                let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid(name))?;
                let header_value = HeaderValue::from_str(value).map_err(|_| invalid(name))?;
                Ok((header_name, header_value))
            })
            .collect::<ValidationResult<Vec<_>>>()?;
        set.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));

        let remove = remove
            .iter()
            .map(|name| HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid(name)))
            .collect::<ValidationResult<Vec<_>>>()?;

        Ok(Self { set, remove })
    }

    /// Rewritten header map, or `None` if nothing would change.
    fn apply(&self, headers: &HeaderMap) -> Option<HeaderMap> {
        let mut out = headers.clone();
        for name in &self.remove {
            out.remove(name);
        }
        for (name, value) in &self.set {
            out.insert(name.clone(), value.clone());
        }
        (out != *headers).then_some(out)
    }
}

#[async_trait]
impl Plugin for HeadersPlugin {
    async fn on_request(
        &self,
        request: &GatewayRequest,
        _ctx: &mut PluginContext,
    ) -> PluginOutcome<GatewayRequest> {
        match self.apply(&request.headers) {
            Some(headers) => PluginOutcome::Replace(GatewayRequest {
                headers,
                ..request.clone()
            }),
            None => PluginOutcome::Continue,
        }
    }

    async fn on_response(
        &self,
        response: &GatewayResponse,
        _ctx: &mut PluginContext,
    ) -> PluginOutcome<GatewayResponse> {
        match self.apply(&response.headers) {
            Some(headers) => PluginOutcome::Replace(GatewayResponse {
                headers,
                ..response.clone()
            }),
            None => PluginOutcome::Continue,
        }
    }
}
