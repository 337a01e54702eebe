//! Request gates: plugins that reject requests before routing.
use async_trait::async_trait;
use http::{HeaderName, Method, StatusCode};

use super::{Plugin, PluginContext, PluginOutcome};
use crate::{
    config::{ConfigValidator, HeaderPredicateConfig, ValidationError, ValidationResult},
    core::{
        exchange::{GatewayRequest, GatewayResponse},
        matcher::{HeaderPredicate, PathPattern},
    },
};

fn status_code(status: u16) -> ValidationResult<StatusCode> {
    StatusCode::from_u16(status).map_err(|_| ValidationError::InvalidField {
        field: "plugin status".to_string(),
        message: format!("{status} is not a valid HTTP status code"),
    })
}

fn rejection(status: StatusCode, message: &str, reason: String) -> PluginOutcome<GatewayRequest> {
    PluginOutcome::Abort {
        response: GatewayResponse::error(status, "request_rejected", message),
        reason,
    }
}

/// Aborts requests that lack a header.
pub struct RequireHeaderPlugin {
    header: HeaderName,
    status: StatusCode,
    message: String,
}

impl RequireHeaderPlugin {
    pub fn new(header: &str, status: u16, message: &str) -> ValidationResult<Self> {
        Ok(Self {
            header: HeaderName::from_bytes(header.as_bytes()).map_err(|_| {
                ValidationError::InvalidField {
                    field: "require_header plugin".to_string(),
                    message: format!("Invalid header name '{header}'"),
                }
            })?,
            status: status_code(status)?,
            message: message.to_string(),
        })
    }
}

#[async_trait]
impl Plugin for RequireHeaderPlugin {
    async fn on_request(
        &self,
        request: &GatewayRequest,
        _ctx: &mut PluginContext,
    ) -> PluginOutcome<GatewayRequest> {
        if request.headers.contains_key(&self.header) {
            return PluginOutcome::Continue;
        }
        rejection(
            self.status,
            &self.message,
            format!("missing required header {}", self.header),
        )
    }
}

/// Aborts requests for which every configured condition holds.
pub struct DenyPlugin {
    path: Option<PathPattern>,
    method: Option<Method>,
    header: Option<HeaderPredicate>,
    status: StatusCode,
    message: String,
}

impl DenyPlugin {
    pub fn new(
        path_matches: Option<&str>,
        method_is: Option<&str>,
        has_header: Option<&HeaderPredicateConfig>,
        status: u16,
        message: &str,
    ) -> ValidationResult<Self> {
        let pattern_error = |e: crate::core::matcher::PatternError| ValidationError::InvalidPattern {
            field: "deny plugin".to_string(),
            message: e.to_string(),
        };
        Ok(Self {
            path: path_matches
                .map(PathPattern::glob)
                .transpose()
                .map_err(pattern_error)?,
            method: method_is
                .map(|m| ConfigValidator::parse_method("deny plugin method_is", m))
                .transpose()?,
            header: has_header
                .map(HeaderPredicate::compile)
                .transpose()
                .map_err(pattern_error)?,
            status: status_code(status)?,
            message: message.to_string(),
        })
    }

    fn denies(&self, request: &GatewayRequest) -> bool {
        let any_condition = self.path.is_some() || self.method.is_some() || self.header.is_some();
        any_condition
            && self.path.as_ref().is_none_or(|p| p.matches(request.path()))
            && self.method.as_ref().is_none_or(|m| *m == request.method)
            && self.header.as_ref().is_none_or(|h| h.matches(&request.headers))
    }
}

#[async_trait]
impl Plugin for DenyPlugin {
    async fn on_request(
        &self,
        request: &GatewayRequest,
        _ctx: &mut PluginContext,
    ) -> PluginOutcome<GatewayRequest> {
        if !self.denies(request) {
            return PluginOutcome::Continue;
        }
        rejection(
            self.status,
            &self.message,
            format!("denied {} {}", request.method, request.path()),
        )
    }
}
