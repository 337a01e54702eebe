use http::{HeaderName, HeaderValue, StatusCode};

use crate::core::{auth::AuthError, exchange::GatewayResponse, forwarder::UpstreamError};

/// Failures the orchestrator turns into gateway-generated responses.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("upstream authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("no fixture for {method} {path} in scenario '{scenario}'")]
    MockLookupMiss {
        method: String,
        path: String,
        scenario: String,
    },

    #[error("no upstream configured for this request")]
    NoUpstream,

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("request body could not be read: {0}")]
    InvalidBody(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Auth(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Upstream(UpstreamError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::MockLookupMiss { .. } => StatusCode::NOT_FOUND,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            GatewayError::NoUpstream | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Auth(_) => "upstream_auth_failed",
            GatewayError::Upstream(UpstreamError::Timeout { .. }) => "upstream_timeout",
            GatewayError::Upstream(_) => "upstream_unavailable",
            GatewayError::MockLookupMiss { .. } => "mock_not_found",
            GatewayError::NoUpstream => "no_upstream",
            GatewayError::PayloadTooLarge { .. } => "payload_too_large",
            GatewayError::InvalidBody(_) => "invalid_body",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// JSON error response `{error, message, correlation_id}`.
    pub fn to_response(&self, correlation_header: &HeaderName, correlation_id: &str) -> GatewayResponse {
        let response = GatewayResponse::json(
            self.status(),
            &serde_json::json!({
                "error": self.code(),
                "message": self.to_string(),
                "correlation_id": correlation_id,
            }),
        );
        match HeaderValue::from_str(correlation_id) {
            Ok(value) => response.with_header(correlation_header.clone(), value),
            Err(_) => response,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_status_mapping() {
        let timeout = GatewayError::Upstream(UpstreamError::Timeout {
            elapsed: Duration::from_secs(1),
            attempts: 3,
        });
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);

        let connection = GatewayError::Upstream(UpstreamError::Connection {
            message: "refused".to_string(),
            elapsed: Duration::from_millis(5),
            attempts: 1,
        });
        assert_eq!(connection.status(), StatusCode::BAD_GATEWAY);

        let auth = GatewayError::from(AuthError::TokenEndpoint("500".to_string()));
        assert_eq!(auth.status(), StatusCode::BAD_GATEWAY);

        let miss = GatewayError::MockLookupMiss {
            method: "GET".to_string(),
            path: "/x".to_string(),
            scenario: "default".to_string(),
        };
        assert_eq!(miss.status(), StatusCode::NOT_FOUND);
        assert_eq!(GatewayError::NoUpstream.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            GatewayError::PayloadTooLarge { limit: 4 }.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            GatewayError::InvalidBody("reset".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_error_response_body() {
        let header = HeaderName::from_static("x-correlation-id");
        let response = GatewayError::NoUpstream.to_response(&header, "abc");
        let body = response.body_json().unwrap();
        assert_eq!(body["error"], "no_upstream");
        assert_eq!(body["correlation_id"], "abc");
        assert_eq!(response.header_str("x-correlation-id"), Some("abc"));
    }
}
