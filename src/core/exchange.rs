//! Request and response values passed between the gateway stages.
//!
//! Bodies are fully buffered [`Bytes`]; cloning an exchange is cheap because the
//! body is reference counted. Plugins and the auth injector never mutate a value
//! in place, they return a new one.
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header};
use serde::Serialize;

/// An inbound request as seen by the gateway.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl GatewayRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Parse the body as JSON, `None` if empty or not JSON
    pub fn body_json(&self) -> Option<serde_json::Value> {
        parse_json(&self.headers, &self.body)
    }
}

/// A response produced by a mock, the upstream, a plugin or the error mapping.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl GatewayResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// JSON response with the matching content type
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_default();
        let mut response = Self::new(status).with_body(body);
        response.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }

    /// `{"error": .., "message": ..}` body used for gateway-generated errors
    pub fn error(status: StatusCode, error: &str, message: &str) -> Self {
        Self::json(
            status,
            &serde_json::json!({ "error": error, "message": message }),
        )
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body_json(&self) -> Option<serde_json::Value> {
        parse_json(&self.headers, &self.body)
    }
}

fn parse_json(headers: &HeaderMap, body: &Bytes) -> Option<serde_json::Value> {
    if body.is_empty() {
        return None;
    }
    // A declared non-JSON content type is respected; a missing one is sniffed.
    if let Some(content_type) = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok())
        && !content_type.contains("json")
    {
        return None;
    }
    serde_json::from_slice(body).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_response_sets_content_type() {
        let response = GatewayResponse::json(StatusCode::OK, &serde_json::json!({"id": 1}));
        assert_eq!(response.header_str("content-type"), Some("application/json"));
        assert_eq!(response.body_json(), Some(serde_json::json!({"id": 1})));
    }

    #[test]
    fn test_body_json_respects_declared_content_type() {
        let response = GatewayResponse::new(StatusCode::OK)
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))
            .with_body(r#"{"id": 1}"#);
        assert!(response.body_json().is_none());

        let request = GatewayRequest::new(Method::POST, Uri::from_static("/users"))
            .with_body(r#"{"id": 1}"#);
        assert_eq!(request.body_json(), Some(serde_json::json!({"id": 1})));
    }
}
