use std::collections::HashSet;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode, header};
use serde_json::Value;

use super::{Plugin, PluginContext, PluginOutcome};
use crate::core::exchange::{GatewayRequest, GatewayResponse};

/// Removes named fields, at any depth, from JSON bodies.
///
/// Bodies with a `Content-Encoding` cannot be inspected and are refused rather
/// than passed through unredacted.
pub struct RedactFieldsPlugin {
    fields: HashSet<String>,
}

impl RedactFieldsPlugin {
    pub fn new(fields: impl IntoIterator<Item = String>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// Redacted body, or `None` when nothing was removed.
    fn redact(&self, body: Option<Value>) -> Option<Bytes> {
        let mut value = body?;
        if !self.strip(&mut value) {
            return None;
        }
        serde_json::to_vec(&value).ok().map(Bytes::from)
    }

    fn encoding(headers: &HeaderMap, body: &Bytes) -> Option<String> {
        if body.is_empty() {
            return None;
        }
        headers
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("identity"))
            .map(str::to_string)
    }

    fn strip(&self, value: &mut Value) -> bool {
        match value {
            Value::Object(map) => {
                let before = map.len();
                map.retain(|k, _| !self.fields.contains(k));
                let mut changed = map.len() != before;
                for child in map.values_mut() {
                    changed |= self.strip(child);
                }
                changed
            }
            Value::Array(items) => items
                .iter_mut()
                .fold(false, |changed, item| self.strip(item) | changed),
            _ => false,
        }
    }
}

#[async_trait]
impl Plugin for RedactFieldsPlugin {
    async fn on_request(
        &self,
        request: &GatewayRequest,
        _ctx: &mut PluginContext,
    ) -> PluginOutcome<GatewayRequest> {
        if let Some(encoding) = Self::encoding(&request.headers, &request.body) {
            return PluginOutcome::Abort {
                response: GatewayResponse::error(
                    StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    "unsupported_encoding",
                    "Encoded request bodies cannot be redacted",
                ),
                reason: format!("request body is {encoding}-encoded"),
            };
        }
        match self.redact(request.body_json()) {
            Some(body) => {
                let mut redacted = request.clone().with_body(body);
                redacted.headers.remove(http::header::CONTENT_LENGTH);
                PluginOutcome::Replace(redacted)
            }
            None => PluginOutcome::Continue,
        }
    }

    async fn on_response(
        &self,
        response: &GatewayResponse,
        _ctx: &mut PluginContext,
    ) -> PluginOutcome<GatewayResponse> {
        if let Some(encoding) = Self::encoding(&response.headers, &response.body) {
            return PluginOutcome::Abort {
                response: GatewayResponse::error(
                    StatusCode::BAD_GATEWAY,
                    "unredactable_response",
                    "Upstream response is encoded and cannot be redacted",
                ),
                reason: format!("response body is {encoding}-encoded"),
            };
        }
        match self.redact(response.body_json()) {
            Some(body) => {
                let mut redacted = response.clone().with_body(body);
                redacted.headers.remove(http::header::CONTENT_LENGTH);
                PluginOutcome::Replace(redacted)
            }
            None => PluginOutcome::Continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_redacts_nested_fields() {
        let plugin = RedactFieldsPlugin::new(["ssn".to_string()]);
        let response = GatewayResponse::json(
            StatusCode::OK,
            &json!({"id": 1, "ssn": "123", "family": [{"name": "Bo", "ssn": "456"}]}),
        );
        let outcome = plugin
            .on_response(&response, &mut PluginContext::default())
            .await;
        let PluginOutcome::Replace(redacted) = outcome else {
            panic!("expected the body to be replaced");
        };
        assert_eq!(
            redacted.body_json(),
            Some(json!({"id": 1, "family": [{"name": "Bo"}]}))
        );
    }

    #[tokio::test]
    async fn test_untouched_bodies_continue() {
        let plugin = RedactFieldsPlugin::new(["ssn".to_string()]);
        let clean = GatewayResponse::json(StatusCode::OK, &json!({"id": 1}));
        assert!(matches!(
            plugin.on_response(&clean, &mut PluginContext::default()).await,
            PluginOutcome::Continue
        ));

        let text = GatewayResponse::new(StatusCode::OK).with_body("ssn=123");
        assert!(matches!(
            plugin.on_response(&text, &mut PluginContext::default()).await,
            PluginOutcome::Continue
        ));
    }

    #[tokio::test]
    async fn test_encoded_bodies_are_refused() {
        let plugin = RedactFieldsPlugin::new(["ssn".to_string()]);
        let mut gzipped = GatewayResponse::new(StatusCode::OK)
            .with_body(Bytes::from_static(b"\x1f\x8b\x08\x00compressed"));
        gzipped
            .headers
            .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));

        match plugin.on_response(&gzipped, &mut PluginContext::default()).await {
            PluginOutcome::Abort { response, reason } => {
                assert_eq!(response.status, StatusCode::BAD_GATEWAY);
                assert_eq!(reason, "response body is gzip-encoded");
            }
            _ => panic!("expected an encoded body to be refused"),
        }

        let mut identity = GatewayResponse::json(StatusCode::OK, &json!({"ssn": "1"}));
        identity
            .headers
            .insert(header::CONTENT_ENCODING, HeaderValue::from_static("identity"));
        assert!(matches!(
            plugin.on_response(&identity, &mut PluginContext::default()).await,
            PluginOutcome::Replace(_)
        ));
    }
}
