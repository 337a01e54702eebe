use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};

use crate::core::exchange::GatewayResponse;

/// A canned response served in place of the upstream.
#[derive(Debug, Clone)]
pub struct FixtureResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl From<FixtureResponse> for GatewayResponse {
    fn from(fixture: FixtureResponse) -> Self {
        GatewayResponse {
            status: fixture.status,
            headers: fixture.headers,
            body: fixture.body,
        }
    }
}

/// Source of fixture data, keyed by path, method and scenario.
#[async_trait]
pub trait MockLookup: Send + Sync {
    /// `None` means no fixture for this request in this scenario.
    async fn lookup(&self, path: &str, method: &Method, scenario: &str)
    -> Option<FixtureResponse>;
}
