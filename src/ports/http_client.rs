use async_trait::async_trait;
use bytes::Bytes;
use http::Request;
use thiserror::Error;

use crate::core::exchange::GatewayResponse;

/// Transport-level failure talking to the upstream. A received status code,
/// whatever its value, is never a transport error.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TransportError {
    /// Connection could not be established or was reset
    #[error("Connection error: {0}")]
    Connection(String),

    /// Request could not be built or sent as given
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// HttpClient defines the port (interface) for sending a request upstream
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send one request and buffer the whole response.
    ///
    /// Timeouts are applied by the caller; implementations only need to stop when
    /// the returned future is dropped.
    async fn send(&self, req: Request<Bytes>) -> Result<GatewayResponse, TransportError>;
}
