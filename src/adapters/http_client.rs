use async_trait::async_trait;
use bytes::Bytes;
use eyre::Result;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;

use crate::{
    core::exchange::GatewayResponse,
    ports::http_client::{HttpClient, TransportError},
};

/// HTTP client adapter using Hyper with Rustls (HTTP/1.1 + HTTP/2).
///
/// Requests and responses are fully buffered. Timeouts and retries belong to
/// the upstream forwarder, so this adapter makes exactly one attempt.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl HttpClientAdapter {
    pub fn new() -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();
        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("Failed to add native certificate to rustls RootCertStore");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }
        tracing::debug!("Loaded {} native root certificates", root_cert_store.len());

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, Full<Bytes>>(https_connector);

        tracing::info!("Created upstream HTTP client with HTTP/2 and HTTP/1.1 support");
        Ok(Self { client })
    }

    /// Set `Host` from the target URI and a default `User-Agent`.
    fn prepare_headers(req: &mut Request<Bytes>) -> Result<(), TransportError> {
        let Some(host) = req.uri().host() else {
            return Err(TransportError::InvalidRequest(format!(
                "Outgoing URI has no host: {}",
                req.uri()
            )));
        };
        let host = match req.uri().port_u16() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let host = HeaderValue::from_str(&host)
            .map_err(|e| TransportError::InvalidRequest(format!("Invalid host header: {e}")))?;

        let headers = req.headers_mut();
        headers.insert(header::HOST, host);
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(
                header::USER_AGENT,
                HeaderValue::from_static(concat!("mirage/", env!("CARGO_PKG_VERSION"))),
            );
        }
        Ok(())
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send(&self, mut req: Request<Bytes>) -> Result<GatewayResponse, TransportError> {
        Self::prepare_headers(&mut req)?;

        let (mut parts, body) = req.into_parts();
        // ALPN negotiates the actual version on TLS connections
        parts.version = Version::HTTP_11;
        let method = parts.method.clone();
        let uri = parts.uri.clone();

        tracing::debug!(method = %method, uri = %uri, "Sending upstream request");

        let response = self
            .client
            .request(Request::from_parts(parts, Full::new(body)))
            .await
            .map_err(|e| {
                tracing::debug!(method = %method, uri = %uri, error = %e, "Upstream request failed");
                TransportError::Connection(format!("Request to {method} {uri} failed: {e}"))
            })?;

        let (mut parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| TransportError::Connection(format!("Failed to read response body from {uri}: {e}")))?
            .to_bytes();

        // Body is buffered; framing is decided again on the way out
        parts.headers.remove(header::TRANSFER_ENCODING);
        parts.headers.remove(header::CONTENT_LENGTH);

        Ok(GatewayResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_client_creation() {
        assert!(HttpClientAdapter::new().is_ok());
    }

    #[test]
    fn test_prepare_headers_sets_host_and_agent() {
        let mut req = Request::builder()
            .uri("http://api.example.com:8443/users")
            .body(Bytes::new())
            .unwrap();

        HttpClientAdapter::prepare_headers(&mut req).unwrap();

        assert_eq!(req.headers()[header::HOST], "api.example.com:8443");
        assert!(
            req.headers()[header::USER_AGENT]
                .to_str()
                .unwrap()
                .starts_with("mirage/")
        );
    }

    #[test]
    fn test_prepare_headers_rejects_relative_uri() {
        let mut req = Request::builder().uri("/users").body(Bytes::new()).unwrap();
        assert!(matches!(
            HttpClientAdapter::prepare_headers(&mut req),
            Err(TransportError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_connection_error() {
        let client = HttpClientAdapter::new().unwrap();
        let req = Request::builder()
            .uri("http://127.0.0.1:1/")
            .body(Bytes::new())
            .unwrap();

        assert!(matches!(
            client.send(req).await,
            Err(TransportError::Connection(_))
        ));
    }
}
