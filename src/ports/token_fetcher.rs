use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::core::auth::{AuthError, Secret};

/// Parameters of an OAuth2 client-credentials grant.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub token_endpoint: Url,
    pub client_id: String,
    pub client_secret: Secret,
    pub scope: Option<String>,
}

/// Token returned by the authorization server.
#[derive(Debug, Clone)]
pub struct FetchedToken {
    pub access_token: Secret,
    /// Lifetime reported by the server, if any
    pub expires_in: Option<Duration>,
}

/// Performs the network exchange for a token.
#[async_trait]
pub trait TokenFetcher: Send + Sync {
    async fn fetch(&self, request: &TokenRequest) -> Result<FetchedToken, AuthError>;
}
