use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::{
    core::auth::{AuthError, Secret},
    ports::{FetchedToken, TokenFetcher, TokenRequest},
};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// OAuth2 client-credentials grant over HTTP (RFC 6749 section 4.4).
pub struct ReqwestTokenFetcher {
    client: reqwest::Client,
}

impl ReqwestTokenFetcher {
    pub fn new(timeout: Duration) -> eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("mirage/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TokenFetcher for ReqwestTokenFetcher {
    async fn fetch(&self, request: &TokenRequest) -> Result<FetchedToken, AuthError> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", request.client_id.as_str()),
            ("client_secret", request.client_secret.expose()),
        ];
        if let Some(scope) = &request.scope {
            form.push(("scope", scope.as_str()));
        }

        tracing::debug!(endpoint = %request.token_endpoint, client_id = %request.client_id, "Requesting access token");

        let response = self
            .client
            .post(request.token_endpoint.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::TokenEndpoint(format!("{}: {e}", request.token_endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::TokenEndpoint(format!(
                "{} returned status {}",
                request.token_endpoint,
                status.as_u16()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        parse_token(body)
    }
}

fn parse_token(body: TokenResponse) -> Result<FetchedToken, AuthError> {
    if body.access_token.is_empty() {
        return Err(AuthError::InvalidToken("empty access_token".to_string()));
    }
    if let Some(kind) = &body.token_type
        && !kind.eq_ignore_ascii_case("bearer")
    {
        return Err(AuthError::InvalidToken(format!("unsupported token_type '{kind}'")));
    }
    Ok(FetchedToken {
        access_token: Secret::new(body.access_token),
        expires_in: body.expires_in.map(Duration::from_secs),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> TokenResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_bearer_token() {
        let token = parse_token(response(
            r#"{"access_token":"abc","token_type":"Bearer","expires_in":3600}"#,
        ))
        .unwrap();
        assert_eq!(token.access_token.expose(), "abc");
        assert_eq!(token.expires_in, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_missing_lifetime_is_allowed() {
        let token = parse_token(response(r#"{"access_token":"abc"}"#)).unwrap();
        assert!(token.expires_in.is_none());
    }

    #[test]
    fn test_rejects_unusable_tokens() {
        assert!(matches!(
            parse_token(response(r#"{"access_token":""}"#)),
            Err(AuthError::InvalidToken(_))
        ));
        assert!(matches!(
            parse_token(response(r#"{"access_token":"abc","token_type":"mac"}"#)),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_endpoint_error() {
        let fetcher = ReqwestTokenFetcher::new(Duration::from_secs(2)).unwrap();
        let request = TokenRequest {
            token_endpoint: "http://127.0.0.1:1/token".parse().unwrap(),
            client_id: "client".to_string(),
            client_secret: Secret::new("secret"),
            scope: None,
        };
        assert!(matches!(
            fetcher.fetch(&request).await,
            Err(AuthError::TokenEndpoint(_))
        ));
    }
}
