//! Auth injector: resolves upstream credentials and attaches them to requests.
//!
//! Static schemes (api key, bearer, basic) are plain lookups of a credential
//! source. OAuth2 client-credentials tokens are cached per upstream domain and
//! client (token endpoint, client id, scope), so two clients talking to the same
//! host never see each other's token. A cached token is read lock-free through an [`ArcSwapOption`]; when it is missing
//! or expired, the first caller starts a refresh and stores it in the slot as a
//! [`Shared`] future, and every concurrent caller awaits a clone of that same
//! future. N concurrent cold requests therefore cause exactly one token fetch. A
//! failed refresh is handed to every waiter and nothing is cached.
//!
//! Invalidation after an upstream 401 names the token that was rejected. Only
//! that token is dropped; a newer one installed by a concurrent refresh stays.
use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use arc_swap::ArcSwapOption;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use futures_util::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use http::{HeaderName, HeaderValue, Uri, header, uri::PathAndQuery};
use tokio::time::Instant;

use crate::{
    config::{AuthConfig, AuthScheme, ConfigValidator, CredentialSource, InjectionPoint},
    core::exchange::GatewayRequest,
    metrics,
    ports::{SecretStore, TokenFetcher, TokenRequest},
};

/// Tokens are treated as expired this long before the server says so, capped at
/// half the token lifetime.
const EXPIRY_SKEW: Duration = Duration::from_secs(30);

/// Errors raised while resolving or injecting credentials.
///
/// `Clone` because one refresh result is delivered to every waiter.
#[derive(Debug, thiserror::Error, Clone)]
#[non_exhaustive]
pub enum AuthError {
    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("token endpoint error: {0}")]
    TokenEndpoint(String),

    #[error("invalid token response: {0}")]
    InvalidToken(String),

    #[error("cannot inject credential: {0}")]
    Injection(String),
}

/// A secret value. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Arc<str>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Arc::from(value.into()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// A resolved credential ready for injection.
#[derive(Debug, Clone)]
pub struct Credential {
    scheme: AuthScheme,
    /// Raw value for query/body injection
    raw: Secret,
    /// Scheme-formatted value for header injection
    header_value: Secret,
    injection: Option<InjectionPoint>,
    /// Cache entry this credential was read from (OAuth2 only)
    issued: Option<Arc<CachedToken>>,
}

impl Credential {
    /// Credential for scheme `none`; injecting it is a no-op.
    pub fn none() -> Self {
        Self {
            scheme: AuthScheme::None,
            raw: Secret::new(""),
            header_value: Secret::new(""),
            injection: None,
            issued: None,
        }
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    pub fn injection_point(&self) -> Option<&InjectionPoint> {
        self.injection.as_ref()
    }
}

/// Token cache key. Everything that decides which token the endpoint issues is
/// part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenKey {
    pub domain: String,
    pub scheme: AuthScheme,
    pub token_endpoint: String,
    pub client_id: String,
    pub scope: Option<String>,
}

impl TokenKey {
    pub fn new(domain: impl Into<String>, auth: &AuthConfig) -> Self {
        let (token_endpoint, client_id, scope) = match auth {
            AuthConfig::Oauth2ClientCredentials {
                token_endpoint,
                client_id,
                scope,
                ..
            } => (token_endpoint.clone(), client_id.clone(), scope.clone()),
            _ => (String::new(), String::new(), None),
        };
        Self {
            domain: domain.into(),
            scheme: auth.scheme(),
            token_endpoint,
            client_id,
            scope,
        }
    }
}

#[derive(Debug)]
struct CachedToken {
    token: Secret,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Arc<CachedToken>, AuthError>>>;

#[derive(Default)]
struct TokenSlot {
    current: ArcSwapOption<CachedToken>,
    inflight: Mutex<Option<RefreshFuture>>,
}

impl TokenSlot {
    fn fresh_token(&self) -> Option<Arc<CachedToken>> {
        self.current.load_full().filter(|t| t.is_fresh())
    }
}

/// Resolves and injects upstream credentials.
pub struct AuthInjector {
    slots: scc::HashMap<TokenKey, Arc<TokenSlot>>,
    fetcher: Arc<dyn TokenFetcher>,
    secrets: Arc<dyn SecretStore>,
}

impl AuthInjector {
    pub fn new(fetcher: Arc<dyn TokenFetcher>, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            slots: scc::HashMap::new(),
            fetcher,
            secrets,
        }
    }

    /// Resolve the credential for `domain` under `auth`.
    pub async fn resolve(&self, domain: &str, auth: &AuthConfig) -> Result<Credential, AuthError> {
        let scheme = auth.scheme();
        let injection = auth.injection_point();

        let mut issued = None;
        let (raw, header_value) = match auth {
            AuthConfig::None => return Ok(Credential::none()),
            AuthConfig::ApiKey {
                credential_source, ..
            } => {
                let key = self.lookup(credential_source).await?;
                (key.clone(), key)
            }
            AuthConfig::BearerStatic {
                credential_source, ..
            } => {
                let token = self.lookup(credential_source).await?;
                let header = Secret::new(format!("Bearer {}", token.expose()));
                (token, header)
            }
            AuthConfig::Basic {
                username,
                credential_source,
                ..
            } => {
                let password = self.lookup(credential_source).await?;
                let encoded = Secret::new(
                    STANDARD.encode(format!("{username}:{}", password.expose())),
                );
                let header = Secret::new(format!("Basic {}", encoded.expose()));
                (encoded, header)
            }
            AuthConfig::Oauth2ClientCredentials {
                token_endpoint,
                client_id,
                client_secret_source,
                scope,
                cache_ttl,
                ..
            } => {
                let key = TokenKey::new(domain, auth);
                let slot = self.slot(&key).await;
                let cached = match slot.fresh_token() {
                    Some(token) => token,
                    None => {
                        let request = TokenRequest {
                            token_endpoint: ConfigValidator::parse_url("token_endpoint", token_endpoint)
                                .map_err(|e| AuthError::TokenEndpoint(e.to_string()))?,
                            client_id: client_id.clone(),
                            client_secret: self.lookup(client_secret_source).await?,
                            scope: scope.clone(),
                        };
                        let ttl = ConfigValidator::parse_duration("cache_ttl", cache_ttl)
                            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
                        self.refresh(&key, slot, request, ttl).await?
                    }
                };
                let header = Secret::new(format!("Bearer {}", cached.token.expose()));
                let raw = cached.token.clone();
                issued = Some(cached);
                (raw, header)
            }
        };

        Ok(Credential {
            scheme,
            raw,
            header_value,
            injection,
            issued,
        })
    }

    /// Return a copy of `request` carrying the credential.
    pub fn inject(
        &self,
        request: &GatewayRequest,
        credential: &Credential,
    ) -> Result<GatewayRequest, AuthError> {
        let mut injected = request.clone();
        match &credential.injection {
            None => {}
            Some(InjectionPoint::Header(name)) => {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| AuthError::Injection(format!("header name '{name}': {e}")))?;
                let mut value = HeaderValue::from_str(credential.header_value.expose())
                    .map_err(|_| AuthError::Injection("credential is not a valid header value".to_string()))?;
                value.set_sensitive(true);
                injected.headers.insert(name, value);
            }
            Some(InjectionPoint::Query(param)) => {
                injected.uri = with_query_param(&request.uri, param, credential.raw.expose())?;
            }
            Some(InjectionPoint::Body(field)) => {
                injected.body = with_body_field(request, field, credential.raw.expose())?;
                injected.headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                injected.headers.remove(header::CONTENT_LENGTH);
            }
        }
        Ok(injected)
    }

    /// Drop `rejected` from the cache for `domain` under `auth`. A token that
    /// has already replaced it is kept. Returns whether anything was dropped.
    pub async fn invalidate(&self, domain: &str, auth: &AuthConfig, rejected: &Credential) -> bool {
        let Some(token) = rejected.issued.as_ref() else {
            return false;
        };
        let key = TokenKey::new(domain, auth);
        let Some(slot) = self.slots.get_async(&key).await.map(|entry| entry.get().clone()) else {
            return false;
        };

        let expected = Some(token.clone());
        let previous = slot.current.compare_and_swap(&expected, None);
        let dropped = matches!(&*previous, Some(current) if Arc::ptr_eq(current, token));
        if dropped {
            tracing::debug!(domain = %key.domain, client_id = %key.client_id, "Invalidated rejected token");
        } else {
            tracing::debug!(domain = %key.domain, client_id = %key.client_id, "Rejected token was already replaced");
        }
        dropped
    }

    /// Forget every cached token.
    pub async fn reset(&self) {
        self.slots.retain_async(|_, _| false).await;
    }

    /// Number of cache slots, for diagnostics
    pub fn cached_keys(&self) -> usize {
        self.slots.len()
    }

    async fn slot(&self, key: &TokenKey) -> Arc<TokenSlot> {
        if let Some(slot) = self.slots.get_async(key).await {
            return slot.get().clone();
        }
        self.slots
            .entry_async(key.clone())
            .await
            .or_insert_with(|| Arc::new(TokenSlot::default()))
            .get()
            .clone()
    }

    async fn refresh(
        &self,
        key: &TokenKey,
        slot: Arc<TokenSlot>,
        request: TokenRequest,
        ttl: Duration,
    ) -> Result<Arc<CachedToken>, AuthError> {
        let refresh = {
            let mut inflight = slot.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            // Another caller may have finished a refresh since our first check.
            if let Some(token) = slot.fresh_token() {
                return Ok(token);
            }
            match inflight.as_ref() {
                Some(pending) => pending.clone(),
                None => {
                    tracing::debug!(domain = %key.domain, "Starting token refresh");
                    let pending = Self::start_refresh(
                        self.fetcher.clone(),
                        slot.clone(),
                        key.domain.clone(),
                        request,
                        ttl,
                    );
                    *inflight = Some(pending.clone());
                    pending
                }
            }
        };
        refresh.await
    }

    fn start_refresh(
        fetcher: Arc<dyn TokenFetcher>,
        slot: Arc<TokenSlot>,
        domain: String,
        request: TokenRequest,
        ttl: Duration,
    ) -> RefreshFuture {
        async move {
            let result = fetcher.fetch(&request).await;
            let outcome = match result {
                Ok(fetched) => {
                    let lifetime = fetched.expires_in.map_or(ttl, |e| e.min(ttl));
                    let skew = EXPIRY_SKEW.min(lifetime / 2);
                    let cached = Arc::new(CachedToken {
                        token: fetched.access_token,
                        expires_at: Instant::now() + lifetime.saturating_sub(skew),
                    });
                    slot.current.store(Some(cached.clone()));
                    metrics::increment_token_refresh("success");
                    tracing::info!(domain = %domain, lifetime = ?lifetime, "Refreshed OAuth2 token");
                    Ok(cached)
                }
                Err(e) => {
                    metrics::increment_token_refresh("failure");
                    tracing::warn!(domain = %domain, error = %e, "OAuth2 token refresh failed");
                    Err(e)
                }
            };
            slot.inflight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            outcome
        }
        .boxed()
        .shared()
    }

    async fn lookup(&self, source: &CredentialSource) -> Result<Secret, AuthError> {
        match source {
            CredentialSource::Inline(value) => Ok(Secret::new(value.clone())),
            CredentialSource::Env(name) => std::env::var(name)
                .map(Secret::new)
                .map_err(|_| AuthError::MissingCredential(format!("environment variable {name} is not set"))),
            CredentialSource::SecretRef(name) => self
                .secrets
                .secret(name)
                .await
                .ok_or_else(|| AuthError::MissingCredential(format!("secret '{name}' not found"))),
        }
    }
}

fn with_query_param(uri: &Uri, param: &str, value: &str) -> Result<Uri, AuthError> {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    if let Some(existing) = uri.query() {
        for (k, v) in url::form_urlencoded::parse(existing.as_bytes()) {
            if k != param {
                query.append_pair(&k, &v);
            }
        }
    }
    query.append_pair(param, value);

    let path_and_query = format!("{}?{}", uri.path(), query.finish());
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(
        PathAndQuery::try_from(path_and_query)
            .map_err(|e| AuthError::Injection(format!("query parameter '{param}': {e}")))?,
    );
    Uri::from_parts(parts).map_err(|e| AuthError::Injection(e.to_string()))
}

fn with_body_field(request: &GatewayRequest, field: &str, value: &str) -> Result<Bytes, AuthError> {
    let mut body = if request.body.is_empty() {
        serde_json::Map::new()
    } else {
        match serde_json::from_slice::<serde_json::Value>(&request.body) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => {
                return Err(AuthError::Injection(
                    "body injection requires an empty or JSON object body".to_string(),
                ));
            }
        }
    };
    body.insert(field.to_string(), serde_json::Value::String(value.to_string()));
    serde_json::to_vec(&body)
        .map(Bytes::from)
        .map_err(|e| AuthError::Injection(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use http::Method;

    use super::*;
    use crate::ports::FetchedToken;

    struct CountingFetcher {
        calls: AtomicUsize,
        expires_in: Option<Duration>,
    }

    #[async_trait]
    impl TokenFetcher for CountingFetcher {
        async fn fetch(&self, _request: &TokenRequest) -> Result<FetchedToken, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(FetchedToken {
                access_token: Secret::new(format!("token-{n}")),
                expires_in: self.expires_in,
            })
        }
    }

    struct NoSecrets;

    #[async_trait]
    impl SecretStore for NoSecrets {
        async fn secret(&self, name: &str) -> Option<Secret> {
            (name == "known").then(|| Secret::new("from-store"))
        }
    }

    fn injector(expires_in: Option<Duration>) -> (AuthInjector, Arc<CountingFetcher>) {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            expires_in,
        });
        (AuthInjector::new(fetcher.clone(), Arc::new(NoSecrets)), fetcher)
    }

    fn oauth2() -> AuthConfig {
        AuthConfig::Oauth2ClientCredentials {
            token_endpoint: "https://auth.example.com/token".to_string(),
            client_id: "gateway".to_string(),
            client_secret_source: CredentialSource::Inline("s3cret".to_string()),
            scope: None,
            cache_ttl: "1h".to_string(),
            injection_point: None,
        }
    }

    fn request() -> GatewayRequest {
        GatewayRequest::new(Method::GET, Uri::from_static("/users?page=2"))
    }

    #[tokio::test]
    async fn test_static_schemes_format_header_values() {
        let (injector, fetcher) = injector(None);

        let bearer = AuthConfig::BearerStatic {
            credential_source: CredentialSource::Inline("abc".to_string()),
            injection_point: None,
        };
        let credential = injector.resolve("api.example.com", &bearer).await.unwrap();
        let out = injector.inject(&request(), &credential).unwrap();
        assert_eq!(out.header_str("authorization"), Some("Bearer abc"));

        let basic = AuthConfig::Basic {
            username: "svc".to_string(),
            credential_source: CredentialSource::SecretRef("known".to_string()),
            injection_point: None,
        };
        let credential = injector.resolve("api.example.com", &basic).await.unwrap();
        let out = injector.inject(&request(), &credential).unwrap();
        let expected = format!("Basic {}", STANDARD.encode("svc:from-store"));
        assert_eq!(out.header_str("authorization"), Some(expected.as_str()));

        let api_key = AuthConfig::ApiKey {
            credential_source: CredentialSource::Inline("k-1".to_string()),
            injection_point: None,
        };
        let credential = injector.resolve("api.example.com", &api_key).await.unwrap();
        let out = injector.inject(&request(), &credential).unwrap();
        assert_eq!(out.header_str("x-api-key"), Some("k-1"));

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_inject_does_not_mutate_input() {
        let (injector, _) = injector(None);
        let credential = injector
            .resolve(
                "api.example.com",
                &AuthConfig::ApiKey {
                    credential_source: CredentialSource::Inline("k".to_string()),
                    injection_point: Some(InjectionPoint::Query("api_key".to_string())),
                },
            )
            .await
            .unwrap();
        let original = request();
        let out = injector.inject(&original, &credential).unwrap();
        assert_eq!(original.uri, "/users?page=2");
        assert_eq!(out.uri, "/users?page=2&api_key=k");
    }

    #[tokio::test]
    async fn test_body_injection_requires_json_object() {
        let (injector, _) = injector(None);
        let credential = injector
            .resolve(
                "api.example.com",
                &AuthConfig::ApiKey {
                    credential_source: CredentialSource::Inline("k".to_string()),
                    injection_point: Some(InjectionPoint::Body("token".to_string())),
                },
            )
            .await
            .unwrap();

        let json = request().with_body(r#"{"name":"Ada"}"#);
        let out = injector.inject(&json, &credential).unwrap();
        assert_eq!(
            out.body_json(),
            Some(serde_json::json!({"name": "Ada", "token": "k"}))
        );

        let text = request().with_body("plain text");
        assert!(matches!(
            injector.inject(&text, &credential),
            Err(AuthError::Injection(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let (injector, _) = injector(None);
        let env = AuthConfig::BearerStatic {
            credential_source: CredentialSource::Env("MIRAGE_TEST_UNSET_VARIABLE".to_string()),
            injection_point: None,
        };
        assert!(matches!(
            injector.resolve("a", &env).await,
            Err(AuthError::MissingCredential(_))
        ));

        let secret = AuthConfig::ApiKey {
            credential_source: CredentialSource::SecretRef("unknown".to_string()),
            injection_point: None,
        };
        assert!(matches!(
            injector.resolve("a", &secret).await,
            Err(AuthError::MissingCredential(_))
        ));
    }

    #[tokio::test]
    async fn test_oauth2_token_is_cached_until_invalidated() {
        let (injector, fetcher) = injector(Some(Duration::from_secs(600)));
        let auth = oauth2();

        let first = injector.resolve("api.example.com", &auth).await.unwrap();
        let second = injector.resolve("api.example.com", &auth).await.unwrap();
        assert_eq!(first.raw, second.raw);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        assert!(injector.invalidate("api.example.com", &auth, &first).await);
        let third = injector.resolve("api.example.com", &auth).await.unwrap();
        assert_eq!(third.raw.expose(), "token-2");

        injector.reset().await;
        assert_eq!(injector.cached_keys(), 0);
    }

    #[tokio::test]
    async fn test_stale_rejection_keeps_newer_token() {
        let (injector, fetcher) = injector(Some(Duration::from_secs(600)));
        let auth = oauth2();

        let first = injector.resolve("api.example.com", &auth).await.unwrap();
        let late = first.clone();
        assert!(injector.invalidate("api.example.com", &auth, &first).await);
        let second = injector.resolve("api.example.com", &auth).await.unwrap();
        assert_eq!(second.raw.expose(), "token-2");

        // A second 401 for token-1 arrives after the refresh
        assert!(!injector.invalidate("api.example.com", &auth, &late).await);
        let third = injector.resolve("api.example.com", &auth).await.unwrap();
        assert_eq!(third.raw.expose(), "token-2");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_static_credentials_are_never_invalidated() {
        let (injector, _) = injector(None);
        let bearer = AuthConfig::BearerStatic {
            credential_source: CredentialSource::Inline("abc".to_string()),
            injection_point: None,
        };
        let credential = injector.resolve("api.example.com", &bearer).await.unwrap();
        assert!(!injector.invalidate("api.example.com", &bearer, &credential).await);
    }

    #[tokio::test]
    async fn test_tokens_are_cached_per_client() {
        let (injector, fetcher) = injector(Some(Duration::from_secs(600)));
        let global = oauth2();
        let other_client = AuthConfig::Oauth2ClientCredentials {
            token_endpoint: "https://auth.example.com/token".to_string(),
            client_id: "admin".to_string(),
            client_secret_source: CredentialSource::Inline("other".to_string()),
            scope: None,
            cache_ttl: "1h".to_string(),
            injection_point: None,
        };
        let other_scope = AuthConfig::Oauth2ClientCredentials {
            token_endpoint: "https://auth.example.com/token".to_string(),
            client_id: "gateway".to_string(),
            client_secret_source: CredentialSource::Inline("s3cret".to_string()),
            scope: Some("admin".to_string()),
            cache_ttl: "1h".to_string(),
            injection_point: None,
        };

        let a = injector.resolve("api.example.com", &global).await.unwrap();
        let b = injector.resolve("api.example.com", &other_client).await.unwrap();
        let c = injector.resolve("api.example.com", &other_scope).await.unwrap();
        assert_ne!(a.raw, b.raw);
        assert_ne!(a.raw, c.raw);
        assert_ne!(b.raw, c.raw);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
        assert_eq!(injector.cached_keys(), 3);

        let again = injector.resolve("api.example.com", &global).await.unwrap();
        assert_eq!(again.raw, a.raw);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oauth2_token_expires() {
        let (injector, fetcher) = injector(Some(Duration::from_secs(120)));
        let auth = oauth2();

        injector.resolve("api.example.com", &auth).await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        injector.resolve("api.example.com", &auth).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        injector.resolve("api.example.com", &auth).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_secret_is_never_printed() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{secret}"), "***");
        assert_eq!(format!("{secret:?}"), "***");
        let credential = Credential {
            scheme: AuthScheme::BearerStatic,
            raw: secret.clone(),
            header_value: Secret::new("Bearer hunter2"),
            injection: None,
            issued: None,
        };
        assert!(!format!("{credential:?}").contains("hunter2"));
    }
}
