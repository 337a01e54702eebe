//! Configuration data structures for Mirage.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files. They are
//! serde-friendly and carry defaults so that minimal configs remain concise.
//! Durations are humantime strings (`"500ms"`, `"2s"`) and are parsed when the
//! configuration is validated and compiled into a runtime snapshot.
use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

/// Root of a Mirage configuration file.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Inbound bodies larger than this are rejected with 413
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub plugins: Vec<PluginSpec>,
    #[serde(default)]
    pub fixtures: FixturesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_body_bytes: default_max_body_bytes(),
            proxy: ProxyConfig::default(),
            plugins: Vec::new(),
            fixtures: FixturesConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Overall operating mode of the gateway.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProxyMode {
    /// Serve only from local fixtures
    Mock,
    /// Forward every request to the upstream
    #[default]
    Proxy,
    /// Per-request choice driven by the route rules
    Hybrid,
}

impl ProxyMode {
    /// Decision applied when no route rule matches.
    pub fn default_decision(self) -> RouteDecision {
        match self {
            ProxyMode::Mock => RouteDecision::Mock,
            ProxyMode::Proxy | ProxyMode::Hybrid => RouteDecision::Proxy,
        }
    }
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyMode::Mock => write!(f, "mock"),
            ProxyMode::Proxy => write!(f, "proxy"),
            ProxyMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Where a single request is sent.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RouteDecision {
    Mock,
    Proxy,
}

impl fmt::Display for RouteDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteDecision::Mock => write!(f, "mock"),
            RouteDecision::Proxy => write!(f, "proxy"),
        }
    }
}

/// What happens when a mock-routed request has no fixture.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MockMissPolicy {
    /// Surface a 404
    #[default]
    NotFound,
    /// Fall through to the upstream (honoured in hybrid mode only)
    Proxy,
}

fn default_timeout() -> String {
    "30s".to_string()
}

fn default_correlation_header() -> String {
    "x-correlation-id".to_string()
}

fn default_true() -> bool {
    true
}

/// Process-wide routing and upstream configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProxyConfig {
    #[serde(default)]
    pub mode: ProxyMode,
    #[serde(default)]
    pub target_base_url: Option<String>,
    /// Per-attempt upstream timeout, e.g. "500ms"
    #[serde(default = "default_timeout")]
    pub default_timeout: String,
    #[serde(default)]
    pub retry_policy: RetryPolicyConfig,
    #[serde(default)]
    pub fallback_on_error: bool,
    #[serde(default)]
    pub on_mock_miss: MockMissPolicy,
    /// Re-resolve a refreshable credential once after an upstream 401
    #[serde(default = "default_true")]
    pub retry_on_unauthorized: bool,
    #[serde(default = "default_correlation_header")]
    pub correlation_header: String,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Ordered; the first matching rule wins
    #[serde(default)]
    pub routes: Vec<RouteRule>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            mode: ProxyMode::default(),
            target_base_url: None,
            default_timeout: default_timeout(),
            retry_policy: RetryPolicyConfig::default(),
            fallback_on_error: false,
            on_mock_miss: MockMissPolicy::default(),
            retry_on_unauthorized: true,
            correlation_header: default_correlation_header(),
            auth: AuthConfig::default(),
            routes: Vec::new(),
        }
    }
}

impl ProxyConfig {
    /// Create a new proxy configuration builder
    pub fn builder() -> ProxyConfigBuilder {
        ProxyConfigBuilder::default()
    }
}

/// Builder for ProxyConfig to allow for cleaner configuration creation
#[derive(Default)]
pub struct ProxyConfigBuilder {
    config: ProxyConfig,
}

impl ProxyConfigBuilder {
    pub fn mode(mut self, mode: ProxyMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn target_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.target_base_url = Some(url.into());
        self
    }

    pub fn default_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.config.default_timeout = timeout.into();
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicyConfig) -> Self {
        self.config.retry_policy = policy;
        self
    }

    pub fn fallback_on_error(mut self, enabled: bool) -> Self {
        self.config.fallback_on_error = enabled;
        self
    }

    pub fn on_mock_miss(mut self, policy: MockMissPolicy) -> Self {
        self.config.on_mock_miss = policy;
        self
    }

    pub fn retry_on_unauthorized(mut self, enabled: bool) -> Self {
        self.config.retry_on_unauthorized = enabled;
        self
    }

    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.config.auth = auth;
        self
    }

    /// Append a rule at the lowest priority position
    pub fn route(mut self, rule: RouteRule) -> Self {
        self.config.routes.push(rule);
        self
    }

    pub fn build(self) -> ProxyConfig {
        self.config
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> String {
    "100ms".to_string()
}

fn default_backoff_max() -> String {
    "2s".to_string()
}

/// Transport-level retry policy for upstream calls.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryPolicyConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base: String,
    #[serde(default = "default_backoff_max")]
    pub backoff_max: String,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base: default_backoff_base(),
            backoff_max: default_backoff_max(),
        }
    }
}

/// A routing rule: predicate on the request plus the decision it yields.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RouteRule {
    pub id: String,
    #[serde(rename = "match", default)]
    pub criteria: MatchCriteria,
    pub decision: RouteDecision,
    #[serde(default)]
    pub auth_override: Option<AuthConfig>,
    /// Upstream base URL used instead of `target_base_url` for this rule
    #[serde(default)]
    pub upstream: Option<String>,
    #[serde(default)]
    pub on_mock_miss: Option<MockMissPolicy>,
}

impl RouteRule {
    pub fn new(id: impl Into<String>, decision: RouteDecision) -> Self {
        Self {
            id: id.into(),
            criteria: MatchCriteria::default(),
            decision,
            auth_override: None,
            upstream: None,
            on_mock_miss: None,
        }
    }

    pub fn path(mut self, glob: impl Into<String>) -> Self {
        self.criteria.path = Some(glob.into());
        self
    }

    pub fn path_regex(mut self, regex: impl Into<String>) -> Self {
        self.criteria.path_regex = Some(regex.into());
        self
    }

    pub fn methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.criteria.methods = methods.into_iter().map(Into::into).collect();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value_matches: Option<&str>) -> Self {
        self.criteria.headers.push(HeaderPredicateConfig {
            name: name.into(),
            value_matches: value_matches.map(str::to_string),
        });
        self
    }

    pub fn auth_override(mut self, auth: AuthConfig) -> Self {
        self.auth_override = Some(auth);
        self
    }

    pub fn upstream(mut self, url: impl Into<String>) -> Self {
        self.upstream = Some(url.into());
        self
    }

    pub fn on_mock_miss(mut self, policy: MockMissPolicy) -> Self {
        self.on_mock_miss = Some(policy);
        self
    }
}

/// Request predicate of a route rule. Every configured part must hold.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct MatchCriteria {
    /// Glob over the request path (`*`, `**`, `?`, `{param}`)
    #[serde(default)]
    pub path: Option<String>,
    /// Regex over the request path, anchored
    #[serde(default)]
    pub path_regex: Option<String>,
    /// Empty means any method
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub headers: Vec<HeaderPredicateConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HeaderPredicateConfig {
    pub name: String,
    /// Regex to match header value
    #[serde(default)]
    pub value_matches: Option<String>,
}

/// Where a secret comes from. Never printed.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    Inline(String),
    Env(String),
    SecretRef(String),
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Inline(_) => write!(f, "Inline(***)"),
            CredentialSource::Env(name) => write!(f, "Env({name})"),
            CredentialSource::SecretRef(name) => write!(f, "SecretRef({name})"),
        }
    }
}

/// Where a resolved credential is attached on the outgoing request.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InjectionPoint {
    Header(String),
    Query(String),
    Body(String),
}

fn default_cache_ttl() -> String {
    "1h".to_string()
}

/// Upstream authentication, tagged by `scheme`.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(tag = "scheme")]
#[serde(rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    ApiKey {
        credential_source: CredentialSource,
        #[serde(default)]
        injection_point: Option<InjectionPoint>,
    },
    BearerStatic {
        credential_source: CredentialSource,
        #[serde(default)]
        injection_point: Option<InjectionPoint>,
    },
    Basic {
        username: String,
        /// Password source
        credential_source: CredentialSource,
        #[serde(default)]
        injection_point: Option<InjectionPoint>,
    },
    Oauth2ClientCredentials {
        token_endpoint: String,
        client_id: String,
        client_secret_source: CredentialSource,
        #[serde(default)]
        scope: Option<String>,
        #[serde(default = "default_cache_ttl")]
        cache_ttl: String,
        #[serde(default)]
        injection_point: Option<InjectionPoint>,
    },
}

impl AuthConfig {
    pub fn scheme(&self) -> AuthScheme {
        match self {
            AuthConfig::None => AuthScheme::None,
            AuthConfig::ApiKey { .. } => AuthScheme::ApiKey,
            AuthConfig::BearerStatic { .. } => AuthScheme::BearerStatic,
            AuthConfig::Basic { .. } => AuthScheme::Basic,
            AuthConfig::Oauth2ClientCredentials { .. } => AuthScheme::Oauth2ClientCredentials,
        }
    }

    /// Configured injection point, or the scheme's default.
    pub fn injection_point(&self) -> Option<InjectionPoint> {
        let (configured, default_header) = match self {
            AuthConfig::None => return None,
            AuthConfig::ApiKey {
                injection_point, ..
            } => (injection_point, "X-API-Key"),
            AuthConfig::BearerStatic {
                injection_point, ..
            }
            | AuthConfig::Basic {
                injection_point, ..
            }
            | AuthConfig::Oauth2ClientCredentials {
                injection_point, ..
            } => (injection_point, "Authorization"),
        };
        Some(
            configured
                .clone()
                .unwrap_or_else(|| InjectionPoint::Header(default_header.to_string())),
        )
    }
}

/// Discriminant of [`AuthConfig`], used as part of the token cache key.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    None,
    ApiKey,
    BearerStatic,
    Basic,
    Oauth2ClientCredentials,
}

impl AuthScheme {
    /// Whether credentials of this scheme can be re-acquired after a 401.
    pub fn is_refreshable(self) -> bool {
        matches!(self, AuthScheme::Oauth2ClientCredentials)
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthScheme::None => "none",
            AuthScheme::ApiKey => "api_key",
            AuthScheme::BearerStatic => "bearer_static",
            AuthScheme::Basic => "basic",
            AuthScheme::Oauth2ClientCredentials => "oauth2_client_credentials",
        };
        f.write_str(name)
    }
}

/// Plugin stage.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PluginStage {
    PreRequest,
    PostResponse,
}

impl fmt::Display for PluginStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginStage::PreRequest => write!(f, "pre_request"),
            PluginStage::PostResponse => write!(f, "post_response"),
        }
    }
}

/// Declarative plugin registration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PluginSpec {
    pub name: String,
    pub stage: PluginStage,
    /// Lower runs first within a stage
    #[serde(default)]
    pub priority: i32,
    #[serde(flatten)]
    pub kind: PluginKind,
}

fn default_unauthorized_status() -> u16 {
    401
}

fn default_forbidden_status() -> u16 {
    403
}

fn default_unauthorized_message() -> String {
    "Unauthorized".to_string()
}

fn default_forbidden_message() -> String {
    "Forbidden".to_string()
}

/// Built-in plugin variants.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "kind")]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    /// Remove JSON fields (at any depth) from the body
    RedactFields { fields: Vec<String> },
    Headers {
        #[serde(default)]
        set: HashMap<String, String>,
        #[serde(default)]
        remove: Vec<String>,
    },
    RequireHeader {
        header: String,
        #[serde(default = "default_unauthorized_status")]
        status: u16,
        #[serde(default = "default_unauthorized_message")]
        message: String,
    },
    Deny {
        #[serde(default)]
        path_matches: Option<String>,
        #[serde(default)]
        method_is: Option<String>,
        #[serde(default)]
        has_header: Option<HeaderPredicateConfig>,
        #[serde(default = "default_forbidden_status")]
        status: u16,
        #[serde(default = "default_forbidden_message")]
        message: String,
    },
}

impl PluginKind {
    pub fn allows_stage(&self, stage: PluginStage) -> bool {
        match self {
            PluginKind::RedactFields { .. } | PluginKind::Headers { .. } => true,
            PluginKind::RequireHeader { .. } | PluginKind::Deny { .. } => {
                stage == PluginStage::PreRequest
            }
        }
    }
}

fn default_scenario() -> String {
    "default".to_string()
}

/// Fixture sets, keyed by scenario name.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FixturesConfig {
    #[serde(default = "default_scenario")]
    pub active_scenario: String,
    #[serde(default)]
    pub scenarios: HashMap<String, Vec<FixtureConfig>>,
}

impl Default for FixturesConfig {
    fn default() -> Self {
        Self {
            active_scenario: default_scenario(),
            scenarios: HashMap::new(),
        }
    }
}

fn default_fixture_method() -> String {
    "GET".to_string()
}

fn default_fixture_status() -> u16 {
    200
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FixtureConfig {
    #[serde(default = "default_fixture_method")]
    pub method: String,
    /// Glob or `{param}` template over the request path
    pub path: String,
    #[serde(default = "default_fixture_status")]
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub body_text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}
