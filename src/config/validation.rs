use std::{collections::HashSet, net::SocketAddr, time::Duration};

use http::{HeaderName, HeaderValue, Method, StatusCode};

use crate::{
    config::models::{
        AuthConfig, CredentialSource, FixturesConfig, GatewayConfig, HeaderPredicateConfig,
        InjectionPoint, PluginKind, PluginSpec, ProxyConfig, ProxyMode, RetryPolicyConfig,
        RouteDecision, RouteRule,
    },
    core::matcher::{HeaderPredicate, PathPattern},
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid pattern in {field}: {message}")]
    InvalidPattern { field: String, message: String },

    #[error("Invalid auth configuration in {field}: {message}")]
    InvalidAuth { field: String, message: String },

    #[error("Duplicate route rule id '{id}'")]
    DuplicateRule { id: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

const KNOWN_METHODS: [&str; 9] = [
    "GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS", "TRACE", "CONNECT",
];

/// Configuration validator. Collects every problem and reports them together.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire gateway configuration
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if config.max_body_bytes == 0 {
            errors.push(ValidationError::InvalidField {
                field: "max_body_bytes".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        Self::collect_proxy_errors(&config.proxy, &config.plugins, &mut errors);
        Self::collect_fixture_errors(&config.fixtures, &mut errors);

        Self::finish(errors)
    }

    /// Validate the hot-swappable part of the configuration: routing, upstream,
    /// auth and plugins.
    pub fn validate_proxy(proxy: &ProxyConfig, plugins: &[PluginSpec]) -> ValidationResult<()> {
        let mut errors = Vec::new();
        Self::collect_proxy_errors(proxy, plugins, &mut errors);
        Self::finish(errors)
    }

    /// Parse a humantime duration string, naming the field on failure
    pub fn parse_duration(field: &str, value: &str) -> ValidationResult<Duration> {
        humantime::parse_duration(value.trim()).map_err(|e| ValidationError::InvalidField {
            field: field.to_string(),
            message: format!("Invalid duration '{value}': {e}"),
        })
    }

    /// Parse an HTTP method name, accepting only the standard verbs
    pub fn parse_method(field: &str, value: &str) -> ValidationResult<Method> {
        let upper = value.trim().to_ascii_uppercase();
        if !KNOWN_METHODS.contains(&upper.as_str()) {
            return Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: format!("Unknown HTTP method '{value}'"),
            });
        }
        Method::from_bytes(upper.as_bytes()).map_err(|e| ValidationError::InvalidField {
            field: field.to_string(),
            message: e.to_string(),
        })
    }

    /// Parse an absolute http(s) URL
    pub fn parse_url(field: &str, value: &str) -> ValidationResult<url::Url> {
        match url::Url::parse(value) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: field.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: field.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(url)
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    fn collect_proxy_errors(
        proxy: &ProxyConfig,
        plugins: &[PluginSpec],
        errors: &mut Vec<ValidationError>,
    ) {
        match (&proxy.target_base_url, proxy.mode) {
            (Some(url), _) => {
                if let Err(e) = Self::parse_url("proxy.target_base_url", url) {
                    errors.push(e);
                }
            }
            (None, ProxyMode::Mock) => {}
            (None, _) => errors.push(ValidationError::MissingField {
                field: "proxy.target_base_url".to_string(),
            }),
        }

        if let Err(e) = Self::parse_duration("proxy.default_timeout", &proxy.default_timeout) {
            errors.push(e);
        }

        if let Err(e) = HeaderName::from_bytes(proxy.correlation_header.as_bytes()) {
            errors.push(ValidationError::InvalidField {
                field: "proxy.correlation_header".to_string(),
                message: e.to_string(),
            });
        }

        Self::collect_retry_errors(&proxy.retry_policy, errors);
        Self::collect_auth_errors("proxy.auth", &proxy.auth, errors);

        let mut seen_ids = HashSet::new();
        for (index, rule) in proxy.routes.iter().enumerate() {
            if !rule.id.is_empty() && !seen_ids.insert(rule.id.as_str()) {
                errors.push(ValidationError::DuplicateRule {
                    id: rule.id.clone(),
                });
            }
            Self::collect_rule_errors(index, rule, proxy.mode, errors);
        }

        Self::collect_plugin_errors(plugins, errors);
    }

    fn collect_retry_errors(policy: &RetryPolicyConfig, errors: &mut Vec<ValidationError>) {
        if policy.max_attempts == 0 {
            errors.push(ValidationError::InvalidField {
                field: "proxy.retry_policy.max_attempts".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        let base = Self::parse_duration("proxy.retry_policy.backoff_base", &policy.backoff_base);
        let max = Self::parse_duration("proxy.retry_policy.backoff_max", &policy.backoff_max);
        match (base, max) {
            (Ok(base), Ok(max)) => {
                if max < base {
                    errors.push(ValidationError::InvalidField {
                        field: "proxy.retry_policy.backoff_max".to_string(),
                        message: format!(
                            "Must not be smaller than backoff_base ({})",
                            policy.backoff_base
                        ),
                    });
                }
            }
            (base, max) => {
                errors.extend(base.err());
                errors.extend(max.err());
            }
        }
    }

    fn collect_rule_errors(
        index: usize,
        rule: &RouteRule,
        mode: ProxyMode,
        errors: &mut Vec<ValidationError>,
    ) {
        let field = if rule.id.is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("proxy.routes[{index}].id"),
            });
            format!("proxy.routes[{index}]")
        } else {
            format!("route '{}'", rule.id)
        };

        if rule.criteria.path.is_some() && rule.criteria.path_regex.is_some() {
            errors.push(ValidationError::InvalidField {
                field: format!("{field} match"),
                message: "Use either 'path' or 'path_regex', not both".to_string(),
            });
        }

        if let Err(e) = PathPattern::from_criteria(&rule.criteria) {
            errors.push(ValidationError::InvalidPattern {
                field: format!("{field} match"),
                message: e.to_string(),
            });
        }

        for method in &rule.criteria.methods {
            if let Err(e) = Self::parse_method(&format!("{field} match.methods"), method) {
                errors.push(e);
            }
        }

        for predicate in &rule.criteria.headers {
            Self::collect_header_predicate_errors(&format!("{field} match.headers"), predicate, errors);
        }

        match (mode, rule.decision) {
            (ProxyMode::Mock, RouteDecision::Proxy) | (ProxyMode::Proxy, RouteDecision::Mock) => {
                errors.push(ValidationError::InvalidField {
                    field: format!("{field} decision"),
                    message: format!(
                        "Decision '{}' contradicts gateway mode '{mode}'",
                        rule.decision
                    ),
                });
            }
            _ => {}
        }

        if let Some(upstream) = &rule.upstream
            && let Err(e) = Self::parse_url(&format!("{field} upstream"), upstream)
        {
            errors.push(e);
        }

        if let Some(auth) = &rule.auth_override {
            Self::collect_auth_errors(&format!("{field} auth_override"), auth, errors);
        }
    }

    fn collect_header_predicate_errors(
        field: &str,
        predicate: &HeaderPredicateConfig,
        errors: &mut Vec<ValidationError>,
    ) {
        if let Err(e) = HeaderPredicate::compile(predicate) {
            errors.push(ValidationError::InvalidPattern {
                field: format!("{field} '{}'", predicate.name),
                message: e.to_string(),
            });
        }
    }

    fn collect_auth_errors(field: &str, auth: &AuthConfig, errors: &mut Vec<ValidationError>) {
        let mut invalid = |message: String| {
            errors.push(ValidationError::InvalidAuth {
                field: field.to_string(),
                message,
            })
        };

        match auth {
            AuthConfig::None => return,
            AuthConfig::ApiKey {
                credential_source, ..
            }
            | AuthConfig::BearerStatic {
                credential_source, ..
            } => {
                if let Some(message) = Self::credential_source_problem(credential_source) {
                    invalid(message);
                }
            }
            AuthConfig::Basic {
                username,
                credential_source,
                injection_point,
            } => {
                if username.is_empty() {
                    invalid("Basic auth requires a username".to_string());
                }
                if let Some(message) = Self::credential_source_problem(credential_source) {
                    invalid(message);
                }
                if matches!(injection_point, Some(point) if !matches!(point, InjectionPoint::Header(_)))
                {
                    invalid("Basic auth can only be injected into a header".to_string());
                }
            }
            AuthConfig::Oauth2ClientCredentials {
                token_endpoint,
                client_id,
                client_secret_source,
                cache_ttl,
                ..
            } => {
                if let Err(e) = Self::parse_url("token_endpoint", token_endpoint) {
                    invalid(e.to_string());
                }
                if client_id.is_empty() {
                    invalid("OAuth2 requires a client_id".to_string());
                }
                if let Some(message) = Self::credential_source_problem(client_secret_source) {
                    invalid(message);
                }
                match Self::parse_duration("cache_ttl", cache_ttl) {
                    Ok(ttl) if ttl.is_zero() => invalid("cache_ttl must be positive".to_string()),
                    Ok(_) => {}
                    Err(e) => invalid(e.to_string()),
                }
            }
        }

        match auth.injection_point() {
            Some(InjectionPoint::Header(name)) => {
                if let Err(e) = HeaderName::from_bytes(name.as_bytes()) {
                    invalid(format!("Invalid injection header '{name}': {e}"));
                }
            }
            Some(InjectionPoint::Query(name)) | Some(InjectionPoint::Body(name)) => {
                if name.is_empty() {
                    invalid("Injection point name cannot be empty".to_string());
                }
            }
            None => {}
        }
    }

    fn credential_source_problem(source: &CredentialSource) -> Option<String> {
        let (kind, value) = match source {
            CredentialSource::Inline(value) => ("inline", value),
            CredentialSource::Env(value) => ("env", value),
            CredentialSource::SecretRef(value) => ("secret_ref", value),
        };
        value
            .trim()
            .is_empty()
            .then(|| format!("Credential source '{kind}' cannot be empty"))
    }

    fn collect_plugin_errors(plugins: &[PluginSpec], errors: &mut Vec<ValidationError>) {
        let mut seen = HashSet::new();
        for (index, spec) in plugins.iter().enumerate() {
            let field = if spec.name.is_empty() {
                errors.push(ValidationError::MissingField {
                    field: format!("plugins[{index}].name"),
                });
                format!("plugins[{index}]")
            } else {
                if !seen.insert((spec.name.as_str(), spec.stage)) {
                    errors.push(ValidationError::InvalidField {
                        field: format!("plugin '{}'", spec.name),
                        message: format!("Registered twice for stage {}", spec.stage),
                    });
                }
                format!("plugin '{}'", spec.name)
            };

            if !spec.kind.allows_stage(spec.stage) {
                errors.push(ValidationError::InvalidField {
                    field: format!("{field} stage"),
                    message: format!("This plugin kind cannot run at stage {}", spec.stage),
                });
            }

            match &spec.kind {
                PluginKind::RedactFields { fields } => {
                    if fields.is_empty() {
                        errors.push(ValidationError::MissingField {
                            field: format!("{field} fields"),
                        });
                    }
                }
                PluginKind::Headers { set, remove } => {
                    for (name, value) in set {
                        if HeaderName::from_bytes(name.as_bytes()).is_err()
                            || HeaderValue::from_str(value).is_err()
                        {
                            errors.push(ValidationError::InvalidField {
                                field: format!("{field} set"),
                                message: format!("Invalid header '{name}'"),
                            });
                        }
                    }
                    for name in remove {
                        if HeaderName::from_bytes(name.as_bytes()).is_err() {
                            errors.push(ValidationError::InvalidField {
                                field: format!("{field} remove"),
                                message: format!("Invalid header name '{name}'"),
                            });
                        }
                    }
                }
                PluginKind::RequireHeader { header, status, .. } => {
                    if HeaderName::from_bytes(header.as_bytes()).is_err() {
                        errors.push(ValidationError::InvalidField {
                            field: format!("{field} header"),
                            message: format!("Invalid header name '{header}'"),
                        });
                    }
                    Self::collect_status_errors(&field, *status, errors);
                }
                PluginKind::Deny {
                    path_matches,
                    method_is,
                    has_header,
                    status,
                    ..
                } => {
                    if path_matches.is_none() && method_is.is_none() && has_header.is_none() {
                        errors.push(ValidationError::InvalidField {
                            field: field.clone(),
                            message: "Deny plugin needs at least one condition".to_string(),
                        });
                    }
                    if let Some(glob) = path_matches
                        && let Err(e) = PathPattern::glob(glob)
                    {
                        errors.push(ValidationError::InvalidPattern {
                            field: format!("{field} path_matches"),
                            message: e.to_string(),
                        });
                    }
                    if let Some(method) = method_is
                        && let Err(e) = Self::parse_method(&format!("{field} method_is"), method)
                    {
                        errors.push(e);
                    }
                    if let Some(predicate) = has_header {
                        Self::collect_header_predicate_errors(
                            &format!("{field} has_header"),
                            predicate,
                            errors,
                        );
                    }
                    Self::collect_status_errors(&field, *status, errors);
                }
            }
        }
    }

    fn collect_status_errors(field: &str, status: u16, errors: &mut Vec<ValidationError>) {
        if StatusCode::from_u16(status).is_err() {
            errors.push(ValidationError::InvalidField {
                field: format!("{field} status"),
                message: format!("{status} is not a valid HTTP status code"),
            });
        }
    }

    fn collect_fixture_errors(fixtures: &FixturesConfig, errors: &mut Vec<ValidationError>) {
        for (scenario, entries) in &fixtures.scenarios {
            for (index, fixture) in entries.iter().enumerate() {
                let field = format!("fixtures.scenarios.{scenario}[{index}]");
                if let Err(e) = PathPattern::glob(&fixture.path) {
                    errors.push(ValidationError::InvalidPattern {
                        field: format!("{field}.path"),
                        message: e.to_string(),
                    });
                }
                if let Err(e) = Self::parse_method(&format!("{field}.method"), &fixture.method) {
                    errors.push(e);
                }
                Self::collect_status_errors(&field, fixture.status, errors);
                if fixture.body.is_some() && fixture.body_text.is_some() {
                    errors.push(ValidationError::InvalidField {
                        field: field.clone(),
                        message: "Use either 'body' or 'body_text', not both".to_string(),
                    });
                }
                for (name, value) in &fixture.headers {
                    if HeaderName::from_bytes(name.as_bytes()).is_err()
                        || HeaderValue::from_str(value).is_err()
                    {
                        errors.push(ValidationError::InvalidField {
                            field: format!("{field}.headers"),
                            message: format!("Invalid header '{name}'"),
                        });
                    }
                }
            }
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn finish(errors: Vec<ValidationError>) -> ValidationResult<()> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
