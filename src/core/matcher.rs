//! Rule matcher: decides mock vs proxy for a request.
//!
//! Rules are evaluated strictly in configuration order and the first match wins.
//! There is no specificity ordering; operators control priority by list position.
//! All patterns are compiled once when a [`RuleMatcher`] is built, so matching on
//! the hot path is allocation free.
use http::{HeaderMap, HeaderName, Method};
use regex::Regex;
use url::Url;

use crate::config::{
    AuthConfig, ConfigValidator, HeaderPredicateConfig, MatchCriteria, MockMissPolicy,
    ProxyConfig, RouteDecision, ValidationError, ValidationResult,
};

/// Errors raised while compiling a path or header pattern.
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("invalid glob '{pattern}': {reason}")]
    Glob { pattern: String, reason: String },

    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),

    #[error("invalid header name '{0}'")]
    HeaderName(String),
}

/// Translate a path glob into an anchored regex source.
///
/// `*` stays inside one segment, `**` crosses segments, `?` is one non-`/`
/// character and `{name}` is one non-empty segment. A `/**` segment also matches
/// nothing, so `/api/**` matches `/api` itself.
pub fn glob_to_regex(glob: &str) -> Result<String, PatternError> {
    let invalid = |reason: &str| PatternError::Glob {
        pattern: glob.to_string(),
        reason: reason.to_string(),
    };

    if !glob.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }

    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');

    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '/' if chars.get(i + 1) == Some(&'*')
                && chars.get(i + 2) == Some(&'*')
                && matches!(chars.get(i + 3), None | Some('/')) =>
            {
                out.push_str("(?:/.*)?");
                i += 3;
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                out.push_str(".*");
                i += 2;
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            '{' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|c| *c == '}')
                    .ok_or_else(|| invalid("unclosed '{'"))?;
                let name: String = chars[i + 1..i + 1 + close].iter().collect();
                if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
                    return Err(invalid("parameter names must be non-empty identifiers"));
                }
                out.push_str("[^/]+");
                i += close + 2;
            }
            '}' => return Err(invalid("unmatched '}'")),
            c => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
                i += 1;
            }
        }
    }

    out.push('$');
    Ok(out)
}

/// Compiled path predicate of a rule or fixture.
#[derive(Debug, Clone)]
pub enum PathPattern {
    Any,
    Glob { source: String, regex: Regex },
    Regex(Regex),
}

impl PathPattern {
    pub fn glob(pattern: &str) -> Result<Self, PatternError> {
        let regex = Regex::new(&glob_to_regex(pattern)?)?;
        Ok(PathPattern::Glob {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Regexes are anchored to the whole path
    pub fn regex(pattern: &str) -> Result<Self, PatternError> {
        Ok(PathPattern::Regex(Regex::new(&format!("^(?:{pattern})$"))?))
    }

    pub fn from_criteria(criteria: &MatchCriteria) -> Result<Self, PatternError> {
        match (&criteria.path, &criteria.path_regex) {
            (Some(glob), _) => Self::glob(glob),
            (None, Some(regex)) => Self::regex(regex),
            (None, None) => Ok(PathPattern::Any),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Any => true,
            PathPattern::Glob { regex, .. } | PathPattern::Regex(regex) => regex.is_match(path),
        }
    }
}

/// Header must be present and, when a value regex is set, one of its values must match.
#[derive(Debug, Clone)]
pub struct HeaderPredicate {
    name: HeaderName,
    value: Option<Regex>,
}

impl HeaderPredicate {
    pub fn compile(config: &HeaderPredicateConfig) -> Result<Self, PatternError> {
        let name = HeaderName::from_bytes(config.name.as_bytes())
            .map_err(|_| PatternError::HeaderName(config.name.clone()))?;
        let value = config.value_matches.as_deref().map(Regex::new).transpose()?;
        Ok(Self { name, value })
    }

    pub fn matches(&self, headers: &HeaderMap) -> bool {
        let mut values = headers.get_all(&self.name).iter().peekable();
        match &self.value {
            None => values.peek().is_some(),
            Some(regex) => values.any(|v| v.to_str().is_ok_and(|s| regex.is_match(s))),
        }
    }
}

/// A route rule with all patterns compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: String,
    methods: Vec<Method>,
    path: PathPattern,
    headers: Vec<HeaderPredicate>,
    pub decision: RouteDecision,
    pub auth_override: Option<AuthConfig>,
    pub upstream: Option<Url>,
    pub on_mock_miss: Option<MockMissPolicy>,
}

impl CompiledRule {
    pub fn matches(&self, method: &Method, path: &str, headers: &HeaderMap) -> bool {
        (self.methods.is_empty() || self.methods.contains(method))
            && self.path.matches(path)
            && self.headers.iter().all(|h| h.matches(headers))
    }
}

/// Result of matching one request.
#[derive(Debug, Clone, Copy)]
pub struct RouteMatch<'a> {
    pub decision: RouteDecision,
    /// `None` when the mode default applied
    pub rule: Option<&'a CompiledRule>,
}

impl RouteMatch<'_> {
    pub fn rule_id(&self) -> Option<&str> {
        self.rule.map(|r| r.id.as_str())
    }
}

/// Ordered rule list plus the mode default.
#[derive(Debug, Clone)]
pub struct RuleMatcher {
    rules: Vec<CompiledRule>,
    default_decision: RouteDecision,
}

impl RuleMatcher {
    /// Compile every rule of an already validated configuration.
    pub fn compile(config: &ProxyConfig) -> ValidationResult<Self> {
        let mut rules = Vec::with_capacity(config.routes.len());
        for rule in &config.routes {
            let field = format!("route '{}'", rule.id);
            let pattern_error = |e: PatternError| ValidationError::InvalidPattern {
                field: field.clone(),
                message: e.to_string(),
            };

            let path = PathPattern::from_criteria(&rule.criteria).map_err(pattern_error)?;
            let headers = rule
                .criteria
                .headers
                .iter()
                .map(HeaderPredicate::compile)
                .collect::<Result<Vec<_>, _>>()
                .map_err(pattern_error)?;
            let methods = rule
                .criteria
                .methods
                .iter()
                .map(|m| ConfigValidator::parse_method(&field, m))
                .collect::<ValidationResult<Vec<_>>>()?;
            let upstream = rule
                .upstream
                .as_deref()
                .map(|u| ConfigValidator::parse_url(&field, u))
                .transpose()?;

            rules.push(CompiledRule {
                id: rule.id.clone(),
                methods,
                path,
                headers,
                decision: rule.decision,
                auth_override: rule.auth_override.clone(),
                upstream,
                on_mock_miss: rule.on_mock_miss,
            });
        }

        Ok(Self {
            rules,
            default_decision: config.mode.default_decision(),
        })
    }

    /// First matching rule in list order, or the mode default.
    pub fn match_request(&self, method: &Method, path: &str, headers: &HeaderMap) -> RouteMatch<'_> {
        match self.rules.iter().find(|r| r.matches(method, path, headers)) {
            Some(rule) => RouteMatch {
                decision: rule.decision,
                rule: Some(rule),
            },
            None => RouteMatch {
                decision: self.default_decision,
                rule: None,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;
    use crate::config::{ProxyMode, RouteRule};

    fn matcher(mode: ProxyMode, routes: Vec<RouteRule>) -> RuleMatcher {
        let mut builder = ProxyConfig::builder().mode(mode);
        for rule in routes {
            builder = builder.route(rule);
        }
        RuleMatcher::compile(&builder.build()).unwrap()
    }

    #[test]
    fn test_glob_translation() {
        let single = PathPattern::glob("/users/*").unwrap();
        assert!(single.matches("/users/42"));
        assert!(!single.matches("/users/42/orders"));
        assert!(!single.matches("/users"));

        let deep = PathPattern::glob("/api/**").unwrap();
        assert!(deep.matches("/api"));
        assert!(deep.matches("/api/v1/users"));
        assert!(!deep.matches("/apix"));

        let middle = PathPattern::glob("/a/**/z").unwrap();
        assert!(middle.matches("/a/z"));
        assert!(middle.matches("/a/b/c/z"));

        let template = PathPattern::glob("/users/{id}/orders/?").unwrap();
        assert!(template.matches("/users/7/orders/1"));
        assert!(!template.matches("/users//orders/1"));
        assert!(!template.matches("/users/7/orders/12"));

        let literal = PathPattern::glob("/v1.0/items").unwrap();
        assert!(!literal.matches("/v1x0/items"));
    }

    #[test]
    fn test_invalid_globs() {
        assert!(PathPattern::glob("users/*").is_err());
        assert!(PathPattern::glob("/users/{id").is_err());
        assert!(PathPattern::glob("/users/{}").is_err());
        assert!(PathPattern::glob("/users/id}").is_err());
    }

    #[test]
    fn test_regex_is_anchored() {
        let pattern = PathPattern::regex(r"/users/\d+").unwrap();
        assert!(pattern.matches("/users/42"));
        assert!(!pattern.matches("/v2/users/42"));
        assert!(!pattern.matches("/users/42/orders"));
    }

    #[test]
    fn test_first_match_wins_regardless_of_specificity() {
        let matcher = matcher(
            ProxyMode::Hybrid,
            vec![
                RouteRule::new("broad", RouteDecision::Mock).path("/users/**"),
                RouteRule::new("narrow", RouteDecision::Proxy).path("/users/42"),
            ],
        );
        let result = matcher.match_request(&Method::GET, "/users/42", &HeaderMap::new());
        assert_eq!(result.decision, RouteDecision::Mock);
        assert_eq!(result.rule_id(), Some("broad"));
    }

    #[test]
    fn test_default_decision_follows_mode() {
        let hybrid = matcher(ProxyMode::Hybrid, vec![]);
        let result = hybrid.match_request(&Method::GET, "/anything", &HeaderMap::new());
        assert_eq!(result.decision, RouteDecision::Proxy);
        assert!(result.rule.is_none());

        let mock = matcher(ProxyMode::Mock, vec![]);
        let result = mock.match_request(&Method::GET, "/anything", &HeaderMap::new());
        assert_eq!(result.decision, RouteDecision::Mock);
    }

    #[test]
    fn test_methods_and_headers_must_all_hold() {
        let matcher = matcher(
            ProxyMode::Hybrid,
            vec![RouteRule::new("beta", RouteDecision::Mock)
                .path("/orders/*")
                .methods(["get", "POST"])
                .header("x-beta", Some("^(1|true)$"))],
        );

        let mut headers = HeaderMap::new();
        assert!(matcher.match_request(&Method::GET, "/orders/1", &headers).rule.is_none());

        headers.append("x-beta", HeaderValue::from_static("no"));
        headers.append("x-beta", HeaderValue::from_static("true"));
        assert_eq!(
            matcher.match_request(&Method::GET, "/orders/1", &headers).rule_id(),
            Some("beta")
        );
        assert!(matcher.match_request(&Method::DELETE, "/orders/1", &headers).rule.is_none());
    }

    #[test]
    fn test_header_presence_only() {
        let predicate = HeaderPredicate::compile(&HeaderPredicateConfig {
            name: "X-Mock".to_string(),
            value_matches: None,
        })
        .unwrap();
        let mut headers = HeaderMap::new();
        assert!(!predicate.matches(&headers));
        headers.insert("x-mock", HeaderValue::from_static(""));
        assert!(predicate.matches(&headers));
    }
}
