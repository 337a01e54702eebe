//! Immutable compiled configuration, published atomically to the gateway.
use std::sync::Arc;

use http::HeaderName;

use crate::{
    config::{
        ConfigValidator, PluginSpec, PluginStage, ProxyConfig, ProxyMode, ValidationError,
        ValidationResult,
    },
    core::{
        forwarder::UpstreamSettings,
        matcher::RuleMatcher,
        plugins::{Plugin, PluginChain},
    },
};

/// Everything a request reads at entry: rules, plugins and upstream settings.
///
/// A request loads one snapshot and uses it to completion, so a reload never
/// mixes old and new configuration within a request.
#[derive(Debug, Clone)]
pub struct RuntimeSnapshot {
    pub config: Arc<ProxyConfig>,
    pub matcher: RuleMatcher,
    pub plugins: PluginChain,
    pub upstream: UpstreamSettings,
    pub correlation_header: HeaderName,
}

impl RuntimeSnapshot {
    /// Validate and compile. Nothing is partially applied on error.
    pub fn build(config: ProxyConfig, plugins: &[PluginSpec]) -> ValidationResult<Self> {
        ConfigValidator::validate_proxy(&config, plugins)?;

        let matcher = RuleMatcher::compile(&config)?;
        let chain = PluginChain::from_specs(plugins)?;
        let upstream = UpstreamSettings::from_config(&config)?;
        let correlation_header = HeaderName::from_bytes(config.correlation_header.as_bytes())
            .map_err(|e| ValidationError::InvalidField {
                field: "proxy.correlation_header".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            config: Arc::new(config),
            matcher,
            plugins: chain,
            upstream,
            correlation_header,
        })
    }

    /// Add a programmatic plugin before the snapshot is published.
    pub fn with_plugin(
        mut self,
        name: impl Into<String>,
        stage: PluginStage,
        priority: i32,
        plugin: Arc<dyn Plugin>,
    ) -> Self {
        self.plugins.register(name, stage, priority, plugin);
        self
    }

    pub fn mode(&self) -> ProxyMode {
        self.config.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PluginKind, RouteDecision, RouteRule};

    #[test]
    fn test_build_compiles_everything() {
        let config = ProxyConfig::builder()
            .mode(ProxyMode::Hybrid)
            .target_base_url("https://api.example.com/v1")
            .default_timeout("750ms")
            .route(RouteRule::new("users", RouteDecision::Mock).path("/users/**"))
            .build();
        let plugins = vec![PluginSpec {
            name: "redact".to_string(),
            stage: PluginStage::PostResponse,
            priority: 0,
            kind: PluginKind::RedactFields {
                fields: vec!["ssn".to_string()],
            },
        }];

        let snapshot = RuntimeSnapshot::build(config, &plugins).unwrap();
        assert_eq!(snapshot.matcher.len(), 1);
        assert_eq!(snapshot.plugins.len(), 1);
        assert_eq!(snapshot.upstream.timeout.as_millis(), 750);
        assert_eq!(
            snapshot.upstream.target.as_ref().map(|u| u.as_str()),
            Some("https://api.example.com/v1")
        );
        assert_eq!(snapshot.correlation_header, "x-correlation-id");
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = ProxyConfig::builder()
            .mode(ProxyMode::Proxy)
            .route(RouteRule::new("bad", RouteDecision::Proxy).path_regex("("))
            .build();
        assert!(RuntimeSnapshot::build(config, &[]).is_err());
    }
}
