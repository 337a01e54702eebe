//! In-memory fixture store backing the mock lookup.
use std::{collections::HashMap, sync::Arc};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use bytes::Bytes;
use eyre::{Result, WrapErr};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};

use crate::{
    config::{ConfigValidator, FixtureConfig, FixturesConfig},
    core::matcher::PathPattern,
    ports::{FixtureResponse, MockLookup},
};

#[derive(Debug)]
struct Fixture {
    method: Method,
    path: PathPattern,
    response: FixtureResponse,
}

impl Fixture {
    fn compile(scenario: &str, index: usize, config: &FixtureConfig) -> Result<Self> {
        let field = format!("fixtures.scenarios.{scenario}[{index}]");
        let method = ConfigValidator::parse_method(&format!("{field}.method"), &config.method)?;
        let path = PathPattern::glob(&config.path).wrap_err_with(|| format!("{field}.path"))?;
        let status = StatusCode::from_u16(config.status)
            .wrap_err_with(|| format!("{field}.status"))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes())
                    .wrap_err_with(|| format!("{field}.headers: invalid name '{name}'"))?,
                HeaderValue::from_str(value)
                    .wrap_err_with(|| format!("{field}.headers: invalid value for '{name}'"))?,
            );
        }

        let body = match (&config.body, &config.body_text) {
            (Some(json), _) => {
                if !headers.contains_key(header::CONTENT_TYPE) {
                    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
                }
                Bytes::from(serde_json::to_vec(json)?)
            }
            (None, Some(text)) => Bytes::from(text.clone()),
            (None, None) => Bytes::new(),
        };

        Ok(Self {
            method,
            path,
            response: FixtureResponse {
                status,
                headers,
                body,
            },
        })
    }
}

type Scenarios = HashMap<String, Vec<Fixture>>;

/// A fixture set that compiled cleanly and can be installed without failing.
pub struct CompiledFixtures(Scenarios);

impl CompiledFixtures {
    pub fn compile(config: &FixturesConfig) -> Result<Self> {
        compile(config).map(Self)
    }
}

/// Fixtures grouped by scenario. Within a scenario the first fixture whose
/// method and path match wins. The whole set is swapped atomically on reload.
pub struct InMemoryFixtureStore {
    scenarios: ArcSwap<Scenarios>,
}

impl InMemoryFixtureStore {
    pub fn from_config(config: &FixturesConfig) -> Result<Self> {
        Ok(Self {
            scenarios: ArcSwap::from_pointee(compile(config)?),
        })
    }

    /// Replace every scenario at once.
    pub fn replace(&self, config: &FixturesConfig) -> Result<()> {
        self.install(CompiledFixtures::compile(config)?);
        Ok(())
    }

    pub fn install(&self, fixtures: CompiledFixtures) {
        self.scenarios.store(Arc::new(fixtures.0));
    }

    pub fn fixture_count(&self) -> usize {
        self.scenarios.load().values().map(Vec::len).sum()
    }
}

fn compile(config: &FixturesConfig) -> Result<Scenarios> {
    config
        .scenarios
        .iter()
        .map(|(name, entries)| {
            let fixtures = entries
                .iter()
                .enumerate()
                .map(|(index, fixture)| Fixture::compile(name, index, fixture))
                .collect::<Result<Vec<_>>>()?;
            Ok((name.clone(), fixtures))
        })
        .collect()
}

#[async_trait]
impl MockLookup for InMemoryFixtureStore {
    async fn lookup(&self, path: &str, method: &Method, scenario: &str) -> Option<FixtureResponse> {
        let scenarios = self.scenarios.load();
        scenarios
            .get(scenario)?
            .iter()
            .find(|f| f.method == method && f.path.matches(path))
            .map(|f| f.response.clone())
    }
}
