//! Applying configuration changes to a running gateway.
use std::{future::Future, sync::Arc, time::Duration};

use eyre::{Result, WrapErr};
use tokio::{sync::mpsc, time::Instant};

use crate::{
    adapters::{InMemoryFixtureStore, StaticScenarioResolver, fixtures::CompiledFixtures},
    config::{ConfigValidator, GatewayConfig},
    core::{GatewayService, RuntimeSnapshot},
};

/// Everything a reload replaces.
pub struct ReloadTargets {
    pub gateway: Arc<GatewayService>,
    pub fixtures: Arc<InMemoryFixtureStore>,
    pub scenarios: Arc<StaticScenarioResolver>,
    /// Address the server is bound to; changing it needs a restart
    pub listen_addr: String,
}

impl ReloadTargets {
    /// Validate and compile everything, then publish.
    ///
    /// Nothing is published unless the whole configuration compiled. Publication
    /// order is fixtures, then active scenario, then rules and plugins. A request
    /// that loaded the previous rules just before the last step can still see
    /// the new fixtures.
    pub async fn apply(&self, config: GatewayConfig) -> Result<()> {
        ConfigValidator::validate(&config).wrap_err("Configuration is invalid")?;
        let snapshot = RuntimeSnapshot::build(config.proxy, &config.plugins)
            .wrap_err("Failed to compile routing rules and plugins")?;
        let fixtures =
            CompiledFixtures::compile(&config.fixtures).wrap_err("Failed to compile fixtures")?;

        if config.listen_addr != self.listen_addr {
            tracing::warn!(
                current = %self.listen_addr,
                configured = %config.listen_addr,
                "listen_addr changes take effect after a restart"
            );
        }

        self.fixtures.install(fixtures);
        self.scenarios.set(config.fixtures.active_scenario);
        self.gateway.reload(snapshot).await;
        Ok(())
    }
}

/// Call `reload` for change notifications, at most once per `debounce`.
///
/// A change inside the window is applied when the window closes, together with
/// anything else that arrived meanwhile. Returns when the channel closes.
pub async fn watch_debounced<F, Fut>(mut changes: mpsc::Receiver<()>, debounce: Duration, mut reload: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut last_reload: Option<Instant> = None;
    while changes.recv().await.is_some() {
        if let Some(ready_at) = last_reload.map(|last| last + debounce)
            && Instant::now() < ready_at
        {
            tracing::debug!("Deferring config reload until the debounce window closes");
            tokio::time::sleep_until(ready_at).await;
        }
        while changes.try_recv().is_ok() {}
        last_reload = Some(Instant::now());
        reload().await;
    }
}
