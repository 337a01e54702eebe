use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::ports::ScenarioResolver;

/// Holds the active scenario key; settable at runtime.
pub struct StaticScenarioResolver {
    current: ArcSwap<String>,
}

impl StaticScenarioResolver {
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            current: ArcSwap::from_pointee(scenario.into()),
        }
    }

    pub fn set(&self, scenario: impl Into<String>) {
        let scenario = scenario.into();
        tracing::info!(scenario = %scenario, "Active scenario changed");
        self.current.store(Arc::new(scenario));
    }
}

impl ScenarioResolver for StaticScenarioResolver {
    fn current_scenario_key(&self) -> String {
        self.current.load().as_ref().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_changes_current_key() {
        let resolver = StaticScenarioResolver::new("default");
        assert_eq!(resolver.current_scenario_key(), "default");
        resolver.set("outage");
        assert_eq!(resolver.current_scenario_key(), "outage");
    }
}
