/// Supplies the active scenario key. Read once per request.
pub trait ScenarioResolver: Send + Sync {
    fn current_scenario_key(&self) -> String;
}
