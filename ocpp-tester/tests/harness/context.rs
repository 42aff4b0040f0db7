use std::sync::Arc;

use rocpp_tester::{
    config::TesterConfig, operator::ScriptedOperator, scenarios::ScenarioContext,
    session::Session,
};

/// Scenario context with no operator answers and no fault injector.
pub fn scenario_context(session: &Session, config: TesterConfig) -> ScenarioContext {
    ScenarioContext::new(
        session.clone(),
        Arc::new(ScriptedOperator::default()),
        None,
        Arc::new(config),
    )
}

/// Automatic sub-tests only.
pub fn unattended() -> TesterConfig {
    TesterConfig {
        include_manual: false,
        ..TesterConfig::default()
    }
}
