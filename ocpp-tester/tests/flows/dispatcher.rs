use std::{sync::Arc, time::Duration};

use rocpp_core::v16::{types::RegistrationStatus, Action};
use rocpp_tester::{
    config::TesterConfig,
    dispatcher,
    operator::ScriptedOperator,
    scenarios::Selection,
    session::Session,
    sync::await_action,
    transport::ServerContext,
};

use crate::harness::{charge_point::SimChargePoint, logger::init_logger};

pub async fn silent_device_is_reset() {
    init_logger();
    let session = Session::new("CP_SILENT");
    // Connected, but never sends a BootNotification on its own.
    let sim = SimChargePoint::attach(&session);
    let operator = Arc::new(ScriptedOperator::default());
    let config = TesterConfig {
        boot_poll_interval: 1,
        boot_poll_attempts: 2,
        ..TesterConfig::default()
    };
    let task = tokio::spawn(dispatcher::run(
        session.clone(),
        ServerContext::new(config, operator.clone()),
    ));

    let booted = await_action(&session, Action::BootNotification, Some(Duration::from_secs(30))).await;
    assert!(booted.observed());
    assert_eq!(sim.received(Action::Reset), 1);
    assert_eq!(session.registration(), RegistrationStatus::Accepted);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(operator.prompts(), vec![Selection::PROMPT.to_owned()]);
    task.abort();
}
