use std::time::Duration;

use rocpp_tester::{
    scenarios::{run_scenario, websocket::sendable_close_codes, ScenarioKind, ScenarioOutcome},
    session::Session,
};

use crate::harness::{
    charge_point::SimChargePoint,
    context::{scenario_context, unattended},
    logger::init_logger,
};

pub async fn run() {
    init_logger();
    let session = Session::new("CP_WEBSOCKET");
    let sim = SimChargePoint::connect(&session);

    let mut ctx = scenario_context(&session, unattended());
    let report = run_scenario(&ScenarioKind::Websocket.scenario(), &mut ctx).await;
    assert!(report.passed(), "{:?}", report.outcome);

    let codes: Vec<u16> = sendable_close_codes().collect();
    assert_eq!(sim.state().closed_with, codes);
    assert_eq!(sim.state().boots, 1 + codes.len() as u32);
    assert!(session.is_connected());
}

pub async fn device_that_stays_away_fails() {
    init_logger();
    let session = Session::new("CP_WEBSOCKET_GONE");
    let sim = SimChargePoint::connect(&session);
    sim.state().quirks.stays_offline = true;

    let mut ctx = scenario_context(&session, unattended());
    let report = run_scenario(&ScenarioKind::Websocket.scenario(), &mut ctx).await;
    match &report.outcome {
        ScenarioOutcome::Failed { sub_test, reason } => {
            assert_eq!(*sub_test, "reconnect after close");
            assert!(reason.contains("reconnect after close 1000"), "{reason}");
        }
        other => panic!("expected a failed reconnect, got {other:?}"),
    }
    assert_eq!(sim.state().closed_with, vec![1000]);
    assert!(!session.is_connected());
    assert!(!session.wait_connected(Duration::from_secs(5)).await.observed());
}
