use std::time::Duration;

use rocpp_core::v16::{types::ChargePointStatus, Action};
use rocpp_tester::{
    scenarios::{run_scenario, ScenarioKind},
    session::Session,
    sync::await_status,
};

use crate::harness::{
    charge_point::{SimChargePoint, CONNECTOR},
    context::{scenario_context, unattended},
    logger::init_logger,
};

pub async fn run() {
    init_logger();
    let session = Session::new("CP_RESERVATION");
    let sim = SimChargePoint::connect(&session);

    let mut ctx = scenario_context(&session, unattended());
    let report = run_scenario(&ScenarioKind::Reservation.scenario(), &mut ctx).await;
    assert!(report.passed(), "{:?}", report.outcome);
    assert_eq!(report.sub_tests.len(), 4);

    assert_eq!(sim.received(Action::ReserveNow), 5);
    assert_eq!(sim.received(Action::Reset), 1);
    assert_eq!(sim.state().boots, 2);
    assert!(sim.state().reservation.is_none());
    assert!(session.with_state(|s| s.reservation.is_none()));
    let available = [ChargePointStatus::Available];
    let status = await_status(&session, CONNECTOR, &available, Some(Duration::from_secs(5))).await;
    assert_eq!(status, ChargePointStatus::Available);
}
