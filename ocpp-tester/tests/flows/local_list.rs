use rocpp_core::v16::Action;
use rocpp_tester::{
    scenarios::{run_scenario, ScenarioKind, ScenarioOutcome, SubTestOutcome},
    session::Session,
};

use crate::harness::{
    charge_point::SimChargePoint,
    context::{scenario_context, unattended},
    logger::init_logger,
};

pub async fn run() {
    init_logger();
    let session = Session::new("CP_LOCAL_LIST");
    let sim = SimChargePoint::connect(&session);
    sim.plug_in();

    let mut ctx = scenario_context(&session, unattended());
    let report = run_scenario(&ScenarioKind::LocalList.scenario(), &mut ctx).await;
    assert!(report.passed(), "{:?}", report.outcome);
    assert!(report
        .sub_tests
        .iter()
        .all(|(_, outcome)| *outcome == SubTestOutcome::Passed));

    // One full update, four differential ones, then the clearing full update.
    assert_eq!(sim.received(Action::SendLocalList), 6);
    assert_eq!(sim.state().local_list.version(), 0);
    assert_eq!(session.with_state(|s| s.local_list.version()), 0);
}

pub async fn refused_configuration() {
    init_logger();
    let session = Session::new("CP_LOCKED");
    let sim = SimChargePoint::connect(&session);
    sim.lock_key("LocalAuthListEnabled");

    let mut ctx = scenario_context(&session, unattended());
    let report = run_scenario(&ScenarioKind::LocalList.scenario(), &mut ctx).await;
    assert!(matches!(report.outcome, ScenarioOutcome::SetupFailed(_)));
    assert!(!report.transport_failure);
    assert!(report.sub_tests.is_empty());
    assert_eq!(sim.received(Action::SendLocalList), 0);
    // Keys before the refused one stay changed.
    assert_eq!(
        sim.state().config.get("LocalPreAuthorize").map(String::as_str),
        Some("true")
    );
}
