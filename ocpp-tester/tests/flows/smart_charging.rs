use rocpp_core::v16::{types::ChargePointStatus, Action};
use rocpp_tester::{scenarios::ScenarioKind, session::Session};

use crate::harness::{
    charge_point::{SimChargePoint, CONNECTOR},
    context::{scenario_context, unattended},
    logger::init_logger,
};

pub async fn run() {
    init_logger();
    let session = Session::new("CP_SMART");
    let sim = SimChargePoint::connect(&session);
    let scenario = ScenarioKind::SmartCharging.scenario();
    let mut ctx = scenario_context(&session, unattended());

    (scenario.setup)(&mut ctx).await.expect("setup");
    let (outside, rest) = scenario.sub_tests.split_first().expect("sub-tests");
    (outside.run)(&mut ctx).await.expect(outside.name);

    sim.plug_in();
    let tx = sim.start_transaction("test_tag").expect("transaction started");
    for sub_test in rest.iter().filter(|t| !t.manual) {
        if let Err(e) = (sub_test.run)(&mut ctx).await {
            panic!("{}: {e:#}", sub_test.name);
        }
    }
    assert!(rest.iter().any(|t| t.manual));

    assert_eq!(session.with_state(|s| s.active_transaction_id()), Some(tx));
    // 16 A within the transaction, 16 and 0 A, 6, 5 and 80 A; 81 A is refused.
    assert_eq!(sim.received(Action::SetChargingProfile), 8);
    assert_eq!(
        session.with_state(|s| s.charging.installed().len()),
        1,
        "later TxProfiles replace earlier ones at the same stack level"
    );
    assert_eq!(session.connector_status(CONNECTOR), ChargePointStatus::Charging);
}
