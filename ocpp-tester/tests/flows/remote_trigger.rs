use rocpp_core::v16::{
    types::{DiagnosticsStatus, FirmwareStatus},
    Action,
};
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
    let session = Session::new("CP_TRIGGER");
    let sim = SimChargePoint::connect(&session);

    let mut ctx = scenario_context(&session, unattended());
    let report = run_scenario(&ScenarioKind::RemoteTrigger.scenario(), &mut ctx).await;
    assert!(report.passed(), "{:?}", report.outcome);
    assert_eq!(report.sub_tests.len(), 4);

    assert_eq!(sim.received(Action::TriggerMessage), 6);
    assert_eq!(sim.state().boots, 1, "a rejected boot trigger sends nothing");
    assert_eq!(session.with_state(|s| s.firmware_status), Some(FirmwareStatus::Idle));
    assert_eq!(
        session.with_state(|s| s.diagnostics_status),
        Some(DiagnosticsStatus::Idle)
    );
}

pub async fn boot_on_trigger_while_accepted_fails() {
    init_logger();
    let session = Session::new("CP_TRIGGER_REBOOT");
    let sim = SimChargePoint::connect(&session);
    sim.state().quirks.boots_on_trigger = true;

    let mut ctx = scenario_context(&session, unattended());
    let report = run_scenario(&ScenarioKind::RemoteTrigger.scenario(), &mut ctx).await;
    match &report.outcome {
        ScenarioOutcome::Failed { sub_test, reason } => {
            assert_eq!(*sub_test, "boot notification");
            assert!(reason.contains("answered Accepted"), "{reason}");
        }
        other => panic!("expected a failed boot trigger, got {other:?}"),
    }
    assert!(matches!(
        report.sub_tests.first(),
        Some(("boot notification", SubTestOutcome::Failed(_)))
    ));
    assert!(!report.transport_failure);
}
