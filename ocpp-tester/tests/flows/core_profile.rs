use std::time::Duration;

use rocpp_core::v16::{
    types::{ChargePointStatus, Reason, RegistrationStatus},
    Action,
};
use rocpp_tester::{
    scenarios::{Scenario, ScenarioContext, ScenarioKind, SubTest},
    session::Session,
};

use crate::harness::{
    charge_point::{SimChargePoint, CONNECTOR},
    context::{scenario_context, unattended},
    logger::init_logger,
};

const POLL: Duration = Duration::from_millis(500);

fn sub_test<'a>(scenario: &'a Scenario, name: &str) -> &'a SubTest {
    scenario
        .sub_tests
        .iter()
        .find(|t| t.name == name)
        .unwrap_or_else(|| panic!("no sub-test named {name}"))
}

async fn prepared(identity: &str) -> (Session, SimChargePoint, Scenario, ScenarioContext) {
    init_logger();
    let session = Session::new(identity);
    let sim = SimChargePoint::connect(&session);
    let scenario = ScenarioKind::Core.scenario();
    let mut ctx = scenario_context(&session, unattended());
    (scenario.setup)(&mut ctx).await.expect("setup");
    (session, sim, scenario, ctx)
}

async fn wait_for_setting(sim: &SimChargePoint, key: &str, value: &str) {
    while sim.setting(key).as_deref() != Some(value) {
        tokio::time::sleep(POLL).await;
    }
}

pub async fn remote_start() {
    let (session, sim, scenario, mut ctx) = prepared("CP_CORE_START").await;
    let remote_start = sub_test(&scenario, "remote start");

    // The car arrives once two starts have been abandoned for want of it.
    let car = async {
        while sim.state().abandoned_starts < 2 {
            tokio::time::sleep(POLL).await;
        }
        sim.plug_in();
    };
    let (result, ()) = tokio::join!((remote_start.run)(&mut ctx), car);
    if let Err(e) = result {
        panic!("remote start: {e:#}");
    }

    assert_eq!(sim.state().abandoned_starts, 2);
    assert_eq!(sim.received(Action::RemoteStartTransaction), 9);
    assert_eq!(sim.received(Action::RemoteStopTransaction), 2);
    assert!(sim.state().transaction.is_none());
    assert_eq!(session.connector_status(CONNECTOR), ChargePointStatus::Finishing);
}

pub async fn early_give_up_fails_remote_start() {
    let (session, sim, scenario, mut ctx) = prepared("CP_CORE_IMPATIENT").await;
    sim.state().quirks.give_up_after = Some(Duration::from_secs(3));

    let err = (sub_test(&scenario, "remote start").run)(&mut ctx)
        .await
        .expect_err("device gave up before the connection timeout");
    let message = format!("{err:#}");
    assert!(message.contains("before the 7s connection timeout"), "{message}");
    assert_eq!(sim.state().abandoned_starts, 1);
    assert_eq!(session.connector_status(CONNECTOR), ChargePointStatus::Available);
}

pub async fn boot_notification() {
    let (session, sim, scenario, mut ctx) = prepared("CP_CORE_BOOT").await;
    let boot = sub_test(&scenario, "boot notification and non-accepted state");
    if let Err(e) = (boot.run)(&mut ctx).await {
        panic!("{}: {e:#}", boot.name);
    }

    // connect, two resets, the pending retry, the triggered boot and the
    // retry after rejection
    assert_eq!(sim.state().boots, 6);
    assert_eq!(sim.state().registration, Some(RegistrationStatus::Accepted));
    assert_eq!(sim.setting("HeartbeatInterval").as_deref(), Some("30"));
    // setup, the change while pending and the read left unanswered while
    // rejected
    assert_eq!(sim.received(Action::GetConfiguration), 3);
    assert_eq!(session.connector_status(CONNECTOR), ChargePointStatus::Available);
}

pub async fn hasty_pending_retry_fails_boot() {
    let (_session, sim, scenario, mut ctx) = prepared("CP_CORE_HASTY").await;
    sim.state().quirks.pending_retry = Some(Duration::from_secs(10));

    let err = (sub_test(&scenario, "boot notification and non-accepted state").run)(&mut ctx)
        .await
        .expect_err("device retried a pending boot early");
    let message = format!("{err:#}");
    assert!(message.contains("before the 30 s interval"), "{message}");
    assert_eq!(sim.state().registration, Some(RegistrationStatus::Pending));
}

pub async fn meter_values() {
    let (session, sim, scenario, mut ctx) = prepared("CP_CORE_METER").await;
    let meter_values = sub_test(&scenario, "meter values");

    // Charging covers the sampled intervals. The car leaves once sampling
    // is switched off so the aligned phase check sees an idle connector.
    let car = async {
        wait_for_setting(&sim, "MeterValueSampleInterval", "3").await;
        sim.plug_in();
        sim.start_transaction("7d1b5f0a-accepted").expect("transaction started");
        wait_for_setting(&sim, "MeterValueSampleInterval", "0").await;
        sim.state().car_connected = false;
        sim.stop_transaction(Reason::EVDisconnected);
    };
    let (result, ()) = tokio::join!((meter_values.run)(&mut ctx), car);
    if let Err(e) = result {
        panic!("meter values: {e:#}");
    }

    assert_eq!(sim.setting("ClockAlignedDataInterval").as_deref(), Some("0"));
    assert_eq!(
        sim.setting("MeterValuesAlignedData").as_deref(),
        Some("Current.Import.L1,Temperature.L2,Voltage.L3")
    );
    assert_eq!(session.connector_status(CONNECTOR), ChargePointStatus::Available);
}

pub async fn slow_meter_fails_meter_values() {
    let (_session, sim, scenario, mut ctx) = prepared("CP_CORE_SLOW_METER").await;
    sim.state().quirks.meter_lag = Duration::from_secs(1);

    let err = (sub_test(&scenario, "meter values").run)(&mut ctx)
        .await
        .expect_err("meter reported late");
    let message = format!("{err:#}");
    assert!(message.contains("ClockAlignedDataInterval of 3 s"), "{message}");
}
