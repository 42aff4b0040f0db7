use std::time::Duration;

use anyhow::{bail, ensure};
use futures_util::FutureExt;
use rocpp_core::v16::{
    types::{
        ChargePointStatus, DiagnosticsStatus, FirmwareStatus, MessageTrigger, TriggerMessageStatus,
    },
    Action,
};

use super::{
    common::{ensure_configuration, trigger, CONNECTOR},
    Scenario, ScenarioContext, ScenarioKind, SubTest,
};
use crate::{
    session::Session,
    sync::{await_action, await_status_change, clear_action},
};

const SETUP: &[(&str, &str)] = &[
    ("LocalPreAuthorize", "false"),
    ("AuthorizeRemoteTxRequests", "false"),
    ("HeartbeatInterval", "0"),
    ("ClockAlignedDataInterval", "0"),
    ("MeterValueSampleInterval", "0"),
    ("MeterValuesAlignedData", "Current.Import"),
    ("MeterValuesSampledData", "Current.Offered"),
    ("ConnectionTimeOut", "5"),
    ("AuthorizationRequired", "true"),
];

const TRIGGERED_TIMEOUT: Duration = Duration::from_secs(8);

pub fn scenario() -> Scenario {
    Scenario {
        kind: ScenarioKind::RemoteTrigger,
        setup: |ctx| setup(ctx).boxed(),
        sub_tests: vec![
            SubTest::new("boot notification", |ctx| boot_notification(ctx).boxed()),
            SubTest::new("firmware status notification", |ctx| firmware_status(ctx).boxed()),
            SubTest::new("diagnostics status notification", |ctx| {
                diagnostics_status(ctx).boxed()
            }),
            SubTest::new("heartbeat, meter values and status notification", |ctx| {
                always_accepted(ctx).boxed()
            }),
        ],
    }
}

async fn setup(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    ensure_configuration(&ctx.session, SETUP).await
}

/// The action a trigger asks the device to send.
fn triggered_action(message: MessageTrigger) -> Action {
    match message {
        MessageTrigger::BootNotification => Action::BootNotification,
        MessageTrigger::DiagnosticsStatusNotification => Action::DiagnosticsStatusNotification,
        MessageTrigger::FirmwareStatusNotification => Action::FirmwareStatusNotification,
        MessageTrigger::Heartbeat => Action::Heartbeat,
        MessageTrigger::MeterValues => Action::MeterValues,
        MessageTrigger::StatusNotification => Action::StatusNotification,
    }
}

/// Triggers `message`, which must be accepted and then arrive.
async fn expect_triggered(session: &Session, message: MessageTrigger) -> anyhow::Result<()> {
    let action = triggered_action(message);
    clear_action(session, action);
    let status = trigger(session, message).await?;
    ensure!(
        status == TriggerMessageStatus::Accepted,
        "trigger for {message:?} answered {status:?}"
    );
    if !await_action(session, action, Some(TRIGGERED_TIMEOUT))
        .await
        .observed()
    {
        bail!("triggered {action:?} did not arrive within {TRIGGERED_TIMEOUT:?}");
    }
    Ok(())
}

async fn boot_notification(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = &ctx.session;
    await_status_change(session, CONNECTOR, &[ChargePointStatus::Unavailable], None).await;

    clear_action(session, Action::BootNotification);
    let status = trigger(session, MessageTrigger::BootNotification).await?;
    ensure!(
        status == TriggerMessageStatus::Rejected,
        "boot trigger while accepted answered {status:?}"
    );
    let unexpected = await_action(session, Action::BootNotification, Some(Duration::from_secs(6)))
        .await
        .observed();
    ensure!(!unexpected, "BootNotification sent after a rejected trigger");
    Ok(())
}

async fn firmware_status(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = &ctx.session;
    expect_triggered(session, MessageTrigger::FirmwareStatusNotification).await?;
    let status = session.with_state(|s| s.firmware_status);
    ensure!(
        status == Some(FirmwareStatus::Idle),
        "firmware status is {status:?}, expected Idle"
    );
    Ok(())
}

async fn diagnostics_status(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = &ctx.session;
    expect_triggered(session, MessageTrigger::DiagnosticsStatusNotification).await?;
    let status = session.with_state(|s| s.diagnostics_status);
    ensure!(
        status == Some(DiagnosticsStatus::Idle),
        "diagnostics status is {status:?}, expected Idle"
    );
    Ok(())
}

async fn always_accepted(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    for message in [
        MessageTrigger::Heartbeat,
        MessageTrigger::MeterValues,
        MessageTrigger::StatusNotification,
    ] {
        expect_triggered(&ctx.session, message).await?;
    }
    Ok(())
}
