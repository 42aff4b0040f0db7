use std::time::Duration;

use anyhow::{anyhow, bail, ensure, Context};
use chrono::{TimeDelta, Utc};
use futures_util::FutureExt;
use rocpp_core::v16::{
    messages::{
        change_availability::ChangeAvailabilityRequest, unlock_connector::UnlockConnectorRequest,
    },
    types::{
        AuthorizationStatus, AvailabilityStatus, AvailabilityType, ChargePointStatus,
        ConfigurationStatus, MessageTrigger, RegistrationStatus, RemoteStartStopStatus,
        ResetType, TriggerMessageStatus, UnlockStatus,
    },
    Action,
};
use tokio::time::Instant;

use super::{
    common::{
        accept_all_tags, change_configuration, ensure_configuration, expect_authorize,
        expect_boot, expect_change, expect_remote_start, expect_status, get_configuration,
        remote_stop, reset, status_after, trigger, wait_for_status, CHARGING, CONNECTOR,
        TEST_TAG, TRANSACTING,
    },
    meter_values, Scenario, ScenarioContext, ScenarioKind, SubTest,
};
use crate::{
    fault::Fault,
    reconcile::reconcile,
    session::{auth, state::BootParameters, Session},
    sync::{await_action, await_status_change, clear_action, hold_status},
};

const SETUP: &[(&str, &str)] = &[
    ("LocalPreAuthorize", "false"),
    ("AuthorizeRemoteTxRequests", "true"),
    ("HeartbeatInterval", "0"),
    ("AuthorizationRequired", "true"),
    ("ConnectionTimeOut", "7"),
    ("ClockAlignedDataInterval", "0"),
    ("MinimumStatusDuration", "0"),
];

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(7);
const LONG_CONNECTION_TIMEOUT: Duration = Duration::from_secs(20);
/// How long a refused start must leave the connector alone.
const REFUSED_HOLD: Duration = Duration::from_secs(5);
const RESET_BOOT_TIMEOUT: Duration = Duration::from_secs(45);

pub fn scenario() -> Scenario {
    Scenario {
        kind: ScenarioKind::Core,
        setup: |ctx| setup(ctx).boxed(),
        sub_tests: vec![
            SubTest::manual("presented id tag", |ctx| presented_id_tag(ctx).boxed()),
            SubTest::new("remote start", |ctx| remote_start(ctx).boxed()),
            SubTest::new("meter values", |ctx| meter_values::run(ctx).boxed()),
            SubTest::new("boot notification and non-accepted state", |ctx| {
                boot_notification(ctx).boxed()
            }),
            SubTest::new("get and set configuration", |ctx| {
                get_and_set_configuration(ctx).boxed()
            }),
            SubTest::new("change availability", |ctx| change_availability(ctx).boxed()),
            SubTest::with_faults("faulted state", |ctx| faulted_state(ctx).boxed()),
            SubTest::manual("unlock connector", |ctx| unlock_connector(ctx).boxed()),
        ],
    }
}

async fn setup(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    ensure_configuration(&ctx.session, SETUP).await
}

async fn presented_id_tag(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = &ctx.session;
    wait_for_status(session, CONNECTOR, &[ChargePointStatus::Available]).await;
    accept_all_tags(session);

    clear_action(session, Action::Authorize);
    log::warn!("present an RFID tag to the charge point");
    await_action(session, Action::Authorize, None).await;
    let tag = session
        .with_state(|s| s.auth.last_tag.clone())
        .unwrap_or_default();

    let operator = &ctx.operator;
    ensure!(
        operator
            .confirm(&format!("does \"{tag}\" match presented id?"))
            .await,
        "Authorize carried {tag}, which the operator did not recognise"
    );
    ensure!(
        operator
            .confirm("Did the CP indicate accepted via LED and sound?")
            .await,
        "charge point did not signal acceptance"
    );

    log::warn!("present the RFID tag again and set the car in charging state");
    wait_for_status(session, CONNECTOR, &[ChargePointStatus::Charging]).await;
    log::warn!("present the same RFID tag again to stop the transaction");
    wait_for_status(session, CONNECTOR, &[ChargePointStatus::Finishing]).await;

    ensure!(
        operator
            .confirm("Did the CP react to presented tag as expected?")
            .await,
        "unexpected behaviour when stopping with the presented tag"
    );
    Ok(())
}

/// Accepted remote start that is never followed up; the device must give up
/// only after its connection timeout.
async fn start_without_car(session: &Session, timeout: Duration, give_up_within: Duration) -> anyhow::Result<()> {
    accept_all_tags(session);
    clear_action(session, Action::Authorize);
    let start = Instant::now();
    expect_remote_start(session, TEST_TAG, RemoteStartStopStatus::Accepted, "idle connector").await?;
    expect_authorize(session, TEST_TAG).await?;
    expect_status(
        session,
        CONNECTOR,
        &[ChargePointStatus::Preparing],
        Duration::from_secs(10),
        "accepted remote start",
    )
    .await?;
    expect_status(
        session,
        CONNECTOR,
        &[ChargePointStatus::Available],
        give_up_within,
        "connection timeout",
    )
    .await?;
    let waited = start.elapsed();
    ensure!(
        waited >= timeout,
        "connector returned to Available after {waited:?}, before the {timeout:?} connection timeout"
    );
    Ok(())
}

/// Start, stop and check that Finishing holds.
async fn start_and_stop(session: &Session, from: &str) -> anyhow::Result<()> {
    accept_all_tags(session);
    expect_remote_start(session, TEST_TAG, RemoteStartStopStatus::Accepted, from).await?;
    expect_status(
        session,
        CONNECTOR,
        &TRANSACTING,
        Duration::from_secs(16),
        "remote start with car connected",
    )
    .await?;
    remote_stop(session).await?;
    expect_status(
        session,
        CONNECTOR,
        &[ChargePointStatus::Finishing],
        Duration::from_secs(16),
        "remote stop",
    )
    .await?;
    log::warn!("waiting to see if Finishing remains");
    hold_status(
        session,
        CONNECTOR,
        ChargePointStatus::Finishing,
        Duration::from_secs(5),
    )
    .await
    .map_err(|s| anyhow!("Finishing did not hold, connector moved to {s:?}"))
}

async fn remote_start(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = &ctx.session;
    wait_for_status(session, CONNECTOR, &[ChargePointStatus::Available]).await;
    start_without_car(session, CONNECTION_TIMEOUT, Duration::from_secs(16)).await?;

    let now = Utc::now();
    let refusals = [
        ("ConcurrentTx", auth::with_status(AuthorizationStatus::ConcurrentTx)),
        ("Blocked", auth::with_status(AuthorizationStatus::Blocked)),
        ("Invalid", auth::with_status(AuthorizationStatus::Invalid)),
        ("Expired", auth::with_status(AuthorizationStatus::Expired)),
        (
            "Accepted but expired",
            auth::accepted_until(now - TimeDelta::days(1)),
        ),
    ];
    for (label, info) in refusals {
        session.set_override_keys(vec![(auth::WILDCARD_TAG.to_owned(), info)]);
        clear_action(session, Action::Authorize);
        expect_remote_start(session, TEST_TAG, RemoteStartStopStatus::Accepted, label).await?;
        expect_authorize(session, TEST_TAG).await?;
        expect_status(
            session,
            CONNECTOR,
            &[ChargePointStatus::Available],
            Duration::from_secs(10),
            label,
        )
        .await?;
        hold_status(session, CONNECTOR, ChargePointStatus::Available, REFUSED_HOLD)
            .await
            .map_err(|s| anyhow!("{label} authorization moved the connector to {s:?}"))?;
    }

    ensure_configuration(session, &[("ConnectionTimeOut", "20")]).await?;
    start_without_car(session, LONG_CONNECTION_TIMEOUT, Duration::from_secs(25)).await?;

    log::warn!("connect the car to test remote start during Preparing");
    wait_for_status(session, CONNECTOR, &[ChargePointStatus::Preparing]).await;
    start_and_stop(session, "Preparing").await?;
    start_and_stop(session, "Finishing").await
}

async fn boot_notification(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = &ctx.session;

    session.stage_boot(BootParameters::new(RegistrationStatus::Accepted, 15));
    session.force_connector_status(CONNECTOR, ChargePointStatus::Unavailable);
    clear_action(session, Action::BootNotification);
    reset(session, ResetType::Soft).await?;
    expect_boot(session, RESET_BOOT_TIMEOUT, "soft reset").await?;

    let status = trigger(session, MessageTrigger::BootNotification).await?;
    ensure!(
        status == TriggerMessageStatus::Rejected,
        "boot trigger while accepted answered {status:?}"
    );
    let status = await_status_change(
        session,
        CONNECTOR,
        &[ChargePointStatus::Unavailable],
        Some(Duration::from_secs(15)),
    )
    .await;
    ensure!(
        status != ChargePointStatus::Unavailable,
        "boot accepted but connector stayed Unavailable"
    );

    session.stage_boot(BootParameters::new(RegistrationStatus::Pending, 30));
    session.force_connector_status(CONNECTOR, ChargePointStatus::Unavailable);
    clear_action(session, Action::BootNotification);
    reset(session, ResetType::Soft).await?;
    expect_boot(session, Duration::from_secs(20), "soft reset into Pending").await?;

    ensure_configuration(session, &[("HeartbeatInterval", "30")])
        .await
        .context("configuring while pending")?;
    clear_action(session, Action::BootNotification);
    let waited = expect_boot(session, Duration::from_secs(32), "pending retry").await?;
    ensure!(
        waited >= Duration::from_secs(25),
        "boot retried after {waited:?}, before the 30 s interval"
    );

    session.stage_boot(BootParameters::new(RegistrationStatus::Rejected, 0));
    clear_action(session, Action::BootNotification);
    let status = trigger(session, MessageTrigger::BootNotification).await?;
    ensure!(
        status == TriggerMessageStatus::Accepted,
        "boot trigger while pending answered {status:?}"
    );
    expect_boot(session, Duration::from_secs(8), "boot trigger").await?;

    log::warn!("waiting for message timeout and default retry interval, expect a long delay");
    if let Ok(report) = reconcile(session, &[("HeartbeatInterval", "30")]).await {
        bail!("configuration accepted while rejected ({} changes)", report.changed);
    }

    session.stage_boot(BootParameters::new(RegistrationStatus::Accepted, 0));
    clear_action(session, Action::BootNotification);
    expect_boot(session, Duration::from_secs(300), "retry after rejection").await?;
    session.reset_boot();
    Ok(())
}

async fn hard_reset_and_boot(session: &Session) -> anyhow::Result<()> {
    session.stage_boot(BootParameters::new(RegistrationStatus::Accepted, 0));
    session.force_connector_status(CONNECTOR, ChargePointStatus::Unavailable);
    clear_action(session, Action::BootNotification);
    reset(session, ResetType::Hard).await?;
    expect_boot(session, RESET_BOOT_TIMEOUT, "hard reset").await?;
    Ok(())
}

async fn get_and_set_configuration(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = &ctx.session;

    let all = get_configuration(session, None).await?;
    let keys = all.configuration_key.unwrap_or_default();
    ensure!(
        (40..=60).contains(&keys.len()),
        "unexpected number of configuration keys: {}",
        keys.len()
    );
    ensure!(
        all.unknown_key.is_none_or(|u| u.is_empty()),
        "unknown keys reported when requesting all keys"
    );
    let timeouts = keys.iter().filter(|kv| kv.key == "ConnectionTimeOut").count();
    ensure!(timeouts == 1, "expected one ConnectionTimeOut entry, got {timeouts}");

    expect_change(session, "ConnectionTimeOut", "6", ConfigurationStatus::Accepted).await?;
    let some = get_configuration(session, Some(&["ConnectionTimeOut", "nonexistentkey"])).await?;
    let known = some.configuration_key.unwrap_or_default();
    let unknown = some.unknown_key.unwrap_or_default();
    ensure!(
        known.len() == 1 && unknown.len() == 1,
        "expected one known and one unknown key, got {known:?} and {unknown:?}"
    );
    ensure!(
        known[0].value.as_deref() == Some("6"),
        "ConnectionTimeOut reads {:?} after setting 6",
        known[0].value
    );
    expect_change(session, "nonexistentkey", "3", ConfigurationStatus::NotSupported).await?;

    let before = get_configuration(session, None).await?;
    hard_reset_and_boot(session).await?;
    let after = get_configuration(session, None).await?;
    ensure!(after == before, "configuration did not persist a hard reset");

    let after_keys = after.configuration_key.unwrap_or_default();
    let old = after_keys
        .iter()
        .find(|kv| kv.key == "AuthorizationRequired")
        .and_then(|kv| kv.value.as_deref())
        .map(str::to_ascii_lowercase)
        .context("AuthorizationRequired missing")?;
    let new = match old.as_str() {
        "true" => "false",
        "false" => "true",
        other => bail!("AuthorizationRequired {other} is not a bool"),
    };
    expect_change(session, "AuthorizationRequired", new, ConfigurationStatus::Accepted).await?;
    hard_reset_and_boot(session).await?;

    let updated = get_configuration(session, None)
        .await?
        .configuration_key
        .unwrap_or_default();
    ensure!(
        updated.len() == after_keys.len(),
        "key count changed from {} to {} after reset",
        after_keys.len(),
        updated.len()
    );
    let mut persisted = false;
    for (now, then) in updated.iter().zip(&after_keys) {
        if now == then {
            continue;
        }
        if now.key == "AuthorizationRequired" && now.value.as_deref() == Some(new) {
            persisted = true;
        } else {
            bail!("configuration mismatch after reset: {now:?} was {then:?}");
        }
    }
    ensure!(persisted, "AuthorizationRequired did not persist a hard reset");

    let status = change_configuration(session, "AuthorizationRequired", &old).await?;
    ensure!(
        status == ConfigurationStatus::Accepted,
        "restoring AuthorizationRequired answered {status:?}"
    );
    session.reset_boot();
    Ok(())
}

async fn change_availability(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = &ctx.session;
    accept_all_tags(session);

    for (kind, settled, start) in [
        (
            AvailabilityType::Inoperative,
            ChargePointStatus::Unavailable,
            RemoteStartStopStatus::Rejected,
        ),
        (
            AvailabilityType::Operative,
            ChargePointStatus::Available,
            RemoteStartStopStatus::Accepted,
        ),
    ] {
        let res = session
            .call(ChangeAvailabilityRequest {
                connector_id: CONNECTOR,
                kind,
            })
            .await?;
        ensure!(
            res.status == AvailabilityStatus::Accepted,
            "changing availability to {kind:?} answered {:?}",
            res.status
        );
        status_after(session, Duration::from_secs(3), &[settled], "availability change").await?;
        expect_remote_start(session, TEST_TAG, start, "after availability change").await?;
    }

    expect_status(
        session,
        CONNECTOR,
        &[ChargePointStatus::Preparing],
        Duration::from_secs(16),
        "remote start when operative",
    )
    .await?;
    expect_status(
        session,
        CONNECTOR,
        &[ChargePointStatus::Available],
        Duration::from_secs(30),
        "connection timeout",
    )
    .await?;
    Ok(())
}

async fn observe_fault(session: &Session) -> anyhow::Result<()> {
    expect_status(
        session,
        CONNECTOR,
        &[ChargePointStatus::Faulted],
        Duration::from_secs(60),
        "meter fault",
    )
    .await?;
    // connector 0 may be reported just after connector 1
    tokio::time::sleep(Duration::from_secs(1)).await;
    let overall = session.connector_status(0);
    ensure!(
        overall == ChargePointStatus::Faulted,
        "connector 0 is {overall:?}, expected Faulted"
    );
    Ok(())
}

async fn faulted_state(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let faults = ctx.faults.clone().context("no fault injector")?;
    ensure!(
        faults.inject(Fault::MeterNoResponse).await,
        "fault injector did not acknowledge the meter fault"
    );
    let observed = observe_fault(&ctx.session).await;
    if !faults.clear(Fault::MeterNoResponse).await {
        log::error!("fault injector did not acknowledge clearing the meter fault");
    }
    observed
}

async fn unlock(session: &Session, state: &str) -> anyhow::Result<()> {
    let res = session
        .call(UnlockConnectorRequest {
            connector_id: CONNECTOR,
        })
        .await?;
    ensure!(
        res.status == UnlockStatus::Unlocked,
        "unlock during {state} answered {:?}",
        res.status
    );
    Ok(())
}

async fn unlock_connector(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = &ctx.session;
    let operator = &ctx.operator;

    log::warn!("connect the cable");
    wait_for_status(session, CONNECTOR, &[ChargePointStatus::Preparing]).await;
    ensure!(
        operator.confirm("Is the connector sufficiently locked?").await,
        "operator reports the connector is not locked"
    );
    unlock(session, "Preparing").await?;
    ensure!(
        operator.confirm("did the connector unlock?").await,
        "operator reports the connector did not unlock in Preparing"
    );

    ensure_configuration(session, &[("AuthorizationRequired", "false")]).await?;
    wait_for_status(session, CONNECTOR, &CHARGING).await;
    unlock(session, "Charging").await?;
    let unlocked = operator.confirm("did the connector unlock?").await;
    status_after(
        session,
        Duration::from_secs(3),
        &[ChargePointStatus::Finishing, ChargePointStatus::Preparing],
        "unlock while charging",
    )
    .await?;
    ensure!(unlocked, "operator reports the connector did not unlock while charging");
    Ok(())
}
