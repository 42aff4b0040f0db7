//! Steps shared by several scenarios.

use std::time::Duration;

use anyhow::{bail, ensure, Context};
use chrono::{TimeDelta, Utc};
use rocpp_core::v16::{
    messages::{
        change_configuration::ChangeConfigurationRequest,
        clear_charging_profile::ClearChargingProfileRequest,
        get_configuration::{GetConfigurationRequest, GetConfigurationResponse},
        remote_start_transaction::RemoteStartTransactionRequest,
        remote_stop_transaction::RemoteStopTransactionRequest,
        reset::ResetRequest,
        trigger_message::TriggerMessageRequest,
    },
    types::{
        ChargePointStatus, ConfigurationStatus, MessageTrigger, RemoteStartStopStatus,
        ResetStatus, ResetType, TriggerMessageStatus,
    },
    Action,
};
use tokio::time::Instant;

use crate::{
    reconcile::reconcile,
    session::{auth, Session},
    sync::{await_action, await_status},
};

pub const TEST_TAG: &str = "test_tag";
pub const OTHER_TAG: &str = "Other_test_tag";

/// The physical connector under test.
pub const CONNECTOR: usize = 1;

pub const CHARGING: [ChargePointStatus; 2] =
    [ChargePointStatus::Charging, ChargePointStatus::SuspendedEV];
pub const TRANSACTING: [ChargePointStatus; 3] = [
    ChargePointStatus::Charging,
    ChargePointStatus::SuspendedEV,
    ChargePointStatus::SuspendedEVSE,
];

/// Bound on waits the device answers without human involvement.
pub const AUTHORIZE_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn ensure_configuration(session: &Session, desired: &[(&str, &str)]) -> anyhow::Result<()> {
    let report = reconcile(session, desired)
        .await
        .context("preparing configuration")?;
    log::debug!("{} configuration ready, {} changes", session.identity(), report.changed);
    Ok(())
}

/// Answers every Authorize with Accepted, valid for another day.
pub fn accept_all_tags(session: &Session) {
    session.set_override_keys(vec![(
        auth::WILDCARD_TAG.to_owned(),
        auth::accepted_until(Utc::now() + TimeDelta::days(1)),
    )]);
}

/// Waits, unbounded, for the connector to reach one of `acceptable`.
pub async fn wait_for_status(
    session: &Session,
    connector: usize,
    acceptable: &[ChargePointStatus],
) -> ChargePointStatus {
    let current = session.connector_status(connector);
    if !acceptable.contains(&current) {
        log::warn!(
            "{} waiting for connector {} status {:?} ({:?})",
            session.identity(),
            connector,
            acceptable,
            current
        );
    }
    await_status(session, connector, acceptable, None).await
}

/// [`await_status`] that fails unless one of `acceptable` is reached.
pub async fn expect_status(
    session: &Session,
    connector: usize,
    acceptable: &[ChargePointStatus],
    timeout: Duration,
    what: &str,
) -> anyhow::Result<ChargePointStatus> {
    let status = await_status(session, connector, acceptable, Some(timeout)).await;
    ensure!(
        acceptable.contains(&status),
        "{what}: connector {connector} is {status:?}, expected {acceptable:?} within {timeout:?}"
    );
    Ok(status)
}

/// Checks the connector status after a fixed settle time.
pub async fn status_after(
    session: &Session,
    delay: Duration,
    acceptable: &[ChargePointStatus],
    what: &str,
) -> anyhow::Result<()> {
    tokio::time::sleep(delay).await;
    let status = session.connector_status(CONNECTOR);
    ensure!(
        acceptable.contains(&status),
        "{what}: connector {CONNECTOR} is {status:?}, expected {acceptable:?}"
    );
    Ok(())
}

/// Waits for a BootNotification. Returns the time it took.
pub async fn expect_boot(session: &Session, timeout: Duration, what: &str) -> anyhow::Result<Duration> {
    let start = Instant::now();
    if !await_action(session, Action::BootNotification, Some(timeout))
        .await
        .observed()
    {
        bail!("{what}: no BootNotification within {timeout:?}");
    }
    Ok(start.elapsed())
}

/// Waits for an Authorize and checks the tag it carried.
pub async fn expect_authorize(session: &Session, tag: &str) -> anyhow::Result<()> {
    if !await_action(session, Action::Authorize, Some(AUTHORIZE_TIMEOUT))
        .await
        .observed()
    {
        bail!("no Authorize for {tag} within {AUTHORIZE_TIMEOUT:?}");
    }
    let seen = session.with_state(|s| s.auth.last_tag.clone());
    ensure!(
        seen.as_deref() == Some(tag),
        "Authorize carried {seen:?}, expected {tag}"
    );
    Ok(())
}

pub async fn reset(session: &Session, kind: ResetType) -> anyhow::Result<()> {
    let res = session.call(ResetRequest { kind }).await?;
    ensure!(
        res.status == ResetStatus::Accepted,
        "{kind:?} reset answered {:?}",
        res.status
    );
    Ok(())
}

pub async fn remote_start(session: &Session, id_tag: &str) -> anyhow::Result<RemoteStartStopStatus> {
    let res = session
        .call(RemoteStartTransactionRequest {
            connector_id: None,
            id_tag: id_tag.to_owned(),
            charging_profile: None,
        })
        .await?;
    Ok(res.status)
}

pub async fn expect_remote_start(
    session: &Session,
    id_tag: &str,
    expected: RemoteStartStopStatus,
    what: &str,
) -> anyhow::Result<()> {
    let status = remote_start(session, id_tag).await?;
    ensure!(
        status == expected,
        "{what}: remote start for {id_tag} answered {status:?}, expected {expected:?}"
    );
    Ok(())
}

/// Stops the transaction last started by the device.
pub async fn remote_stop(session: &Session) -> anyhow::Result<()> {
    let Some(transaction_id) = session.transaction().id else {
        bail!("no transaction to stop");
    };
    let res = session
        .call(RemoteStopTransactionRequest { transaction_id })
        .await?;
    ensure!(
        res.status == RemoteStartStopStatus::Accepted,
        "remote stop of {transaction_id} answered {:?}",
        res.status
    );
    Ok(())
}

pub async fn get_configuration(
    session: &Session,
    keys: Option<&[&str]>,
) -> anyhow::Result<GetConfigurationResponse> {
    let key = keys.map(|keys| keys.iter().map(|k| (*k).to_owned()).collect());
    Ok(session.call(GetConfigurationRequest { key }).await?)
}

pub async fn change_configuration(
    session: &Session,
    key: &str,
    value: &str,
) -> anyhow::Result<ConfigurationStatus> {
    let res = session
        .call(ChangeConfigurationRequest {
            key: key.to_owned(),
            value: value.to_owned(),
        })
        .await?;
    Ok(res.status)
}

pub async fn expect_change(
    session: &Session,
    key: &str,
    value: &str,
    expected: ConfigurationStatus,
) -> anyhow::Result<()> {
    let status = change_configuration(session, key, value).await?;
    ensure!(
        status == expected,
        "setting {key} to {value} answered {status:?}, expected {expected:?}"
    );
    Ok(())
}

pub async fn trigger(
    session: &Session,
    requested_message: MessageTrigger,
) -> anyhow::Result<TriggerMessageStatus> {
    let res = session
        .call(TriggerMessageRequest {
            requested_message,
            connector_id: None,
        })
        .await?;
    Ok(res.status)
}

/// Removes every charging profile on the device and in the local model.
pub async fn clear_charging_profiles(session: &Session) -> anyhow::Result<()> {
    let req = ClearChargingProfileRequest {
        id: None,
        connector_id: None,
        charging_profile_purpose: None,
        stack_level: None,
    };
    let res = session
        .call(req.clone())
        .await
        .context("clearing charging profiles")?;
    log::info!("{} cleared charging profiles: {:?}", session.identity(), res.status);
    session.with_state(|s| s.charging.clear(&req));
    Ok(())
}
