use std::time::Duration;

use anyhow::{bail, ensure, Context};
use futures_util::FutureExt;
use rocpp_core::v16::{
    messages::{
        get_local_list_version::GetLocalListVersionRequest, send_local_list::SendLocalListRequest,
    },
    types::{
        AuthorizationData, AuthorizationStatus, ChargePointStatus, RemoteStartStopStatus,
        UpdateStatus, UpdateType,
    },
    Action,
};

use super::{
    common::{
        ensure_configuration, expect_remote_start, expect_status, remote_stop, status_after,
        wait_for_status, AUTHORIZE_TIMEOUT, CHARGING, CONNECTOR,
    },
    Scenario, ScenarioContext, ScenarioKind, SubTest,
};
use crate::{
    session::{auth, local_list::LocalList, Session},
    sync::{await_action, await_status_change, clear_action},
};

const SETUP: &[(&str, &str)] = &[
    ("LocalPreAuthorize", "true"),
    ("LocalAuthListEnabled", "true"),
    ("AuthorizationCacheEnabled", "false"),
    ("AuthorizeRemoteTxRequests", "true"),
    ("HeartbeatInterval", "0"),
    ("ClockAlignedDataInterval", "0"),
    ("MeterValueSampleInterval", "0"),
    ("ConnectionTimeOut", "5"),
    ("AuthorizationRequired", "true"),
];

const IDLE: [ChargePointStatus; 2] = [ChargePointStatus::Preparing, ChargePointStatus::Finishing];
/// Bound on the Authorize that follows a start with a tag the list cannot
/// vouch for.
const REMOTE_AUTHORIZE_TIMEOUT: Duration = Duration::from_secs(10);

pub fn scenario() -> Scenario {
    Scenario {
        kind: ScenarioKind::LocalList,
        setup: |ctx| setup(ctx).boxed(),
        sub_tests: vec![
            SubTest::new("send local list full", |ctx| full_update(ctx).boxed()),
            SubTest::new("send local list differential", |ctx| {
                differential_update(ctx).boxed()
            }),
            SubTest::new("clear local list", |ctx| clear_list(ctx).boxed()),
        ],
    }
}

async fn setup(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    ensure_configuration(&ctx.session, SETUP).await?;
    // Authorize is answered from the same keys the device holds locally.
    ctx.session.clear_override_keys();
    Ok(())
}

/// Sends a list update and mirrors it once the device accepts. A device
/// answer that differs from the local model is logged.
async fn send_local_list(
    session: &Session,
    list_version: i32,
    update_type: UpdateType,
    list: Option<Vec<AuthorizationData>>,
) -> anyhow::Result<UpdateStatus> {
    let apply = |mirror: &mut LocalList| match update_type {
        UpdateType::Full => mirror.apply_full(list_version, list.as_deref()),
        UpdateType::Differential => {
            mirror.apply_differential(list_version, list.as_deref().unwrap_or_default())
        }
    };
    let predicted = session.with_state(|s| apply(&mut s.local_list.clone()));
    let res = session
        .call(SendLocalListRequest {
            list_version,
            local_authorization_list: list.clone(),
            update_type,
        })
        .await
        .with_context(|| format!("{update_type:?} local list version {list_version}"))?;
    if res.status == UpdateStatus::Accepted {
        session.with_state(|s| apply(&mut s.local_list));
    }
    if res.status != predicted {
        log::warn!(
            "{} answered {:?} to {:?} list version {}, expected {:?}",
            session.identity(),
            res.status,
            update_type,
            list_version,
            predicted
        );
    }
    Ok(res.status)
}

async fn expect_update(
    session: &Session,
    list_version: i32,
    update_type: UpdateType,
    list: Option<Vec<AuthorizationData>>,
    expected: UpdateStatus,
) -> anyhow::Result<()> {
    let status = send_local_list(session, list_version, update_type, list).await?;
    ensure!(
        status == expected,
        "{update_type:?} local list version {list_version} answered {status:?}, expected {expected:?}"
    );
    Ok(())
}

async fn list_version(session: &Session) -> anyhow::Result<i32> {
    Ok(session.call(GetLocalListVersionRequest {}).await?.list_version)
}

fn removal(id_tag: &str) -> AuthorizationData {
    AuthorizationData {
        id_tag: id_tag.to_owned(),
        id_tag_info: None,
    }
}

/// Remote start the local list should authorize on its own: the connector
/// must start charging without an Authorize.
async fn start_locally_authorized(session: &Session, id_tag: &str, from: &[ChargePointStatus]) -> anyhow::Result<()> {
    clear_action(session, Action::Authorize);
    expect_remote_start(session, id_tag, RemoteStartStopStatus::Accepted, "locally listed tag").await?;
    let status = await_status_change(session, CONNECTOR, from, Some(AUTHORIZE_TIMEOUT)).await;
    ensure!(
        !session.signal(Action::Authorize).is_set(),
        "unexpected Authorize for {id_tag}, the local list should have been sufficient"
    );
    ensure!(
        CHARGING.contains(&status),
        "locally authorized transaction went to {status:?} instead of charging"
    );
    Ok(())
}

/// Remote start that needs the central system: an Authorize must follow.
async fn start_remotely_authorized(session: &Session, id_tag: &str) -> anyhow::Result<()> {
    clear_action(session, Action::Authorize);
    expect_remote_start(session, id_tag, RemoteStartStopStatus::Accepted, "unlisted tag").await?;
    if !await_action(session, Action::Authorize, Some(REMOTE_AUTHORIZE_TIMEOUT))
        .await
        .observed()
    {
        bail!("no Authorize for {id_tag} within {REMOTE_AUTHORIZE_TIMEOUT:?}");
    }
    Ok(())
}

async fn full_update(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = &ctx.session;
    let keys = auth::default_keys();
    expect_update(session, 1, UpdateType::Full, Some(keys.clone()), UpdateStatus::Accepted).await?;

    log::warn!("connect the car");
    wait_for_status(session, CONNECTOR, &[ChargePointStatus::Preparing]).await;
    start_locally_authorized(session, &keys[0].id_tag, &[ChargePointStatus::Preparing]).await?;
    remote_stop(session).await?;
    expect_status(session, CONNECTOR, &IDLE, Duration::from_secs(30), "remote stop").await?;

    let invalid = keys
        .iter()
        .find(|k| {
            k.id_tag_info
                .as_ref()
                .is_some_and(|i| i.status == AuthorizationStatus::Invalid)
        })
        .context("no invalid tag in the key list")?;
    start_remotely_authorized(session, &invalid.id_tag).await?;
    status_after(session, Duration::from_secs(2), &IDLE, "start with invalid tag").await
}

async fn differential_update(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = &ctx.session;
    let keys = auth::default_keys();
    let first = &keys[0];
    let version = list_version(session).await?;
    log::info!("active local list version: {version}");

    let delete_first = Some(vec![removal(&first.id_tag)]);
    expect_update(
        session,
        version,
        UpdateType::Differential,
        delete_first.clone(),
        UpdateStatus::VersionMismatch,
    )
    .await?;
    expect_update(
        session,
        version + 1,
        UpdateType::Differential,
        delete_first.clone(),
        UpdateStatus::Accepted,
    )
    .await?;

    start_remotely_authorized(session, &first.id_tag).await?;
    wait_for_status(session, CONNECTOR, &CHARGING).await;
    remote_stop(session).await?;

    expect_update(
        session,
        version + 2,
        UpdateType::Differential,
        Some(vec![first.clone()]),
        UpdateStatus::Accepted,
    )
    .await?;
    let reported = list_version(session).await?;
    ensure!(
        reported == version + 2,
        "list version after differential update is {reported}, expected {}",
        version + 2
    );
    expect_update(session, 0, UpdateType::Differential, delete_first, UpdateStatus::Failed).await?;

    wait_for_status(session, CONNECTOR, &IDLE).await;
    start_locally_authorized(session, &first.id_tag, &IDLE).await?;
    remote_stop(session).await
}

async fn clear_list(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = &ctx.session;
    expect_update(session, 1, UpdateType::Full, None, UpdateStatus::Accepted).await?;
    let version = list_version(session).await?;
    ensure!(version == 0, "list version is {version} after clearing the list");
    Ok(())
}
