use std::time::Duration;

use anyhow::ensure;
use chrono::{TimeDelta, Utc};
use futures_util::FutureExt;
use rocpp_core::v16::{
    messages::{cancel_reservation::CancelReservationRequest, reserve_now::ReserveNowRequest},
    types::{
        CancelReservationStatus, ChargePointStatus, ReservationStatus, RemoteStartStopStatus,
        ResetType,
    },
    Action,
};

use super::{
    common::{
        accept_all_tags, ensure_configuration, expect_authorize, expect_remote_start, reset,
        status_after, wait_for_status, CONNECTOR, OTHER_TAG, TEST_TAG,
    },
    Scenario, ScenarioContext, ScenarioKind, SubTest,
};
use crate::{
    session::{state::Reservation, Session},
    sync::{await_status_change, clear_action},
};

const SETUP: &[(&str, &str)] = &[
    ("LocalPreAuthorize", "false"),
    ("AuthorizeRemoteTxRequests", "true"),
    ("HeartbeatInterval", "0"),
    ("ClockAlignedDataInterval", "0"),
    ("MeterValueSampleInterval", "0"),
    ("ConnectionTimeOut", "5"),
    ("AuthorizationRequired", "true"),
];

const SETTLE: Duration = Duration::from_secs(3);

pub fn scenario() -> Scenario {
    Scenario {
        kind: ScenarioKind::Reservation,
        setup: |ctx| setup(ctx).boxed(),
        sub_tests: vec![
            SubTest::new("reserve and cancel", |ctx| reserve_and_cancel(ctx).boxed()),
            SubTest::new("reservation expiry", |ctx| reservation_expiry(ctx).boxed()),
            SubTest::new("remote start on reserved connector", |ctx| {
                remote_start_reserved(ctx).boxed()
            }),
            SubTest::new("reservation survives reset", |ctx| {
                reservation_survives_reset(ctx).boxed()
            }),
        ],
    }
}

async fn setup(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    ensure_configuration(&ctx.session, SETUP).await?;
    accept_all_tags(&ctx.session);
    Ok(())
}

/// Reserves the connector for [`TEST_TAG`] and records the reservation
/// locally once accepted.
async fn reserve(session: &Session, reservation_id: i32, ttl: TimeDelta) -> anyhow::Result<()> {
    let expiry = Utc::now() + ttl;
    let res = session
        .call(ReserveNowRequest {
            connector_id: CONNECTOR,
            expiry_date: expiry,
            id_tag: TEST_TAG.to_owned(),
            parent_id_tag: None,
            reservation_id,
        })
        .await?;
    ensure!(
        res.status == ReservationStatus::Accepted,
        "reservation {reservation_id} answered {:?}",
        res.status
    );
    session.with_state(|s| {
        s.reservation = Some(Reservation {
            id: reservation_id,
            connector_id: CONNECTOR,
            expiry,
            id_tag: TEST_TAG.to_owned(),
        })
    });
    Ok(())
}

async fn cancel(session: &Session, reservation_id: i32) -> anyhow::Result<()> {
    let res = session
        .call(CancelReservationRequest { reservation_id })
        .await?;
    ensure!(
        res.status == CancelReservationStatus::Accepted,
        "cancelling reservation {reservation_id} answered {:?}",
        res.status
    );
    session.with_state(|s| {
        if s.reservation.as_ref().is_some_and(|r| r.id == reservation_id) {
            s.reservation = None;
        }
    });
    Ok(())
}

async fn reserve_and_cancel(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = &ctx.session;
    wait_for_status(session, CONNECTOR, &[ChargePointStatus::Available]).await;
    reserve(session, 34, TimeDelta::days(1)).await?;
    status_after(session, SETTLE, &[ChargePointStatus::Reserved], "reservation").await?;
    cancel(session, 34).await?;
    status_after(session, SETTLE, &[ChargePointStatus::Available], "cancelled reservation").await
}

async fn reservation_expiry(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = &ctx.session;
    wait_for_status(session, CONNECTOR, &[ChargePointStatus::Available]).await;
    reserve(session, 35, TimeDelta::seconds(10)).await?;
    status_after(
        session,
        Duration::from_secs(13),
        &[ChargePointStatus::Available],
        "expired reservation",
    )
    .await?;
    session.with_state(|s| {
        if s.reservation.as_ref().is_some_and(|r| r.is_expired(Utc::now())) {
            s.reservation = None;
        }
    });
    Ok(())
}

/// A start for another tag must leave the reservation alone; the reserving
/// tag gets the connector.
async fn start_against_reservation(
    session: &Session,
    other_answer: RemoteStartStopStatus,
    authorizes: bool,
) -> anyhow::Result<()> {
    let pause = Duration::from_secs(2);
    tokio::time::sleep(pause).await;

    clear_action(session, Action::Authorize);
    expect_remote_start(session, OTHER_TAG, other_answer, "other tag on reserved connector").await?;
    if authorizes {
        expect_authorize(session, OTHER_TAG).await?;
    }
    status_after(session, pause, &[ChargePointStatus::Reserved], "start for other tag").await?;

    expect_remote_start(
        session,
        TEST_TAG,
        RemoteStartStopStatus::Accepted,
        "reserving tag",
    )
    .await?;
    status_after(session, pause, &[ChargePointStatus::Preparing], "start for reserving tag").await
}

async fn remote_start_reserved(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = &ctx.session;
    accept_all_tags(session);

    wait_for_status(session, CONNECTOR, &[ChargePointStatus::Available]).await;
    reserve(session, 34, TimeDelta::days(1)).await?;
    start_against_reservation(session, RemoteStartStopStatus::Accepted, true).await?;

    ensure_configuration(session, &[("AuthorizeRemoteTxRequests", "false")]).await?;
    wait_for_status(session, CONNECTOR, &[ChargePointStatus::Available]).await;
    reserve(session, 36, TimeDelta::days(1)).await?;
    start_against_reservation(session, RemoteStartStopStatus::Rejected, false).await
}

async fn reservation_survives_reset(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = &ctx.session;
    wait_for_status(session, CONNECTOR, &[ChargePointStatus::Available]).await;
    reserve(session, 37, TimeDelta::days(1)).await?;
    status_after(session, Duration::from_secs(2), &[ChargePointStatus::Reserved], "reservation").await?;

    session.force_connector_status(CONNECTOR, ChargePointStatus::Unavailable);
    reset(session, ResetType::Soft).await?;
    let status =
        await_status_change(session, CONNECTOR, &[ChargePointStatus::Unavailable], None).await;
    ensure!(
        status == ChargePointStatus::Reserved,
        "connector came back {status:?} after reset, expected Reserved"
    );
    cancel(session, 37).await
}
