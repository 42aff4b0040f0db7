use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use anyhow::{ensure, Context};
use chrono::Utc;
use futures_util::FutureExt;
use rocpp_core::v16::{
    messages::{
        meter_values::MeterValuesRequest, set_charging_profile::SetChargingProfileRequest,
        unlock_connector::UnlockConnectorRequest,
    },
    types::{
        ChargePointStatus, ChargingProfile, ChargingProfileKindType, ChargingProfilePurposeType,
        ChargingProfileStatus, ChargingRateUnitType, ChargingSchedule, ChargingSchedulePeriod,
        Measurand, UnlockStatus,
    },
    Action,
};

use super::{
    common::{
        clear_charging_profiles, ensure_configuration, expect_status, status_after,
        wait_for_status, CHARGING, CONNECTOR, TRANSACTING,
    },
    Scenario, ScenarioContext, ScenarioKind, SubTest,
};
use crate::{
    session::{charging, hooks::InboundHooks, Session},
    sync::{await_action_until, await_status_change},
    transport::CallError,
};

const SETUP: &[(&str, &str)] = &[
    ("LocalPreAuthorize", "false"),
    ("AuthorizeRemoteTxRequests", "true"),
    ("HeartbeatInterval", "0"),
    ("ClockAlignedDataInterval", "0"),
    ("MeterValueSampleInterval", "10"),
    ("MeterValuesSampledData", "Current.Offered,Current.Import"),
    ("AuthorizationRequired", "false"),
];

const OFFERED_TIMEOUT: Duration = Duration::from_secs(60);

pub fn scenario() -> Scenario {
    Scenario {
        kind: ScenarioKind::SmartCharging,
        setup: |ctx| setup(ctx).boxed(),
        sub_tests: vec![
            SubTest::new("tx profile outside transaction", |ctx| {
                outside_transaction(ctx).boxed()
            }),
            SubTest::new("tx profile within transaction", |ctx| {
                within_transaction(ctx).boxed()
            }),
            SubTest::new("tx profile applied 16 A to 0 A", |ctx| sixteen_to_zero(ctx).boxed()),
            SubTest::new("tx profile at current limits", |ctx| current_limits(ctx).boxed()),
            SubTest::manual("tx profile overcurrent", |ctx| overcurrent(ctx).boxed()),
        ],
    }
}

async fn setup(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    ensure_configuration(&ctx.session, SETUP).await?;
    clear_charging_profiles(&ctx.session).await
}

/// Absolute TxProfile starting now with the given periods, in amps.
pub(super) fn tx_profile(
    charging_profile_id: i32,
    transaction_id: Option<i32>,
    periods: Vec<ChargingSchedulePeriod>,
) -> ChargingProfile {
    ChargingProfile {
        charging_profile_id,
        transaction_id,
        stack_level: 0,
        charging_profile_purpose: ChargingProfilePurposeType::TxProfile,
        charging_profile_kind: ChargingProfileKindType::Absolute,
        recurrency_kind: None,
        valid_from: None,
        valid_to: None,
        charging_schedule: ChargingSchedule {
            duration: None,
            start_schedule: Some(Utc::now()),
            charging_rate_unit: ChargingRateUnitType::A,
            charging_schedule_period: periods,
            min_charging_rate: None,
        },
    }
}

fn single_limit(charging_profile_id: i32, transaction_id: Option<i32>, limit: f32) -> ChargingProfile {
    tx_profile(
        charging_profile_id,
        transaction_id,
        vec![ChargingSchedulePeriod {
            start_period: 0,
            limit,
            number_phases: Some(3),
        }],
    )
}

/// Sends `profile` for the connector under test. Accepted profiles are
/// mirrored in the session.
pub(super) async fn set_profile(
    session: &Session,
    profile: ChargingProfile,
) -> Result<ChargingProfileStatus, CallError> {
    let connector_id = CONNECTOR as i32;
    let predicted = session.with_state(|s| {
        let tx = s.active_transaction_id();
        s.charging.clone().install(connector_id, profile.clone(), tx)
    });
    let res = session
        .call(SetChargingProfileRequest {
            connector_id,
            cs_charging_profiles: profile.clone(),
        })
        .await?;
    if res.status == ChargingProfileStatus::Accepted {
        session.with_state(|s| {
            let tx = s.active_transaction_id();
            s.charging.install(connector_id, profile, tx)
        });
    }
    if res.status != predicted {
        log::warn!(
            "{} answered {:?} to charging profile, expected {:?}",
            session.identity(),
            res.status,
            predicted
        );
    }
    Ok(res.status)
}

fn active_transaction(session: &Session) -> anyhow::Result<i32> {
    session
        .with_state(|s| s.active_transaction_id())
        .context("no active transaction")
}

/// Watches for a Current.Offered sample equal to the armed value.
#[derive(Debug, Default)]
struct OfferedWatch {
    state: Mutex<(Option<i32>, bool)>,
}

impl OfferedWatch {
    fn arm(&self, expected: i32) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = (Some(expected), false);
    }

    fn matched(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).1
    }
}

impl InboundHooks for OfferedWatch {
    fn on_meter_values(&self, req: &MeterValuesRequest) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(expected) = state.0 else {
            return;
        };
        let offered = req
            .meter_value
            .iter()
            .flat_map(|mv| mv.sampled_value.iter())
            .filter(|s| s.measurand == Some(Measurand::CurrentOffered))
            .filter_map(|s| s.value.parse::<f32>().ok());
        for value in offered {
            if value as i32 == expected {
                log::info!("got awaited offered current {expected} A");
                state.1 = true;
            } else {
                log::info!("expected {expected} A offered, got {value}");
            }
        }
    }
}

/// Applies a single-period limit and waits for the device to offer the
/// matching current.
async fn apply_limit(ctx: &mut ScenarioContext, watch: &OfferedWatch, limit: f32) -> anyhow::Result<()> {
    let session = ctx.session.clone();
    let tx = active_transaction(&session)?;
    let status = set_profile(&session, single_limit(ctx.next_profile_id(), Some(tx), limit)).await?;
    ensure!(
        status == ChargingProfileStatus::Accepted,
        "charging profile with limit {limit} A answered {status:?}"
    );

    let expected = charging::expected_offered_current(limit) as i32;
    watch.arm(expected);
    let seen = await_action_until(&session, Action::MeterValues, OFFERED_TIMEOUT, || {
        watch.matched()
    })
    .await;
    ensure!(
        seen.observed(),
        "no offered current of {expected} A within {OFFERED_TIMEOUT:?} after setting {limit} A"
    );
    if charging::suspends_charging(limit) {
        expect_status(
            &session,
            CONNECTOR,
            &[ChargePointStatus::SuspendedEVSE],
            Duration::from_secs(10),
            "limit below the minimum",
        )
        .await?;
    }
    Ok(())
}

async fn outside_transaction(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = ctx.session.clone();
    wait_for_status(&session, CONNECTOR, &[ChargePointStatus::Available]).await;
    let upcoming = session.with_state(|s| s.next_transaction_id);
    let status = set_profile(&session, single_limit(ctx.next_profile_id(), Some(upcoming), 16.0)).await?;
    ensure!(
        status == ChargingProfileStatus::Rejected,
        "TxProfile without a transaction answered {status:?}"
    );
    Ok(())
}

async fn within_transaction(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = ctx.session.clone();
    wait_for_status(&session, CONNECTOR, &CHARGING).await;
    let tx = active_transaction(&session)?;
    let status = set_profile(&session, single_limit(ctx.next_profile_id(), Some(tx), 16.0)).await?;
    ensure!(
        status == ChargingProfileStatus::Accepted,
        "TxProfile during transaction {tx} answered {status:?}"
    );
    Ok(())
}

async fn sixteen_to_zero(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = ctx.session.clone();
    wait_for_status(&session, CONNECTOR, &CHARGING).await;
    let watch = Arc::new(OfferedWatch::default());
    let _guard = session.install_hooks(watch.clone());
    apply_limit(ctx, &watch, 16.0).await?;
    apply_limit(ctx, &watch, 0.0).await
}

async fn current_limits(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = ctx.session.clone();
    wait_for_status(&session, CONNECTOR, &TRANSACTING).await;
    let watch = Arc::new(OfferedWatch::default());
    let _guard = session.install_hooks(watch.clone());
    for limit in [6.0, 5.0, 80.0] {
        apply_limit(ctx, &watch, limit).await?;
    }

    let limit = 81.0;
    let tx = active_transaction(&session)?;
    match set_profile(&session, single_limit(ctx.next_profile_id(), Some(tx), limit)).await {
        Ok(ChargingProfileStatus::Accepted) => {
            anyhow::bail!("charging profile with limit {limit} A was accepted")
        }
        Ok(status) => log::info!("limit {limit} A answered {status:?}"),
        Err(CallError::Protocol(code)) => log::info!("limit {limit} A refused with {code:?}"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn overcurrent(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = ctx.session.clone();
    log::warn!("apply a load drawing more than 6 A");
    wait_for_status(&session, CONNECTOR, &[ChargePointStatus::Charging]).await;
    let tx = active_transaction(&session)?;
    let status = set_profile(&session, single_limit(ctx.next_profile_id(), Some(tx), 6.0)).await?;
    ensure!(
        status == ChargingProfileStatus::Accepted,
        "charging profile with limit 6 A answered {status:?}"
    );

    let status = await_status_change(
        &session,
        CONNECTOR,
        &[ChargePointStatus::Charging],
        Some(Duration::from_secs(60)),
    )
    .await;
    ensure!(
        status == ChargePointStatus::Faulted,
        "overcurrent led to {status:?}, expected Faulted"
    );

    let res = session
        .call(UnlockConnectorRequest {
            connector_id: CONNECTOR,
        })
        .await?;
    ensure!(
        res.status == UnlockStatus::Unlocked,
        "unlock while faulted answered {:?}",
        res.status
    );
    let status = await_status_change(
        &session,
        CONNECTOR,
        &[ChargePointStatus::Faulted],
        Some(Duration::from_secs(15)),
    )
    .await;
    ensure!(
        status != ChargePointStatus::Faulted,
        "unlock did not clear the overcurrent fault"
    );
    status_after(
        &session,
        Duration::from_secs(4),
        &[ChargePointStatus::Available],
        "unlock after overcurrent",
    )
    .await
}
