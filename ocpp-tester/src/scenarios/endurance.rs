//! Long running tests. They loop until a check fails or the configured
//! number of iterations is reached.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use anyhow::{bail, ensure, Context};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use rand::Rng;
use rocpp_core::v16::{
    messages::{boot_notification::BootNotificationRequest, meter_values::MeterValuesRequest},
    types::{
        ChargePointStatus, ChargingProfileStatus, ChargingSchedulePeriod, Measurand,
        RegistrationStatus, ResetType,
    },
    Action,
};

use super::{
    common::{
        clear_charging_profiles, ensure_configuration, get_configuration, reset, wait_for_status,
        CHARGING, CONNECTOR,
    },
    smart_charging::{set_profile, tx_profile},
    EnduranceKind, Scenario, ScenarioContext, ScenarioKind, SubTest,
};
use crate::{
    session::{hooks::InboundHooks, state::BootParameters},
    sync::{await_action_until, await_status_change, clear_action},
};

const BOOT_REPEAT_SETUP: &[(&str, &str)] = &[
    ("LocalPreAuthorize", "false"),
    ("AuthorizeRemoteTxRequests", "true"),
    ("HeartbeatInterval", "0"),
    ("AuthorizationRequired", "true"),
    ("ConnectionTimeOut", "120"),
    ("ClockAlignedDataInterval", "0"),
    ("MeterValueSampleInterval", "0"),
    ("MinimumStatusDuration", "0"),
    ("MessageTimeout", "30"),
];

const SMART_CHARGING_SETUP: &[(&str, &str)] = &[
    ("LocalPreAuthorize", "false"),
    ("AuthorizeRemoteTxRequests", "false"),
    ("HeartbeatInterval", "0"),
    ("ClockAlignedDataInterval", "0"),
    ("MeterValueSampleInterval", "2"),
    ("MeterValuesSampledData", "Current.Offered"),
    ("AuthorizationRequired", "false"),
];

const RESET_BOOT_TIMEOUT: Duration = Duration::from_secs(120);
const LEAVE_UNAVAILABLE_TIMEOUT: Duration = Duration::from_secs(50);
/// The device allows about 20 session resets an hour; one schedule is one
/// reset.
const SCHEDULE_SECONDS: u64 = 3600 / 20;
/// Period that is forced to zero so every schedule suspends charging once.
const ZERO_PERIOD: usize = 5;

pub fn scenario(kind: EnduranceKind) -> Scenario {
    match kind {
        EnduranceKind::BootRepeat => Scenario {
            kind: ScenarioKind::Endurance(kind),
            setup: |ctx| boot_repeat_setup(ctx).boxed(),
            sub_tests: vec![SubTest::new("boot repeat", |ctx| boot_repeat(ctx).boxed())],
        },
        EnduranceKind::SmartChargingExtended => Scenario {
            kind: ScenarioKind::Endurance(kind),
            setup: |ctx| smart_charging_setup(ctx).boxed(),
            sub_tests: vec![SubTest::new("smart charging extended", |ctx| {
                smart_charging_extended(ctx).boxed()
            })],
        },
    }
}

fn more_iterations(ctx: &ScenarioContext, done: u64) -> bool {
    ctx.config.endurance_iterations.is_none_or(|limit| done < limit)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct BootCounts {
    expecting: bool,
    expected: u64,
    unexpected: u64,
}

impl fmt::Display for BootCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} expected boots and {} unexpected boots",
            self.expected, self.unexpected
        )
    }
}

/// Tells boots caused by the test from boots the device did on its own.
#[derive(Debug, Default)]
struct BootCounter {
    counts: Mutex<BootCounts>,
}

impl BootCounter {
    fn with<R>(&self, f: impl FnOnce(&mut BootCounts) -> R) -> R {
        f(&mut self.counts.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn counts(&self) -> BootCounts {
        self.with(|c| *c)
    }
}

impl InboundHooks for BootCounter {
    fn on_boot(&self, _req: &BootNotificationRequest) {
        self.with(|c| {
            if c.expecting {
                c.expecting = false;
                c.expected += 1;
            } else {
                c.unexpected += 1;
                log::error!("got unexpected boot: {}", c.unexpected);
            }
        });
    }
}

async fn boot_repeat_setup(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    ctx.session
        .stage_boot(BootParameters::new(RegistrationStatus::Accepted, 0));
    ensure_configuration(&ctx.session, BOOT_REPEAT_SETUP).await
}

async fn boot_repeat(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = ctx.session.clone();
    let counter = Arc::new(BootCounter::default());
    let _guard = session.install_hooks(counter.clone());

    while more_iterations(ctx, counter.counts().expected) {
        let status = await_status_change(
            &session,
            CONNECTOR,
            &[ChargePointStatus::Unavailable],
            Some(LEAVE_UNAVAILABLE_TIMEOUT),
        )
        .await;
        ensure!(
            status != ChargePointStatus::Unavailable,
            "charger never left Unavailable, {}",
            counter.counts()
        );
        tokio::time::sleep(Duration::from_secs(10)).await;

        let kind = if counter.counts().expected % 2 == 0 {
            ResetType::Soft
        } else {
            ResetType::Hard
        };
        counter.with(|c| c.expecting = true);
        clear_action(&session, Action::BootNotification);
        reset(&session, kind)
            .await
            .with_context(|| format!("reset during boot repeat, {}", counter.counts()))?;
        session.force_connector_status(CONNECTOR, ChargePointStatus::Unavailable);

        let booted = await_action_until(&session, Action::BootNotification, RESET_BOOT_TIMEOUT, || {
            !counter.counts().expecting
        })
        .await;
        if !booted.observed() {
            bail!("no boot after {kind:?} reset, {}", counter.counts());
        }
        log::info!("endurance boot state: {}", counter.counts());
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleClass {
    Expected,
    /// The previous period's limit just after a period boundary.
    WithinMargin,
    Unexpected,
}

/// Classifies an offered current sample taken `offset` whole seconds after
/// the schedule started.
fn classify(limits: &[i32], rate: u64, offset: i64, value: i32) -> SampleClass {
    let Some(last) = limits.len().checked_sub(1) else {
        return SampleClass::Unexpected;
    };
    let rate = rate.max(1) as i64;
    let period = |offset: i64| usize::try_from(offset.max(0) / rate).unwrap_or(usize::MAX);
    let index = period(offset).min(last);
    if value == limits[index] {
        SampleClass::Expected
    } else if offset > 1 && index > 0 && period(offset - 1) != index && value == limits[index - 1] {
        SampleClass::WithinMargin
    } else {
        SampleClass::Unexpected
    }
}

fn random_limits(rng: &mut impl Rng, periods: usize) -> Vec<i32> {
    let mut limits: Vec<i32> = (0..periods).map(|_| rng.random_range(6..33)).collect();
    if let Some(limit) = limits.get_mut(ZERO_PERIOD) {
        *limit = 0;
    }
    limits
}

fn switch_rate(periods: usize) -> u64 {
    SCHEDULE_SECONDS.div_ceil(periods.max(1) as u64)
}

fn schedule(limits: &[i32], rate: u64) -> Vec<ChargingSchedulePeriod> {
    limits
        .iter()
        .enumerate()
        .map(|(i, limit)| ChargingSchedulePeriod {
            start_period: (i as u64 * rate) as i32,
            limit: *limit as f32,
            number_phases: Some(if i % 2 == 1 { 3 } else { 1 }),
        })
        .collect()
}

#[derive(Debug, Default, Clone, Copy)]
struct SampleCounts {
    expected: u64,
    within_margin: u64,
    unexpected: u64,
}

impl fmt::Display for SampleCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expected {}, within margin {}, unexpected {}",
            self.expected, self.within_margin, self.unexpected
        )
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    limits: Vec<i32>,
    rate: u64,
    started: Option<DateTime<Utc>>,
    counts: SampleCounts,
}

/// Compares offered current against the schedule in force.
#[derive(Debug, Default)]
struct ScheduleTracker {
    state: Mutex<TrackerState>,
}

impl ScheduleTracker {
    fn with<R>(&self, f: impl FnOnce(&mut TrackerState) -> R) -> R {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn start(&self, limits: Vec<i32>, rate: u64, started: DateTime<Utc>) {
        self.with(|s| {
            s.limits = limits;
            s.rate = rate;
            s.started = Some(started);
        });
    }

    fn stop(&self) {
        self.with(|s| s.started = None);
    }

    fn counts(&self) -> SampleCounts {
        self.with(|s| s.counts)
    }
}

impl InboundHooks for ScheduleTracker {
    fn on_meter_values(&self, req: &MeterValuesRequest) {
        self.with(|s| {
            let Some(started) = s.started else {
                return;
            };
            let sample = match req.meter_value.as_slice() {
                [mv] => mv
                    .sampled_value
                    .first()
                    .filter(|sv| sv.measurand == Some(Measurand::CurrentOffered))
                    .and_then(|sv| sv.value.parse::<f32>().ok())
                    .map(|value| (mv.timestamp, value as i32)),
                _ => None,
            };
            let class = match sample {
                Some((timestamp, value)) => {
                    let offset = (timestamp - started).num_seconds();
                    let class = classify(&s.limits, s.rate, offset, value);
                    log::info!("offset {offset} s offered {value} A: {class:?}");
                    class
                }
                None => {
                    log::warn!("unexpected meter value structure {:?}", req.meter_value);
                    SampleClass::Unexpected
                }
            };
            match class {
                SampleClass::Expected => s.counts.expected += 1,
                SampleClass::WithinMargin => s.counts.within_margin += 1,
                SampleClass::Unexpected => s.counts.unexpected += 1,
            }
        });
    }
}

async fn smart_charging_setup(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    ensure_configuration(&ctx.session, SMART_CHARGING_SETUP).await?;
    clear_charging_profiles(&ctx.session).await
}

async fn max_schedule_periods(ctx: &ScenarioContext) -> anyhow::Result<usize> {
    let key = "ChargingScheduleMaxPeriods";
    let res = get_configuration(&ctx.session, Some(&[key])).await?;
    let keys = res.configuration_key.unwrap_or_default();
    let [kv] = keys.as_slice() else {
        bail!("unexpected reply for {key}: {keys:?}");
    };
    ensure!(kv.key == key, "asked for {key}, got {}", kv.key);
    let periods: usize = kv
        .value
        .as_deref()
        .unwrap_or_default()
        .parse()
        .with_context(|| format!("{key} is not a number"))?;
    ensure!(
        (6..=3600).contains(&periods),
        "unexpected {key}: {periods}"
    );
    Ok(periods)
}

fn timeline(limits: &[i32], current: usize) -> String {
    limits
        .iter()
        .enumerate()
        .map(|(i, limit)| {
            if i == current {
                format!(">{limit:2}")
            } else {
                format!("{limit:3}")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

async fn smart_charging_extended(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = ctx.session.clone();
    let periods = max_schedule_periods(ctx).await?;
    let limits = random_limits(&mut rand::rng(), periods);
    let rate = switch_rate(periods);
    log::info!("will switch period every {rate} s");

    let tracker = Arc::new(ScheduleTracker::default());
    let _guard = session.install_hooks(tracker.clone());

    let mut iteration = 0;
    while more_iterations(ctx, iteration) {
        wait_for_status(&session, CONNECTOR, &CHARGING).await;
        let tx = session
            .with_state(|s| s.active_transaction_id())
            .context("charging without a transaction")?;
        let profile = tx_profile(ctx.next_profile_id(), Some(tx), schedule(&limits, rate));
        let started = profile
            .charging_schedule
            .start_schedule
            .unwrap_or_else(Utc::now);
        let status = set_profile(&session, profile).await?;
        ensure!(
            status == ChargingProfileStatus::Accepted,
            "tx profile during endurance answered {status:?}"
        );

        tracker.start(limits.clone(), rate, started);
        for i in 0..limits.len() {
            log::info!("{}", timeline(&limits, i));
            tokio::time::sleep(Duration::from_secs(rate)).await;
        }
        tracker.stop();
        iteration += 1;
        log::info!(
            "smart charging iteration {iteration}: {}",
            tracker.counts()
        );
    }
    Ok(())
}
