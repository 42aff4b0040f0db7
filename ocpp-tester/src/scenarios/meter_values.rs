//! Measurand configuration and sampling interval checks.

use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    ops::RangeInclusive,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use anyhow::{bail, ensure, Context};
use chrono::{DateTime, TimeDelta, Utc};
use rocpp_core::v16::{
    messages::meter_values::MeterValuesRequest,
    types::{ChargePointStatus, ConfigurationStatus, Measurand, MeterValue, Phase, SampledValue},
    Action,
};

use super::{
    common::{expect_change, get_configuration, wait_for_status, CONNECTOR, TRANSACTING},
    ScenarioContext,
};
use crate::{
    session::{hooks::InboundHooks, Session},
    sync::{await_action, clear_action},
};

pub const ACCEPTED_MEASURANDS: [Measurand; 7] = [
    Measurand::CurrentImport,
    Measurand::CurrentOffered,
    Measurand::EnergyActiveImportRegister,
    Measurand::EnergyActiveImportInterval,
    Measurand::PowerActiveImport,
    Measurand::Temperature,
    Measurand::Voltage,
];

/// Measurand and phase pairs requested once phases are configured.
const PHASED: [(Measurand, Phase); 3] = [
    (Measurand::CurrentImport, Phase::L1),
    (Measurand::Temperature, Phase::L2),
    (Measurand::Voltage, Phase::L3),
];

const WINDOW: usize = 10;
const CAPTURE_ATTEMPTS: usize = 4;
const CAPTURE_WAIT: Duration = Duration::from_secs(3);

const ALIGNED_DATA: &str = "MeterValuesAlignedData";
const SAMPLED_DATA: &str = "MeterValuesSampledData";
const ALIGNED_INTERVAL: &str = "ClockAlignedDataInterval";
const SAMPLE_INTERVAL: &str = "MeterValueSampleInterval";

#[derive(Debug, Default)]
struct WatchState {
    awaiting: Vec<usize>,
    captured: HashMap<usize, Vec<MeterValue>>,
    window: VecDeque<DateTime<Utc>>,
}

/// Keeps the first MeterValues seen on each armed connector and the device
/// timestamps of the most recent messages.
#[derive(Debug, Default)]
pub struct MeterWatch {
    state: Mutex<WatchState>,
}

impl MeterWatch {
    fn with<R>(&self, f: impl FnOnce(&mut WatchState) -> R) -> R {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Starts a capture on `connectors` and forgets earlier timestamps.
    pub fn arm(&self, connectors: &[usize]) {
        self.with(|s| {
            s.awaiting = connectors.to_vec();
            for c in connectors {
                s.captured.remove(c);
            }
            s.window.clear();
        });
    }

    pub fn awaiting(&self) -> Vec<usize> {
        self.with(|s| s.awaiting.clone())
    }

    pub fn captured(&self, connector: usize) -> Vec<MeterValue> {
        self.with(|s| s.captured.get(&connector).cloned().unwrap_or_default())
    }

    /// Time between the oldest and newest timestamp in the window.
    pub fn span(&self) -> Option<Duration> {
        self.with(|s| {
            let (first, last) = (s.window.front()?, s.window.back()?);
            (*last - *first).to_std().ok()
        })
    }
}

impl InboundHooks for MeterWatch {
    fn on_meter_values(&self, req: &MeterValuesRequest) {
        self.with(|s| {
            if let Some(pos) = s.awaiting.iter().position(|c| *c == req.connector_id) {
                s.awaiting.remove(pos);
                s.captured.insert(req.connector_id, req.meter_value.clone());
                log::info!("captured meter values for connector {}", req.connector_id);
            }
            let Some(ts) = req.meter_value.first().map(|mv| mv.timestamp) else {
                return;
            };
            if s.window.back().is_none_or(|last| *last + TimeDelta::seconds(1) < ts) {
                if s.window.len() == WINDOW {
                    s.window.pop_front();
                }
                s.window.push_back(ts);
            }
        });
    }
}

fn samples(values: &[MeterValue]) -> impl Iterator<Item = &SampledValue> {
    values.iter().flat_map(|mv| mv.sampled_value.iter())
}

/// Measurands in `values`; an absent measurand is the energy register.
fn measurands(values: &[MeterValue]) -> BTreeSet<Measurand> {
    samples(values)
        .map(|s| s.measurand.unwrap_or(Measurand::EnergyActiveImportRegister))
        .collect()
}

fn phases(values: &[MeterValue]) -> BTreeSet<Phase> {
    samples(values).filter_map(|s| s.phase).collect()
}

/// Checks the reported phases against the wiring the device claims.
fn check_phases(single_phase: bool, phases: &BTreeSet<Phase>) -> anyhow::Result<()> {
    if single_phase {
        ensure!(
            phases.contains(&Phase::L1) && !phases.contains(&Phase::L2) && !phases.contains(&Phase::L3),
            "single phase charger reported phases {phases:?}, expected only L1"
        );
    } else {
        ensure!(
            phases.len() == 3,
            "three phase charger reported phases {phases:?}, expected all three"
        );
    }
    Ok(())
}

/// Checks connector `connector` reported only phased measurands. Connector 0
/// has no per-connector temperature.
fn check_phased(connector: usize, values: &[MeterValue]) -> anyhow::Result<()> {
    let mut seen = BTreeSet::new();
    for sample in samples(values) {
        let pair = sample.measurand.zip(sample.phase);
        match pair {
            Some(pair) if PHASED.contains(&pair) => {
                seen.insert(pair.0);
            }
            _ => bail!("unexpected measurand and phase combination {sample:?}"),
        }
    }
    if connector == 0 {
        ensure!(
            !seen.contains(&Measurand::Temperature),
            "phase related temperature reported on connector 0"
        );
        seen.insert(Measurand::Temperature);
    }
    ensure!(
        seen.len() == PHASED.len(),
        "connector {connector} reported {seen:?}, expected three measurands"
    );
    Ok(())
}

/// Expected window span for `interval`: the nine gaps between ten messages,
/// within 10 % either way.
fn span_bounds(interval: u64) -> RangeInclusive<Duration> {
    let nominal_ms = (WINDOW as u64 - 1) * interval * 1000;
    let margin_ms = nominal_ms / 10;
    Duration::from_millis(nominal_ms - margin_ms)..=Duration::from_millis(nominal_ms + margin_ms)
}

async fn capture(session: &Session, watch: &MeterWatch, connectors: &[usize]) -> anyhow::Result<()> {
    clear_action(session, Action::MeterValues);
    watch.arm(connectors);
    for _ in 0..CAPTURE_ATTEMPTS {
        let awaiting = watch.awaiting();
        if awaiting.is_empty() {
            return Ok(());
        }
        log::warn!("awaiting new meter values for connectors {awaiting:?}");
        await_action(session, Action::MeterValues, Some(CAPTURE_WAIT)).await;
    }
    let awaiting = watch.awaiting();
    ensure!(
        awaiting.is_empty(),
        "no meter values from connectors {awaiting:?} within {:?}",
        CAPTURE_WAIT * CAPTURE_ATTEMPTS as u32
    );
    Ok(())
}

async fn check_interval(
    session: &Session,
    watch: &MeterWatch,
    key: &str,
    interval: u64,
    settle: Duration,
) -> anyhow::Result<()> {
    expect_change(session, key, &interval.to_string(), ConfigurationStatus::Accepted).await?;
    log::info!("waiting {settle:?} for meter values at a {interval} s {key}");
    tokio::time::sleep(settle).await;
    let span = watch.span().context("no meter value timestamps collected")?;
    let bounds = span_bounds(interval);
    ensure!(
        bounds.contains(&span),
        "{key} of {interval} s sent the last {WINDOW} messages within {span:?}, expected {bounds:?}"
    );
    Ok(())
}

async fn phase_rotation_is_single(session: &Session) -> anyhow::Result<bool> {
    let res = get_configuration(session, Some(&["ConnectorPhaseRotation"])).await?;
    let keys = res.configuration_key.unwrap_or_default();
    let [rotation] = keys.as_slice() else {
        bail!("unable to get phase rotation configuration, got {keys:?}");
    };
    let value = rotation.value.as_deref().unwrap_or("Unknown");
    ensure!(
        !value.contains("Unknown"),
        "phase rotation {value} does not indicate single or three phase"
    );
    Ok(value.contains("NotApplicable"))
}

fn join(measurands: impl IntoIterator<Item = String>) -> String {
    measurands.into_iter().collect::<Vec<_>>().join(",")
}

pub async fn run(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = &ctx.session;
    let single_phase = phase_rotation_is_single(session).await?;

    for measurand in ACCEPTED_MEASURANDS {
        for key in [ALIGNED_DATA, SAMPLED_DATA] {
            expect_change(session, key, measurand.as_str(), ConfigurationStatus::Accepted).await?;
        }
    }
    for measurand in Measurand::ALL
        .into_iter()
        .filter(|m| !ACCEPTED_MEASURANDS.contains(m))
    {
        for key in [ALIGNED_DATA, SAMPLED_DATA] {
            expect_change(session, key, measurand.as_str(), ConfigurationStatus::Rejected).await?;
        }
    }
    let all = join(ACCEPTED_MEASURANDS.iter().map(|m| m.to_string()));
    for key in [ALIGNED_DATA, SAMPLED_DATA] {
        expect_change(session, key, &all, ConfigurationStatus::Accepted).await?;
    }

    let watch = Arc::new(MeterWatch::default());
    let _guard = session.install_hooks(watch.clone());

    for key in [ALIGNED_INTERVAL, SAMPLE_INTERVAL] {
        expect_change(session, key, "3", ConfigurationStatus::Accepted).await?;
        let (wanted, connectors): (&[ChargePointStatus], &[usize]) = if key == ALIGNED_INTERVAL {
            (
                &[ChargePointStatus::Available, ChargePointStatus::Preparing],
                &[0, CONNECTOR],
            )
        } else {
            (&TRANSACTING, &[CONNECTOR])
        };
        wait_for_status(session, CONNECTOR, wanted).await;
        capture(session, &watch, connectors).await?;

        let settle = Duration::from_secs(40);
        tokio::time::sleep(settle).await;
        let span = watch.span().context("no meter value timestamps collected")?;
        ensure!(
            span_bounds(3).contains(&span),
            "{key} of 3 s sent the last {WINDOW} messages within {span:?}"
        );
        check_interval(session, &watch, key, 6, Duration::from_secs(70)).await?;
        expect_change(session, key, "0", ConfigurationStatus::Accepted).await?;

        let mut seen_phases = BTreeSet::new();
        for connector in connectors {
            seen_phases.extend(phases(&watch.captured(*connector)));
        }
        check_phases(single_phase, &seen_phases)?;
        let got = measurands(&watch.captured(CONNECTOR));
        let missing: Vec<_> = ACCEPTED_MEASURANDS
            .iter()
            .filter(|m| !got.contains(m))
            .collect();
        ensure!(
            missing.is_empty(),
            "{key}: connector {CONNECTOR} did not report {missing:?}"
        );
    }

    let unsupported = join(
        ACCEPTED_MEASURANDS
            .iter()
            .enumerate()
            .map(|(i, m)| format!("{m}.L{}", 1 + i % 3)),
    );
    for key in [ALIGNED_DATA, SAMPLED_DATA] {
        expect_change(session, key, &unsupported, ConfigurationStatus::Rejected).await?;
    }
    let phased = join(PHASED.iter().map(|(m, p)| format!("{m}.{}", p.as_str())));
    for key in [SAMPLED_DATA, ALIGNED_DATA] {
        expect_change(session, key, &phased, ConfigurationStatus::Accepted).await?;
    }

    expect_change(session, ALIGNED_INTERVAL, "3", ConfigurationStatus::Accepted).await?;
    wait_for_status(
        session,
        CONNECTOR,
        &[ChargePointStatus::Available, ChargePointStatus::Preparing],
    )
    .await;
    capture(session, &watch, &[0, CONNECTOR]).await?;
    for connector in [0, CONNECTOR] {
        check_phased(connector, &watch.captured(connector))?;
    }
    expect_change(session, ALIGNED_INTERVAL, "0", ConfigurationStatus::Accepted).await?;
    Ok(())
}
