use std::{fmt, sync::Arc};

use futures_util::future::BoxFuture;
use rocpp_core::format::error::OcppError;
use rocpp_core::v16::protocol_error::ProtocolError;

use crate::{config::TesterConfig, fault::FaultInjector, operator::Operator, session::Session};

pub mod common;
pub mod core_profile;
pub mod endurance;
pub mod local_list;
pub mod meter_values;
pub mod remote_trigger;
pub mod reservation;
pub mod smart_charging;
pub mod websocket;

/// First id handed out to charging profiles created by the harness.
pub const FIRST_PROFILE_ID: i32 = 1267086206;

pub type StepFn = for<'a> fn(&'a mut ScenarioContext) -> BoxFuture<'a, anyhow::Result<()>>;

/// What a scenario step runs against.
pub struct ScenarioContext {
    pub session: Session,
    pub operator: Arc<dyn Operator>,
    pub faults: Option<Arc<dyn FaultInjector>>,
    pub config: Arc<TesterConfig>,
    next_profile_id: i32,
}

impl ScenarioContext {
    pub fn new(
        session: Session,
        operator: Arc<dyn Operator>,
        faults: Option<Arc<dyn FaultInjector>>,
        config: Arc<TesterConfig>,
    ) -> Self {
        Self {
            session,
            operator,
            faults,
            config,
            next_profile_id: FIRST_PROFILE_ID,
        }
    }

    pub fn next_profile_id(&mut self) -> i32 {
        let id = self.next_profile_id;
        self.next_profile_id = self.next_profile_id.wrapping_add(1);
        id
    }
}

pub struct SubTest {
    pub name: &'static str,
    /// Needs a person at the charge point.
    pub manual: bool,
    /// Needs a [`FaultInjector`].
    pub needs_faults: bool,
    pub run: StepFn,
}

impl SubTest {
    pub const fn new(name: &'static str, run: StepFn) -> Self {
        Self {
            name,
            manual: false,
            needs_faults: false,
            run,
        }
    }

    pub const fn manual(name: &'static str, run: StepFn) -> Self {
        Self {
            name,
            manual: true,
            needs_faults: false,
            run,
        }
    }

    pub const fn with_faults(name: &'static str, run: StepFn) -> Self {
        Self {
            name,
            manual: false,
            needs_faults: true,
            run,
        }
    }
}

/// A named, ordered list of sub-tests. `setup` brings the device to the
/// configuration the sub-tests assume.
pub struct Scenario {
    pub kind: ScenarioKind,
    pub setup: StepFn,
    pub sub_tests: Vec<SubTest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnduranceKind {
    BootRepeat,
    SmartChargingExtended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioKind {
    Core,
    Reservation,
    SmartCharging,
    LocalList,
    RemoteTrigger,
    Websocket,
    Endurance(EnduranceKind),
}

impl ScenarioKind {
    /// Everything `A` runs. Endurance is only run on request.
    pub const ALL: [ScenarioKind; 6] = [
        ScenarioKind::Core,
        ScenarioKind::Reservation,
        ScenarioKind::SmartCharging,
        ScenarioKind::LocalList,
        ScenarioKind::RemoteTrigger,
        ScenarioKind::Websocket,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioKind::Core => "Core profile",
            ScenarioKind::Reservation => "Reservation profile",
            ScenarioKind::SmartCharging => "Smart charging profile",
            ScenarioKind::LocalList => "Local auth list profile",
            ScenarioKind::RemoteTrigger => "Remote trigger profile",
            ScenarioKind::Websocket => "Websocket",
            ScenarioKind::Endurance(EnduranceKind::BootRepeat) => "Endurance boot repeat",
            ScenarioKind::Endurance(EnduranceKind::SmartChargingExtended) => {
                "Endurance smart charging"
            }
        }
    }

    pub fn scenario(self) -> Scenario {
        match self {
            ScenarioKind::Core => core_profile::scenario(),
            ScenarioKind::Reservation => reservation::scenario(),
            ScenarioKind::SmartCharging => smart_charging::scenario(),
            ScenarioKind::LocalList => local_list::scenario(),
            ScenarioKind::RemoteTrigger => remote_trigger::scenario(),
            ScenarioKind::Websocket => websocket::scenario(),
            ScenarioKind::Endurance(kind) => endurance::scenario(kind),
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Answer to the scenario prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Run(Vec<ScenarioKind>),
    /// `E`; the endurance test is chosen by a second prompt.
    Endurance,
}

impl Selection {
    pub const PROMPT: &'static str = "Input test id [A]ll/[C]ore/[R]eservation/[S]mart/[L]ocalAuthList/[T]riggerMessage/[E]ndurance Test/[W]ebsocket: ";
    pub const ENDURANCE_PROMPT: &'static str =
        "Input sub id [B]oot repeat/[S]mart charging extended: ";

    /// Parses one or more scenario letters, case-insensitively.
    pub fn parse(input: &str) -> Option<Selection> {
        let input = input.trim().to_ascii_uppercase();
        if input == "E" {
            return Some(Selection::Endurance);
        }
        if input.is_empty() {
            return None;
        }
        let mut kinds = Vec::new();
        for letter in input.chars() {
            let picked: &[ScenarioKind] = match letter {
                'A' => &ScenarioKind::ALL,
                'C' => &[ScenarioKind::Core],
                'R' => &[ScenarioKind::Reservation],
                'S' => &[ScenarioKind::SmartCharging],
                'L' => &[ScenarioKind::LocalList],
                'T' => &[ScenarioKind::RemoteTrigger],
                'W' => &[ScenarioKind::Websocket],
                _ => return None,
            };
            for kind in picked {
                if !kinds.contains(kind) {
                    kinds.push(*kind);
                }
            }
        }
        Some(Selection::Run(kinds))
    }

    pub fn parse_endurance(input: &str) -> Option<EnduranceKind> {
        match input.trim().to_ascii_uppercase().as_str() {
            "B" => Some(EnduranceKind::BootRepeat),
            "S" => Some(EnduranceKind::SmartChargingExtended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubTestOutcome {
    Passed,
    Failed(String),
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioOutcome {
    Passed,
    SetupFailed(String),
    Failed { sub_test: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub kind: ScenarioKind,
    pub outcome: ScenarioOutcome,
    pub sub_tests: Vec<(&'static str, SubTestOutcome)>,
    /// The failure came from the connection, not from device behaviour.
    pub transport_failure: bool,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.outcome == ScenarioOutcome::Passed
    }
}

fn is_transport(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| {
        cause
            .downcast_ref::<OcppError<ProtocolError>>()
            .is_some_and(OcppError::is_transport)
    })
}

/// Runs setup, then each sub-test in order; the first failure ends the
/// scenario.
pub async fn run_scenario(scenario: &Scenario, ctx: &mut ScenarioContext) -> ScenarioReport {
    let kind = scenario.kind;
    log::info!("setting up {}", kind);
    let mut report = ScenarioReport {
        kind,
        outcome: ScenarioOutcome::Passed,
        sub_tests: Vec::with_capacity(scenario.sub_tests.len()),
        transport_failure: false,
    };

    if let Err(e) = (scenario.setup)(ctx).await {
        log::error!("{} setup failed: {:#}", kind, e);
        report.transport_failure = is_transport(&e);
        report.outcome = ScenarioOutcome::SetupFailed(format!("{e:#}"));
        return report;
    }

    for sub_test in &scenario.sub_tests {
        if sub_test.manual && !ctx.config.include_manual {
            log::info!("{} / {}: skipped (manual)", kind, sub_test.name);
            report.sub_tests.push((sub_test.name, SubTestOutcome::Skipped));
            continue;
        }
        if sub_test.needs_faults && ctx.faults.is_none() {
            log::warn!("{} / {}: skipped (no fault injector)", kind, sub_test.name);
            report.sub_tests.push((sub_test.name, SubTestOutcome::Skipped));
            continue;
        }

        log::info!("{} / {}: running", kind, sub_test.name);
        match (sub_test.run)(ctx).await {
            Ok(()) => {
                log::info!("{} / {}: passed", kind, sub_test.name);
                report.sub_tests.push((sub_test.name, SubTestOutcome::Passed));
            }
            Err(e) => {
                log::error!("{} / {}: failed: {:#}", kind, sub_test.name, e);
                let reason = format!("{e:#}");
                report.transport_failure = is_transport(&e);
                report
                    .sub_tests
                    .push((sub_test.name, SubTestOutcome::Failed(reason.clone())));
                report.outcome = ScenarioOutcome::Failed {
                    sub_test: sub_test.name,
                    reason,
                };
                break;
            }
        }
    }
    report
}
