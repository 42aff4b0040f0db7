//! Per charge point test loop: wait for an accepted boot, pick scenarios,
//! run them and report.

use anyhow::{bail, Context};
use rocpp_core::v16::{
    messages::reset::ResetRequest,
    types::{RegistrationStatus, ResetType},
};

use crate::{
    config::TesterConfig,
    operator::Operator,
    scenarios::{
        run_scenario, ScenarioContext, ScenarioKind, ScenarioOutcome, ScenarioReport, Selection,
    },
    session::Session,
    transport::ServerContext,
};

/// Runs test rounds for `session` until it has been disconnected for longer
/// than the reconnect grace period.
pub async fn run(session: Session, ctx: ServerContext) {
    let grace = ctx.config.reconnect_grace();
    let mut scenario_ctx = ScenarioContext::new(
        session.clone(),
        ctx.operator.clone(),
        ctx.faults.clone(),
        ctx.config.clone(),
    );
    tokio::select! {
        _ = session.lost(grace) => {
            log::warn!("{} disconnected for more than {:?}, stopping tests", session.identity(), grace);
        }
        _ = rounds(&mut scenario_ctx) => {}
    }
}

async fn rounds(ctx: &mut ScenarioContext) {
    loop {
        if let Err(e) = round(ctx).await {
            log::error!("{} test round failed: {:#}", ctx.session.identity(), e);
            tokio::time::sleep(ctx.config.round_pause()).await;
        }
    }
}

async fn round(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    await_registration(&ctx.session, &ctx.config).await?;
    log::info!("{} boot accepted", ctx.session.identity());

    let kinds = choose(ctx.operator.as_ref(), &ctx.config).await;
    let mut reports = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let report = run_scenario(&kind.scenario(), ctx).await;
        let transport_failure = report.transport_failure;
        reports.push(report);
        if transport_failure {
            log_results(&ctx.session, &reports);
            bail!("connection lost during {kind}");
        }
    }
    log_results(&ctx.session, &reports);
    tokio::time::sleep(ctx.config.round_pause()).await;
    Ok(())
}

/// Polls until the device is registered, hard resetting it every
/// `boot_poll_attempts` polls.
async fn await_registration(session: &Session, config: &TesterConfig) -> anyhow::Result<()> {
    let mut polls = 0;
    loop {
        let status = session.registration();
        if status == RegistrationStatus::Accepted {
            return Ok(());
        }
        polls += 1;
        if polls > config.boot_poll_attempts {
            log::info!("{} attempting reset due to no accepted boot", session.identity());
            let res = session
                .call(ResetRequest {
                    kind: ResetType::Hard,
                })
                .await
                .context("hard reset while waiting for boot")?;
            log::info!("{} reset answered {:?}", session.identity(), res.status);
            polls = 0;
        }
        log::warn!("{} awaiting accepted boot ({:?})", session.identity(), status);
        tokio::time::sleep(config.boot_poll_interval()).await;
    }
}

/// Scenarios for this round, from the configuration or the operator. An
/// unrecognised answer runs nothing.
async fn choose(operator: &dyn Operator, config: &TesterConfig) -> Vec<ScenarioKind> {
    let answer = match &config.scenarios {
        Some(preselected) => preselected.clone(),
        None => operator.ask(Selection::PROMPT).await,
    };
    match Selection::parse(&answer) {
        Some(Selection::Run(kinds)) => kinds,
        Some(Selection::Endurance) => {
            let answer = match &config.endurance {
                Some(preselected) => preselected.clone(),
                None => operator.ask(Selection::ENDURANCE_PROMPT).await,
            };
            match Selection::parse_endurance(&answer) {
                Some(kind) => vec![ScenarioKind::Endurance(kind)],
                None => {
                    log::warn!("unknown endurance test {answer:?}");
                    Vec::new()
                }
            }
        }
        None => {
            log::warn!("unknown test selection {answer:?}");
            Vec::new()
        }
    }
}

fn results_table(reports: &[ScenarioReport]) -> Vec<String> {
    reports
        .iter()
        .map(|report| {
            let result = match &report.outcome {
                ScenarioOutcome::Passed => "passed".to_owned(),
                ScenarioOutcome::SetupFailed(_) => "setup failed".to_owned(),
                ScenarioOutcome::Failed { sub_test, .. } => format!("failed in {sub_test}"),
            };
            format!("{:<25}: {}", report.kind.name(), result)
        })
        .collect()
}

fn log_results(session: &Session, reports: &[ScenarioReport]) {
    log::info!("{} results:", session.identity());
    for line in results_table(reports) {
        log::info!("{line}");
    }
}
