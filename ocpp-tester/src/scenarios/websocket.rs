use std::time::Duration;

use anyhow::ensure;
use futures_util::FutureExt;
use rocpp_core::v16::Action;

use super::{
    common::{ensure_configuration, expect_boot},
    Scenario, ScenarioContext, ScenarioKind, SubTest,
};
use crate::sync::clear_action;

const SETUP: &[(&str, &str)] = &[
    ("LocalPreAuthorize", "false"),
    ("AuthorizeRemoteTxRequests", "true"),
    ("HeartbeatInterval", "0"),
    ("AuthorizationRequired", "true"),
    ("ConnectionTimeOut", "10"),
    ("ClockAlignedDataInterval", "0"),
    ("MeterValueSampleInterval", "0"),
    ("MinimumStatusDuration", "0"),
];

const RECONNECT_TIMEOUT: Duration = Duration::from_secs(90);

/// Close codes an endpoint may put on the wire. 1004 to 1006 and 1015 are
/// reserved for local use.
pub fn sendable_close_codes() -> impl Iterator<Item = u16> {
    (1000..=1003).chain(1007..=1014)
}

pub fn scenario() -> Scenario {
    Scenario {
        kind: ScenarioKind::Websocket,
        setup: |ctx| setup(ctx).boxed(),
        sub_tests: vec![SubTest::new("reconnect after close", |ctx| {
            reconnect_after_close(ctx).boxed()
        })],
    }
}

async fn setup(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    ensure_configuration(&ctx.session, SETUP).await
}

async fn reconnect_after_close(ctx: &mut ScenarioContext) -> anyhow::Result<()> {
    let session = &ctx.session;
    for code in sendable_close_codes() {
        log::info!("{} closing with {code}", session.identity());
        clear_action(session, Action::BootNotification);
        ensure!(
            session.close_connection(code, &format!("Testing {code}")).await,
            "no connection to close with {code}"
        );
        expect_boot(session, RECONNECT_TIMEOUT, &format!("reconnect after close {code}")).await?;
        ensure!(
            session.wait_connected(Duration::from_secs(1)).await.observed(),
            "booted after close {code} without a live connection"
        );
    }
    Ok(())
}
