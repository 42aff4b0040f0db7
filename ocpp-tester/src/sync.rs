use std::time::Duration;

use rocpp_core::v16::{types::ChargePointStatus, Action};
use tokio::time::Instant;

use crate::session::{signal::WaitOutcome, Session};

/// Waits for the next `action` from the device and consumes its signal.
pub async fn await_action(session: &Session, action: Action, timeout: Option<Duration>) -> WaitOutcome {
    session.signal(action).wait_timeout(timeout).await
}

/// Waits on `action` until `done` holds or `timeout` passes. `done` is
/// checked before the first wait and after every message.
pub async fn await_action_until(
    session: &Session,
    action: Action,
    timeout: Duration,
    mut done: impl FnMut() -> bool,
) -> WaitOutcome {
    let deadline = Instant::now() + timeout;
    let signal = session.signal(action);
    loop {
        if done() {
            return WaitOutcome::Observed;
        }
        let now = Instant::now();
        if now >= deadline {
            return WaitOutcome::TimedOut;
        }
        signal.wait_timeout(Some(deadline - now)).await;
    }
}

/// Drops a signal latched before the wait that is about to be armed.
pub fn clear_action(session: &Session, action: Action) {
    session.signal(action).clear();
}

/// Waits until the connector reports one of `acceptable`. Returns whatever
/// status holds when the set is matched or the deadline passes; callers
/// decide if that is a failure.
pub async fn await_status(
    session: &Session,
    connector: usize,
    acceptable: &[ChargePointStatus],
    timeout: Option<Duration>,
) -> ChargePointStatus {
    await_status_where(session, connector, timeout, |s| acceptable.contains(&s)).await
}

/// Waits until the connector reports a status outside `current`.
pub async fn await_status_change(
    session: &Session,
    connector: usize,
    current: &[ChargePointStatus],
    timeout: Option<Duration>,
) -> ChargePointStatus {
    await_status_where(session, connector, timeout, |s| !current.contains(&s)).await
}

/// Checks that `status` holds for the whole of `duration`. The error is the
/// status it moved to.
pub async fn hold_status(
    session: &Session,
    connector: usize,
    status: ChargePointStatus,
    duration: Duration,
) -> Result<(), ChargePointStatus> {
    let seen = await_status_change(session, connector, &[status], Some(duration)).await;
    if seen == status {
        Ok(())
    } else {
        Err(seen)
    }
}

async fn await_status_where(
    session: &Session,
    connector: usize,
    timeout: Option<Duration>,
    done: impl Fn(ChargePointStatus) -> bool,
) -> ChargePointStatus {
    let deadline = timeout.map(|t| Instant::now() + t);
    let signal = session.signal(Action::StatusNotification);
    loop {
        let status = session.connector_status(connector);
        if done(status) {
            return status;
        }
        let remaining = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return status;
                }
                Some(deadline - now)
            }
            None => None,
        };
        signal.wait_timeout(remaining).await;
    }
}
