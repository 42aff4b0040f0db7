use std::{
    collections::HashMap,
    pin::pin,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use rocpp_core::v16::Action;
use tokio::sync::Notify;

/// Result of a bounded wait. Expiry is a value, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Observed,
    TimedOut,
}

impl WaitOutcome {
    pub fn observed(self) -> bool {
        self == WaitOutcome::Observed
    }
}

/// Single-slot, edge-triggered wake signal for one action.
///
/// `set` latches the slot and wakes every parked waiter; the first waiter to
/// take the latch consumes it, the others go back to sleep.
#[derive(Debug, Default)]
pub struct ActionSignal {
    fired: Mutex<bool>,
    notify: Notify,
}

impl ActionSignal {
    pub fn set(&self) {
        *self.fired.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.notify.notify_waiters();
    }

    pub fn clear(&self) {
        *self.fired.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    pub fn take(&self) -> bool {
        std::mem::take(&mut *self.fired.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn is_set(&self) -> bool {
        *self.fired.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn wait(&self) {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            if self.take() {
                return;
            }
            notified.await;
        }
    }

    pub async fn wait_timeout(&self, timeout: Option<Duration>) -> WaitOutcome {
        match timeout {
            None => {
                self.wait().await;
                WaitOutcome::Observed
            }
            Some(limit) => match tokio::time::timeout(limit, self.wait()).await {
                Ok(()) => WaitOutcome::Observed,
                Err(_) => WaitOutcome::TimedOut,
            },
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Signals {
    slots: Mutex<HashMap<Action, Arc<ActionSignal>>>,
}

impl Signals {
    pub(crate) fn get(&self, action: Action) -> Arc<ActionSignal> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(action)
            .or_default()
            .clone()
    }
}
