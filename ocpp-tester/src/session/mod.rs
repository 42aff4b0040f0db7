use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use rocpp_core::{
    format::error::{GenericError, OcppError},
    v16::{
        protocol_error::ProtocolError,
        types::{ChargePointStatus, IdTagInfo, RegistrationStatus},
        Action, OcppRequest,
    },
};
use tokio::sync::watch;

use crate::transport::CallTransport;

pub mod auth;
pub mod charging;
mod handlers;
pub mod hooks;
pub mod local_list;
pub mod signal;
pub mod state;

use hooks::{HooksGuard, InboundHooks, NoHooks};
use signal::{ActionSignal, Signals, WaitOutcome};
use state::{BootParameters, SessionState, Transaction};

struct SessionInner {
    identity: String,
    state: Mutex<SessionState>,
    signals: Signals,
    hooks: Mutex<Arc<dyn InboundHooks>>,
    link: Mutex<Option<Arc<dyn CallTransport>>>,
    connected: watch::Sender<bool>,
}

/// Harness-side proxy for one charge point. Cheap to clone; every clone
/// refers to the same state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.inner.identity)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Session {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                identity: identity.into(),
                state: Mutex::new(SessionState::default()),
                signals: Signals::default(),
                hooks: Mutex::new(Arc::new(NoHooks)),
                link: Mutex::new(None),
                connected: watch::channel(false).0,
            }),
        }
    }

    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    /// Runs `f` under the state lock. Never hold the result across an await
    /// expecting it to stay current.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn snapshot(&self) -> SessionState {
        self.with_state(|s| s.clone())
    }

    pub fn registration(&self) -> RegistrationStatus {
        self.with_state(|s| s.registration)
    }

    /// Status of `connector_id`; unknown connectors read as `Unavailable`.
    pub fn connector_status(&self, connector_id: usize) -> ChargePointStatus {
        self.with_state(|s| s.connector_status(connector_id))
            .unwrap_or(ChargePointStatus::Unavailable)
    }

    /// Sets a known starting condition before waiting for the device to
    /// report a status change. Status otherwise only comes from the device.
    pub fn force_connector_status(&self, connector_id: usize, status: ChargePointStatus) {
        self.with_state(|s| {
            if let Some(c) = s.connectors.get_mut(connector_id) {
                c.status = status;
            }
        });
    }

    pub fn transaction(&self) -> Transaction {
        self.with_state(|s| s.transaction.clone())
    }

    /// Answer for the next BootNotification(s) until replaced.
    pub fn stage_boot(&self, params: BootParameters) {
        self.with_state(|s| s.staged_boot = Some(params));
    }

    pub fn reset_boot(&self) {
        self.with_state(|s| s.staged_boot = None);
    }

    pub fn set_override_keys(&self, keys: Vec<(String, IdTagInfo)>) {
        self.with_state(|s| s.auth.override_keys = keys);
    }

    pub fn clear_override_keys(&self) {
        self.with_state(|s| s.auth.override_keys.clear());
    }

    pub fn signal(&self, action: Action) -> Arc<ActionSignal> {
        self.inner.signals.get(action)
    }

    fn set_hooks(&self, hooks: Arc<dyn InboundHooks>) {
        *self.inner.hooks.lock().unwrap_or_else(PoisonError::into_inner) = hooks;
    }

    pub(crate) fn hooks(&self) -> Arc<dyn InboundHooks> {
        self.inner
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Installs scenario hooks until the returned guard is dropped.
    pub fn install_hooks(&self, hooks: Arc<dyn InboundHooks>) -> HooksGuard {
        self.set_hooks(hooks);
        HooksGuard {
            session: self.clone(),
        }
    }

    pub fn attach(&self, link: Arc<dyn CallTransport>) {
        *self.inner.link.lock().unwrap_or_else(PoisonError::into_inner) = Some(link);
        self.inner.connected.send_replace(true);
        log::info!("{} attached", self.identity());
    }

    /// Drops `link` if it is still the current one. A link replaced by a
    /// reconnect leaves the session attached.
    pub fn detach(&self, link: &Arc<dyn CallTransport>) {
        let mut current = self.inner.link.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, link)) {
            *current = None;
            drop(current);
            self.inner.connected.send_replace(false);
            log::warn!("{} detached", self.identity());
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    fn link(&self) -> Option<Arc<dyn CallTransport>> {
        self.inner
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn wait_connected(&self, timeout: Duration) -> WaitOutcome {
        let mut rx = self.inner.connected.subscribe();
        let connected = tokio::time::timeout(timeout, rx.wait_for(|c| *c))
            .await
            .is_ok_and(|r| r.is_ok());
        if connected {
            WaitOutcome::Observed
        } else {
            WaitOutcome::TimedOut
        }
    }

    /// Resolves once the session has stayed detached for longer than `grace`.
    pub async fn lost(&self, grace: Duration) {
        let mut rx = self.inner.connected.subscribe();
        loop {
            let detached = rx.wait_for(|c| !*c).await.is_ok();
            if !detached {
                return;
            }
            let back = tokio::time::timeout(grace, rx.wait_for(|c| *c))
                .await
                .is_ok_and(|r| r.is_ok());
            if !back {
                return;
            }
        }
    }

    /// Typed outbound call over the current link.
    pub async fn call<R: OcppRequest>(&self, req: R) -> Result<R::Response, OcppError<ProtocolError>> {
        let link = self.link().ok_or(OcppError::Other(GenericError::Offline))?;
        let payload =
            serde_json::to_value(&req).map_err(|_| OcppError::Other(GenericError::General))?;
        log::debug!("{} -> {} {}", self.identity(), R::ACTION, payload);
        let reply = link.send_call(R::ACTION, payload).await.inspect_err(|e| {
            log::warn!("{} {} failed: {}", self.identity(), R::ACTION, e);
        })?;
        serde_json::from_value(reply).map_err(|e| {
            log::error!("{} {} reply not understood: {}", self.identity(), R::ACTION, e);
            OcppError::Other(GenericError::ParsingError)
        })
    }

    /// Closes the current connection. The session stays registered so the
    /// device can reconnect to it.
    pub async fn close_connection(&self, code: u16, reason: &str) -> bool {
        match self.link() {
            Some(link) => {
                link.close(code, reason).await;
                true
            }
            None => false,
        }
    }
}
