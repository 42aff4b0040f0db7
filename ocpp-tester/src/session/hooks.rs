use std::sync::Arc;

use rocpp_core::v16::messages::{
    boot_notification::BootNotificationRequest, meter_values::MeterValuesRequest,
    status_notification::StatusNotificationRequest,
};

use super::Session;

/// Scenario-specific observers of inbound messages. They run after the
/// session has applied its own state update and cannot change the reply.
pub trait InboundHooks: Send + Sync {
    fn on_boot(&self, _req: &BootNotificationRequest) {}
    fn on_meter_values(&self, _req: &MeterValuesRequest) {}
    fn on_status_notification(&self, _req: &StatusNotificationRequest) {}
}

#[derive(Debug, Default)]
pub struct NoHooks;

impl InboundHooks for NoHooks {}

/// Restores the default hooks when dropped.
#[must_use = "hooks are removed when the guard is dropped"]
pub struct HooksGuard {
    pub(super) session: Session,
}

impl Drop for HooksGuard {
    fn drop(&mut self) {
        self.session.set_hooks(Arc::new(NoHooks));
    }
}
