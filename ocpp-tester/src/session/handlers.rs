use chrono::Utc;
use rocpp_core::v16::{
    messages::{
        authorize::{AuthorizeRequest, AuthorizeResponse},
        boot_notification::{BootNotificationRequest, BootNotificationResponse},
        diagnostics_status_notification::{
            DiagnosticsStatusNotificationRequest, DiagnosticsStatusNotificationResponse,
        },
        firmware_status_notification::{
            FirmwareStatusNotificationRequest, FirmwareStatusNotificationResponse,
        },
        heart_beat::{HeartbeatRequest, HeartbeatResponse},
        meter_values::{MeterValuesRequest, MeterValuesResponse},
        start_transaction::{StartTransactionRequest, StartTransactionResponse},
        status_notification::{StatusNotificationRequest, StatusNotificationResponse},
        stop_transaction::{StopTransactionRequest, StopTransactionResponse},
    },
    protocol_error::ProtocolError,
    types::Reason,
    Action,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use super::{state::Transaction, Session};

impl Session {
    /// Answers one inbound Call. The error is the CallError code to reply with.
    pub fn handle_call(&self, action: &str, payload: Value) -> Result<Value, ProtocolError> {
        let Ok(action) = action.parse::<Action>() else {
            log::warn!("{} sent unknown action {}", self.identity(), action);
            return Err(ProtocolError::NotImplemented);
        };
        match action {
            Action::BootNotification => self.dispatch(payload, Self::on_boot),
            Action::Heartbeat => self.dispatch(payload, Self::on_heartbeat),
            Action::Authorize => self.dispatch(payload, Self::on_authorize),
            Action::StartTransaction => self.dispatch(payload, Self::on_start_transaction),
            Action::StopTransaction => self.dispatch(payload, Self::on_stop_transaction),
            Action::MeterValues => self.dispatch(payload, Self::on_meter_values),
            Action::StatusNotification => self.dispatch(payload, Self::on_status_notification),
            Action::DiagnosticsStatusNotification => {
                self.dispatch(payload, Self::on_diagnostics_status)
            }
            Action::FirmwareStatusNotification => self.dispatch(payload, Self::on_firmware_status),
            other => {
                log::warn!("{} sent central system action {}", self.identity(), other);
                Err(ProtocolError::NotImplemented)
            }
        }
    }

    fn dispatch<Req: DeserializeOwned, Res: Serialize>(
        &self,
        payload: Value,
        handler: impl FnOnce(&Self, Req) -> Res,
    ) -> Result<Value, ProtocolError> {
        let req = serde_json::from_value(payload).map_err(|e| {
            log::warn!("{} sent malformed payload: {}", self.identity(), e);
            ProtocolError::FormationViolation
        })?;
        serde_json::to_value(handler(self, req)).map_err(|_| ProtocolError::InternalError)
    }

    pub fn on_boot(&self, req: BootNotificationRequest) -> BootNotificationResponse {
        let params = self.with_state(|s| {
            let params = s.staged_boot.clone().unwrap_or_default();
            s.registration = params.status;
            s.boot_count += 1;
            s.vendor = Some(req.charge_point_vendor.clone());
            s.model = Some(req.charge_point_model.clone());
            params
        });
        log::info!(
            "{} boot from {} {}: replying {:?} interval {}",
            self.identity(),
            req.charge_point_vendor,
            req.charge_point_model,
            params.status,
            params.interval
        );
        self.hooks().on_boot(&req);
        self.signal(Action::BootNotification).set();
        BootNotificationResponse {
            current_time: params.current_time.unwrap_or_else(Utc::now),
            interval: params.interval,
            status: params.status,
        }
    }

    pub fn on_heartbeat(&self, _req: HeartbeatRequest) -> HeartbeatResponse {
        log::debug!("{} heartbeat", self.identity());
        self.signal(Action::Heartbeat).set();
        HeartbeatResponse {
            current_time: Utc::now(),
        }
    }

    pub fn on_authorize(&self, req: AuthorizeRequest) -> AuthorizeResponse {
        let info = self.with_state(|s| {
            let info = s.auth.resolve(&req.id_tag);
            s.auth.last_tag = Some(req.id_tag.clone());
            s.auth.last_result = Some(info.clone());
            info
        });
        log::info!("{} authorize {}: {:?}", self.identity(), req.id_tag, info.status);
        self.signal(Action::Authorize).set();
        AuthorizeResponse { id_tag_info: info }
    }

    pub fn on_start_transaction(&self, req: StartTransactionRequest) -> StartTransactionResponse {
        let (info, transaction_id) = self.with_state(|s| {
            let info = s.auth.resolve(&req.id_tag);
            s.auth.last_tag = Some(req.id_tag.clone());
            s.auth.last_result = Some(info.clone());
            let id = s.allocate_transaction_id();
            s.transaction = Transaction {
                id: Some(id),
                connector_id: req.connector_id,
                id_tag: Some(req.id_tag.clone()),
                is_active: true,
                last_stop_reason: s.transaction.last_stop_reason,
                last_stop_tag: s.transaction.last_stop_tag.clone(),
            };
            if req.reservation_id.is_some()
                && s.reservation.as_ref().map(|r| r.id) == req.reservation_id
            {
                s.reservation = None;
            }
            (info, id)
        });
        log::info!(
            "{} start transaction {} on connector {} with {}: {:?}",
            self.identity(),
            transaction_id,
            req.connector_id,
            req.id_tag,
            info.status
        );
        self.signal(Action::StartTransaction).set();
        StartTransactionResponse {
            id_tag_info: info,
            transaction_id,
        }
    }

    pub fn on_stop_transaction(&self, req: StopTransactionRequest) -> StopTransactionResponse {
        let info = self.with_state(|s| {
            let tx = &mut s.transaction;
            tx.is_active = false;
            if tx.id.is_none() {
                tx.id = Some(req.transaction_id);
            }
            tx.last_stop_reason = req.reason.unwrap_or(Reason::Other);
            tx.last_stop_tag = req.id_tag.clone();
            s.charging.end_transaction(req.transaction_id);
            req.id_tag.as_deref().map(|tag| s.auth.resolve(tag))
        });
        log::info!(
            "{} stop transaction {} reason {:?}",
            self.identity(),
            req.transaction_id,
            req.reason.unwrap_or(Reason::Other)
        );
        self.signal(Action::StopTransaction).set();
        StopTransactionResponse { id_tag_info: info }
    }

    pub fn on_meter_values(&self, req: MeterValuesRequest) -> MeterValuesResponse {
        log::debug!(
            "{} meter values on connector {}: {} readings",
            self.identity(),
            req.connector_id,
            req.meter_value.len()
        );
        self.hooks().on_meter_values(&req);
        self.signal(Action::MeterValues).set();
        MeterValuesResponse {}
    }

    pub fn on_status_notification(&self, req: StatusNotificationRequest) -> StatusNotificationResponse {
        let known = self.with_state(|s| match s.connectors.get_mut(req.connector_id) {
            Some(c) => {
                c.status = req.status;
                c.error_code = req.error_code;
                true
            }
            None => false,
        });
        if !known {
            log::error!("{} unexpected connector {}", self.identity(), req.connector_id);
        } else if req.error_code.is_fault() {
            log::error!(
                "{} connector {} status {:?} ({:?}) {:?}",
                self.identity(),
                req.connector_id,
                req.status,
                req.error_code,
                req.info
            );
        } else {
            log::info!(
                "{} connector {} status {:?}",
                self.identity(),
                req.connector_id,
                req.status
            );
        }
        self.hooks().on_status_notification(&req);
        self.signal(Action::StatusNotification).set();
        StatusNotificationResponse {}
    }

    pub fn on_diagnostics_status(
        &self,
        req: DiagnosticsStatusNotificationRequest,
    ) -> DiagnosticsStatusNotificationResponse {
        log::info!("{} diagnostics status {:?}", self.identity(), req.status);
        self.with_state(|s| s.diagnostics_status = Some(req.status));
        self.signal(Action::DiagnosticsStatusNotification).set();
        DiagnosticsStatusNotificationResponse {}
    }

    pub fn on_firmware_status(
        &self,
        req: FirmwareStatusNotificationRequest,
    ) -> FirmwareStatusNotificationResponse {
        log::info!("{} firmware status {:?}", self.identity(), req.status);
        self.with_state(|s| s.firmware_status = Some(req.status));
        self.signal(Action::FirmwareStatusNotification).set();
        FirmwareStatusNotificationResponse {}
    }
}
