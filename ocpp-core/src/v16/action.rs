use core::{fmt, str::FromStr};

use serde::{de::DeserializeOwned, Serialize};

use super::messages::{
    authorize::{AuthorizeRequest, AuthorizeResponse},
    boot_notification::{BootNotificationRequest, BootNotificationResponse},
    cancel_reservation::{CancelReservationRequest, CancelReservationResponse},
    change_availability::{ChangeAvailabilityRequest, ChangeAvailabilityResponse},
    change_configuration::{ChangeConfigurationRequest, ChangeConfigurationResponse},
    clear_charging_profile::{ClearChargingProfileRequest, ClearChargingProfileResponse},
    diagnostics_status_notification::{
        DiagnosticsStatusNotificationRequest, DiagnosticsStatusNotificationResponse,
    },
    firmware_status_notification::{
        FirmwareStatusNotificationRequest, FirmwareStatusNotificationResponse,
    },
    get_configuration::{GetConfigurationRequest, GetConfigurationResponse},
    get_local_list_version::{GetLocalListVersionRequest, GetLocalListVersionResponse},
    heart_beat::{HeartbeatRequest, HeartbeatResponse},
    meter_values::{MeterValuesRequest, MeterValuesResponse},
    remote_start_transaction::{RemoteStartTransactionRequest, RemoteStartTransactionResponse},
    remote_stop_transaction::{RemoteStopTransactionRequest, RemoteStopTransactionResponse},
    reserve_now::{ReserveNowRequest, ReserveNowResponse},
    reset::{ResetRequest, ResetResponse},
    send_local_list::{SendLocalListRequest, SendLocalListResponse},
    set_charging_profile::{SetChargingProfileRequest, SetChargingProfileResponse},
    start_transaction::{StartTransactionRequest, StartTransactionResponse},
    status_notification::{StatusNotificationRequest, StatusNotificationResponse},
    stop_transaction::{StopTransactionRequest, StopTransactionResponse},
    trigger_message::{TriggerMessageRequest, TriggerMessageResponse},
    unlock_connector::{UnlockConnectorRequest, UnlockConnectorResponse},
};

/// Every OCPP 1.6 action exchanged between a charge point and the central system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    Authorize,
    BootNotification,
    CancelReservation,
    ChangeAvailability,
    ChangeConfiguration,
    ClearChargingProfile,
    DiagnosticsStatusNotification,
    FirmwareStatusNotification,
    GetConfiguration,
    GetLocalListVersion,
    Heartbeat,
    MeterValues,
    RemoteStartTransaction,
    RemoteStopTransaction,
    ReserveNow,
    Reset,
    SendLocalList,
    SetChargingProfile,
    StartTransaction,
    StatusNotification,
    StopTransaction,
    TriggerMessage,
    UnlockConnector,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Authorize => "Authorize",
            Action::BootNotification => "BootNotification",
            Action::CancelReservation => "CancelReservation",
            Action::ChangeAvailability => "ChangeAvailability",
            Action::ChangeConfiguration => "ChangeConfiguration",
            Action::ClearChargingProfile => "ClearChargingProfile",
            Action::DiagnosticsStatusNotification => "DiagnosticsStatusNotification",
            Action::FirmwareStatusNotification => "FirmwareStatusNotification",
            Action::GetConfiguration => "GetConfiguration",
            Action::GetLocalListVersion => "GetLocalListVersion",
            Action::Heartbeat => "Heartbeat",
            Action::MeterValues => "MeterValues",
            Action::RemoteStartTransaction => "RemoteStartTransaction",
            Action::RemoteStopTransaction => "RemoteStopTransaction",
            Action::ReserveNow => "ReserveNow",
            Action::Reset => "Reset",
            Action::SendLocalList => "SendLocalList",
            Action::SetChargingProfile => "SetChargingProfile",
            Action::StartTransaction => "StartTransaction",
            Action::StatusNotification => "StatusNotification",
            Action::StopTransaction => "StopTransaction",
            Action::TriggerMessage => "TriggerMessage",
            Action::UnlockConnector => "UnlockConnector",
        }
    }

    /// Actions a charge point initiates.
    pub fn is_charge_point_initiated(&self) -> bool {
        matches!(
            self,
            Action::Authorize
                | Action::BootNotification
                | Action::DiagnosticsStatusNotification
                | Action::FirmwareStatusNotification
                | Action::Heartbeat
                | Action::MeterValues
                | Action::StartTransaction
                | Action::StatusNotification
                | Action::StopTransaction
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unknown action {0}")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let action = match s {
            "Authorize" => Action::Authorize,
            "BootNotification" => Action::BootNotification,
            "CancelReservation" => Action::CancelReservation,
            "ChangeAvailability" => Action::ChangeAvailability,
            "ChangeConfiguration" => Action::ChangeConfiguration,
            "ClearChargingProfile" => Action::ClearChargingProfile,
            "DiagnosticsStatusNotification" => Action::DiagnosticsStatusNotification,
            "FirmwareStatusNotification" => Action::FirmwareStatusNotification,
            "GetConfiguration" => Action::GetConfiguration,
            "GetLocalListVersion" => Action::GetLocalListVersion,
            "Heartbeat" => Action::Heartbeat,
            "MeterValues" => Action::MeterValues,
            "RemoteStartTransaction" => Action::RemoteStartTransaction,
            "RemoteStopTransaction" => Action::RemoteStopTransaction,
            "ReserveNow" => Action::ReserveNow,
            "Reset" => Action::Reset,
            "SendLocalList" => Action::SendLocalList,
            "SetChargingProfile" => Action::SetChargingProfile,
            "StartTransaction" => Action::StartTransaction,
            "StatusNotification" => Action::StatusNotification,
            "StopTransaction" => Action::StopTransaction,
            "TriggerMessage" => Action::TriggerMessage,
            "UnlockConnector" => Action::UnlockConnector,
            other => return Err(UnknownAction(other.to_string())),
        };
        Ok(action)
    }
}

/// Binds a request payload to its action name and response payload.
pub trait OcppRequest: Serialize + DeserializeOwned + Send {
    type Response: Serialize + DeserializeOwned + Send;
    const ACTION: Action;
}

macro_rules! bind {
    ($($action:ident => $req:ty, $res:ty;)*) => {
        $(
            impl OcppRequest for $req {
                type Response = $res;
                const ACTION: Action = Action::$action;
            }
        )*
    };
}

bind! {
    Authorize => AuthorizeRequest, AuthorizeResponse;
    BootNotification => BootNotificationRequest, BootNotificationResponse;
    CancelReservation => CancelReservationRequest, CancelReservationResponse;
    ChangeAvailability => ChangeAvailabilityRequest, ChangeAvailabilityResponse;
    ChangeConfiguration => ChangeConfigurationRequest, ChangeConfigurationResponse;
    ClearChargingProfile => ClearChargingProfileRequest, ClearChargingProfileResponse;
    DiagnosticsStatusNotification => DiagnosticsStatusNotificationRequest, DiagnosticsStatusNotificationResponse;
    FirmwareStatusNotification => FirmwareStatusNotificationRequest, FirmwareStatusNotificationResponse;
    GetConfiguration => GetConfigurationRequest, GetConfigurationResponse;
    GetLocalListVersion => GetLocalListVersionRequest, GetLocalListVersionResponse;
    Heartbeat => HeartbeatRequest, HeartbeatResponse;
    MeterValues => MeterValuesRequest, MeterValuesResponse;
    RemoteStartTransaction => RemoteStartTransactionRequest, RemoteStartTransactionResponse;
    RemoteStopTransaction => RemoteStopTransactionRequest, RemoteStopTransactionResponse;
    ReserveNow => ReserveNowRequest, ReserveNowResponse;
    Reset => ResetRequest, ResetResponse;
    SendLocalList => SendLocalListRequest, SendLocalListResponse;
    SetChargingProfile => SetChargingProfileRequest, SetChargingProfileResponse;
    StartTransaction => StartTransactionRequest, StartTransactionResponse;
    StatusNotification => StatusNotificationRequest, StatusNotificationResponse;
    StopTransaction => StopTransactionRequest, StopTransactionResponse;
    TriggerMessage => TriggerMessageRequest, TriggerMessageResponse;
    UnlockConnector => UnlockConnectorRequest, UnlockConnectorResponse;
}
