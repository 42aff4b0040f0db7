use chrono::{DateTime, Utc};
use rocpp_core::v16::types::{
    ChargePointErrorCode, ChargePointStatus, DiagnosticsStatus, FirmwareStatus, Reason,
    RegistrationStatus,
};

use super::{auth::AuthorizationState, charging::ChargingProfiles, local_list::LocalList};

pub const CONNECTOR_COUNT: usize = 2;

/// What the next BootNotification is answered with.
#[derive(Debug, Clone, PartialEq)]
pub struct BootParameters {
    pub status: RegistrationStatus,
    pub interval: u64,
    /// Fixed `currentTime`; the wall clock when absent.
    pub current_time: Option<DateTime<Utc>>,
}

impl Default for BootParameters {
    fn default() -> Self {
        Self {
            status: RegistrationStatus::Accepted,
            interval: 15,
            current_time: None,
        }
    }
}

impl BootParameters {
    pub fn new(status: RegistrationStatus, interval: u64) -> Self {
        Self {
            status,
            interval,
            current_time: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: Option<i32>,
    pub connector_id: usize,
    pub id_tag: Option<String>,
    pub is_active: bool,
    pub last_stop_reason: Reason,
    pub last_stop_tag: Option<String>,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            id: None,
            connector_id: 0,
            id_tag: None,
            is_active: false,
            last_stop_reason: Reason::Other,
            last_stop_tag: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub id: i32,
    pub connector_id: usize,
    pub expiry: DateTime<Utc>,
    pub id_tag: String,
}

impl Reservation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectorState {
    pub status: ChargePointStatus,
    pub error_code: ChargePointErrorCode,
}

impl Default for ConnectorState {
    fn default() -> Self {
        Self {
            status: ChargePointStatus::Unavailable,
            error_code: ChargePointErrorCode::NoError,
        }
    }
}

/// Everything the harness knows about one charge point.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub registration: RegistrationStatus,
    pub connectors: [ConnectorState; CONNECTOR_COUNT],
    pub staged_boot: Option<BootParameters>,
    pub boot_count: u64,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub transaction: Transaction,
    pub(crate) next_transaction_id: i32,
    pub auth: AuthorizationState,
    pub diagnostics_status: Option<DiagnosticsStatus>,
    pub firmware_status: Option<FirmwareStatus>,
    pub local_list: LocalList,
    pub reservation: Option<Reservation>,
    pub charging: ChargingProfiles,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            registration: RegistrationStatus::Rejected,
            connectors: Default::default(),
            staged_boot: None,
            boot_count: 0,
            vendor: None,
            model: None,
            transaction: Transaction::default(),
            next_transaction_id: 1,
            auth: AuthorizationState::default(),
            diagnostics_status: None,
            firmware_status: None,
            local_list: LocalList::default(),
            reservation: None,
            charging: ChargingProfiles::default(),
        }
    }
}

impl SessionState {
    pub fn connector_status(&self, connector_id: usize) -> Option<ChargePointStatus> {
        self.connectors.get(connector_id).map(|c| c.status)
    }

    pub fn active_transaction_id(&self) -> Option<i32> {
        if self.transaction.is_active {
            self.transaction.id
        } else {
            None
        }
    }

    /// The reservation still in force at `now`. Expired ones are dropped.
    pub fn live_reservation(&mut self, now: DateTime<Utc>) -> Option<&Reservation> {
        if self.reservation.as_ref().is_some_and(|r| r.is_expired(now)) {
            self.reservation = None;
        }
        self.reservation.as_ref()
    }

    pub(crate) fn allocate_transaction_id(&mut self) -> i32 {
        let id = self.next_transaction_id;
        self.next_transaction_id += 1;
        id
    }
}
