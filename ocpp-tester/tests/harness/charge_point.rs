//! A simulated charge point behind the session's call seam. It answers
//! central system calls like a compliant device and pushes its own messages
//! straight into the session handlers.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use rocpp_core::{
    format::error::{GenericError, OcppError},
    v16::{
        messages::{
            authorize::AuthorizeRequest,
            boot_notification::BootNotificationRequest,
            diagnostics_status_notification::DiagnosticsStatusNotificationRequest,
            firmware_status_notification::FirmwareStatusNotificationRequest,
            heart_beat::HeartbeatRequest,
            cancel_reservation::{CancelReservationRequest, CancelReservationResponse},
            change_configuration::{ChangeConfigurationRequest, ChangeConfigurationResponse},
            clear_charging_profile::ClearChargingProfileResponse,
            get_configuration::{GetConfigurationRequest, GetConfigurationResponse},
            get_local_list_version::GetLocalListVersionResponse,
            meter_values::MeterValuesRequest,
            remote_start_transaction::{
                RemoteStartTransactionRequest, RemoteStartTransactionResponse,
            },
            remote_stop_transaction::{RemoteStopTransactionRequest, RemoteStopTransactionResponse},
            reserve_now::{ReserveNowRequest, ReserveNowResponse},
            reset::{ResetRequest, ResetResponse},
            send_local_list::{SendLocalListRequest, SendLocalListResponse},
            set_charging_profile::{SetChargingProfileRequest, SetChargingProfileResponse},
            start_transaction::StartTransactionRequest,
            status_notification::StatusNotificationRequest,
            stop_transaction::StopTransactionRequest,
            trigger_message::{TriggerMessageRequest, TriggerMessageResponse},
        },
        protocol_error::ProtocolError,
        types::{
            AuthorizationStatus, CancelReservationStatus, ChargePointErrorCode, ChargePointStatus,
            ChargingProfilePurposeType, ChargingProfileStatus, ClearChargingProfileStatus,
            ConfigurationStatus, DiagnosticsStatus, FirmwareStatus, KeyValue, Measurand,
            MessageTrigger, MeterValue, Phase, Reason, RegistrationStatus, RemoteStartStopStatus,
            ReservationStatus, ResetStatus, ResetType, SampledValue, TriggerMessageStatus,
            UnitOfMeasure, UpdateType,
        },
        Action, OcppRequest,
    },
};
use rocpp_tester::{
    session::{charging, local_list::LocalList, Session},
    transport::{CallError, CallTransport},
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::time::Instant;

pub const CONNECTOR: usize = 1;

/// Delay before the device acts on an accepted request.
const STEP: Duration = Duration::from_millis(500);

/// Boot retry when a rejection carries no interval.
const REJECTED_RETRY: Duration = Duration::from_secs(60);

/// How long a call goes unanswered while the device is rejected.
const SILENT_CALL: Duration = Duration::from_secs(30);

/// Time from a closed connection to the next one.
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

const FACTORY_CONFIG: &[(&str, &str)] = &[
    ("AuthorizationCacheEnabled", "true"),
    ("AuthorizationRequired", "true"),
    ("AuthorizeRemoteTxRequests", "false"),
    ("ClockAlignedDataInterval", "900"),
    ("ConnectionTimeOut", "30"),
    ("HeartbeatInterval", "300"),
    ("LocalAuthListEnabled", "false"),
    ("LocalPreAuthorize", "false"),
    ("MeterValueSampleInterval", "60"),
    ("MeterValuesAlignedData", "Energy.Active.Import.Register"),
    ("MeterValuesSampledData", "Energy.Active.Import.Register"),
    ("MinimumStatusDuration", "0"),
    ("ConnectorPhaseRotation", "0.RST,1.RST"),
];

const ALIGNED_INTERVAL: &str = "ClockAlignedDataInterval";
const SAMPLE_INTERVAL: &str = "MeterValueSampleInterval";
const ALIGNED_DATA: &str = "MeterValuesAlignedData";
const SAMPLED_DATA: &str = "MeterValuesSampledData";

const METERED: [Measurand; 7] = [
    Measurand::CurrentImport,
    Measurand::CurrentOffered,
    Measurand::EnergyActiveImportRegister,
    Measurand::EnergyActiveImportInterval,
    Measurand::PowerActiveImport,
    Measurand::Temperature,
    Measurand::Voltage,
];

/// Measurands the meter can report per phase.
const PER_PHASE: [Measurand; 3] = [
    Measurand::CurrentImport,
    Measurand::Temperature,
    Measurand::Voltage,
];

const LINES: [Phase; 3] = [Phase::L1, Phase::L2, Phase::L3];

/// One item of a measurand list, optionally pinned to a line.
fn parse_measurand(item: &str) -> Option<(Measurand, Option<Phase>)> {
    let by_name = |name: &str| Measurand::ALL.into_iter().find(|m| m.as_str() == name);
    if let Some(measurand) = by_name(item) {
        return METERED.contains(&measurand).then_some((measurand, None));
    }
    let (name, line) = item.rsplit_once('.')?;
    let phase = LINES.into_iter().find(|p| p.as_str() == line)?;
    let measurand = by_name(name).filter(|m| PER_PHASE.contains(m))?;
    Some((measurand, Some(phase)))
}

/// Ways the device departs from compliant behaviour.
#[derive(Debug, Default)]
pub struct Quirks {
    /// Abandons a remote start after this long instead of ConnectionTimeOut.
    pub give_up_after: Option<Duration>,
    /// Retries a pending boot after this long instead of the interval given.
    pub pending_retry: Option<Duration>,
    /// Accepts a boot trigger even when already registered.
    pub boots_on_trigger: bool,
    /// Never comes back after the central system closes the connection.
    pub stays_offline: bool,
    /// Added to every metering period.
    pub meter_lag: Duration,
}

#[derive(Debug)]
pub struct DeviceState {
    pub config: BTreeMap<String, String>,
    /// Keys whose change is refused.
    pub locked: Vec<String>,
    pub status: ChargePointStatus,
    pub car_connected: bool,
    pub local_list: LocalList,
    pub reservation: Option<(i32, String)>,
    pub transaction: Option<i32>,
    /// Every call received, in order.
    pub received: Vec<Action>,
    /// Also orders boot retries: only the latest boot may schedule one.
    pub boots: u32,
    pub registration: Option<RegistrationStatus>,
    /// Remote starts given up for want of a car.
    pub abandoned_starts: u32,
    pub closed_with: Vec<u16>,
    /// Generation of the running timer per interval key.
    pub meter_timers: BTreeMap<String, u32>,
    pub offered: f32,
    pub quirks: Quirks,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            config: FACTORY_CONFIG
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
            locked: Vec::new(),
            status: ChargePointStatus::Unavailable,
            car_connected: false,
            local_list: LocalList::default(),
            reservation: None,
            transaction: None,
            received: Vec::new(),
            boots: 0,
            registration: None,
            abandoned_starts: 0,
            closed_with: Vec::new(),
            meter_timers: BTreeMap::new(),
            offered: 32.0,
            quirks: Quirks::default(),
        }
    }
}

#[derive(Clone)]
pub struct SimChargePoint {
    session: Session,
    state: Arc<Mutex<DeviceState>>,
    link: Arc<Mutex<Option<Weak<dyn CallTransport>>>>,
    /// Wall clock at power on, paired with the runtime clock.
    origin: (DateTime<Utc>, Instant),
}

impl SimChargePoint {
    /// Connects a factory-fresh device to `session` without booting it.
    pub fn attach(session: &Session) -> Self {
        let sim = Self {
            session: session.clone(),
            state: Arc::new(Mutex::new(DeviceState::default())),
            link: Arc::new(Mutex::new(None)),
            origin: (Utc::now(), Instant::now()),
        };
        sim.plug();
        sim
    }

    fn plug(&self) {
        let link: Arc<dyn CallTransport> = Arc::new(self.clone());
        *self.link.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::downgrade(&link));
        self.session.attach(link);
    }

    fn unplug(&self) {
        let link = self
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .and_then(|weak| weak.upgrade());
        if let Some(link) = link {
            self.session.detach(&link);
        }
    }

    async fn reconnect(self) {
        if self.state().quirks.stays_offline {
            return;
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
        self.plug();
        self.boot();
    }

    /// Attaches and boots.
    pub fn connect(session: &Session) -> Self {
        let sim = Self::attach(session);
        sim.boot();
        sim
    }

    pub fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn received(&self, action: Action) -> usize {
        self.state().received.iter().filter(|a| **a == action).count()
    }

    /// Device time. Follows the runtime clock so paused tests see it advance.
    pub fn now(&self) -> DateTime<Utc> {
        let (wall, start) = self.origin;
        wall + TimeDelta::from_std(start.elapsed()).unwrap_or_default()
    }

    pub fn setting(&self, key: &str) -> Option<String> {
        self.state().config.get(key).cloned()
    }

    fn enabled(&self, key: &str) -> bool {
        self.setting(key).as_deref() == Some("true")
    }

    /// Sends one device message through the session handlers.
    pub fn send<R: OcppRequest>(&self, req: R) -> Option<R::Response> {
        let payload = serde_json::to_value(&req).ok()?;
        let reply = self.session.handle_call(R::ACTION.as_str(), payload).ok()?;
        serde_json::from_value(reply).ok()
    }

    pub fn notify(&self, connector_id: usize, status: ChargePointStatus) {
        if connector_id == CONNECTOR {
            self.state().status = status;
        }
        self.send(StatusNotificationRequest {
            connector_id,
            error_code: ChargePointErrorCode::NoError,
            info: None,
            status,
            timestamp: Some(Utc::now()),
            vendor_id: None,
            vendor_error_code: None,
        });
    }

    fn idle_status(&self) -> ChargePointStatus {
        let s = self.state();
        if s.reservation.is_some() {
            ChargePointStatus::Reserved
        } else if s.car_connected {
            ChargePointStatus::Preparing
        } else {
            ChargePointStatus::Available
        }
    }

    /// Sends a BootNotification and acts on the registration it gets back.
    /// Pending and Rejected schedule a retry and report no status.
    pub fn boot(&self) -> Option<RegistrationStatus> {
        let epoch = {
            let mut s = self.state();
            s.boots += 1;
            s.boots
        };
        let res = self.send(BootNotificationRequest {
            charge_box_serial_number: None,
            charge_point_model: "SIM-1".into(),
            charge_point_serial_number: None,
            charge_point_vendor: "Simulated".into(),
            firmware_version: Some("0.1.0".into()),
            iccid: None,
            imsi: None,
            meter_serial_number: None,
            meter_type: None,
        })?;
        self.state().registration = Some(res.status);
        let retry = match res.status {
            RegistrationStatus::Accepted => {
                self.notify(0, ChargePointStatus::Available);
                let status = self.idle_status();
                self.notify(CONNECTOR, status);
                return Some(res.status);
            }
            RegistrationStatus::Pending => self.state().quirks.pending_retry,
            RegistrationStatus::Rejected => None,
        };
        let retry = retry.unwrap_or(match res.interval {
            0 => REJECTED_RETRY,
            secs => Duration::from_secs(secs),
        });
        let sim = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(retry).await;
            if sim.state().boots == epoch {
                sim.boot();
            }
        });
        Some(res.status)
    }

    pub fn plug_in(&self) {
        let was_available = {
            let mut s = self.state();
            s.car_connected = true;
            s.status == ChargePointStatus::Available
        };
        if was_available {
            self.notify(CONNECTOR, ChargePointStatus::Preparing);
        }
    }

    pub fn lock_key(&self, key: &str) {
        self.state().locked.push(key.to_owned());
    }

    /// Starts charging for `id_tag` on the connector under test.
    pub fn start_transaction(&self, id_tag: &str) -> Option<i32> {
        let res = self.send(StartTransactionRequest {
            connector_id: CONNECTOR,
            id_tag: id_tag.to_owned(),
            meter_start: 0,
            reservation_id: None,
            timestamp: Utc::now(),
        })?;
        {
            let mut s = self.state();
            s.transaction = Some(res.transaction_id);
            s.reservation = None;
        }
        self.notify(CONNECTOR, ChargePointStatus::Charging);
        Some(res.transaction_id)
    }

    pub fn stop_transaction(&self, reason: Reason) {
        let Some(transaction_id) = self.state().transaction.take() else {
            return;
        };
        self.send(StopTransactionRequest {
            id_tag: None,
            meter_stop: 0,
            timestamp: Utc::now(),
            transaction_id,
            reason: Some(reason),
            transaction_data: None,
        });
        let status = if self.state().car_connected {
            ChargePointStatus::Finishing
        } else {
            ChargePointStatus::Available
        };
        self.notify(CONNECTOR, status);
    }

    fn authorize(&self, id_tag: &str) -> bool {
        self.send(AuthorizeRequest {
            id_tag: id_tag.to_owned(),
        })
        .is_some_and(|res| {
            res.id_tag_info.status == AuthorizationStatus::Accepted
                && res.id_tag_info.expiry_date.map_or(true, |until| until > Utc::now())
        })
    }

    fn locally_accepted(&self, id_tag: &str) -> bool {
        let s = self.state();
        s.config.get("LocalAuthListEnabled").is_some_and(|v| v == "true")
            && s.local_list
                .get(id_tag)
                .is_some_and(|info| info.status == AuthorizationStatus::Accepted)
    }

    fn release_reservation(&self, reservation_id: i32) -> bool {
        let mut s = self.state();
        if s.reservation.as_ref().is_some_and(|(id, _)| *id == reservation_id) {
            s.reservation = None;
            true
        } else {
            false
        }
    }

    async fn remote_start(self, id_tag: String) {
        tokio::time::sleep(STEP).await;
        let needs_authorize =
            self.enabled("AuthorizeRemoteTxRequests") && !self.locally_accepted(&id_tag);
        if needs_authorize && !self.authorize(&id_tag) {
            return;
        }
        let reserved_for = self.state().reservation.as_ref().map(|(_, tag)| tag.clone());
        match reserved_for {
            Some(tag) if tag != id_tag => return,
            Some(_) => self.state().reservation = None,
            None => {}
        }
        if self.state().car_connected {
            self.start_transaction(&id_tag);
            return;
        }

        self.notify(CONNECTOR, ChargePointStatus::Preparing);
        let timeout = self.state().quirks.give_up_after.unwrap_or_else(|| {
            let secs = self
                .setting("ConnectionTimeOut")
                .and_then(|v| v.parse().ok())
                .unwrap_or(30);
            Duration::from_secs(secs)
        });
        tokio::time::sleep(timeout).await;
        let abandoned = {
            let mut s = self.state();
            let abandoned = !s.car_connected
                && s.transaction.is_none()
                && s.status == ChargePointStatus::Preparing;
            if abandoned {
                s.abandoned_starts += 1;
            }
            abandoned
        };
        if abandoned {
            let status = self.idle_status();
            self.notify(CONNECTOR, status);
        }
    }

    async fn hold_reservation(self, reservation_id: i32, ttl: Duration) {
        tokio::time::sleep(STEP).await;
        let held = self
            .state()
            .reservation
            .as_ref()
            .is_some_and(|(id, _)| *id == reservation_id);
        if held {
            self.notify(CONNECTOR, ChargePointStatus::Reserved);
        }
        tokio::time::sleep(ttl.saturating_sub(STEP)).await;
        if self.release_reservation(reservation_id) {
            let status = self.idle_status();
            self.notify(CONNECTOR, status);
        }
    }

    /// Reports the current the new limit allows, then suspends or resumes.
    async fn offer(self, limit: f32) {
        tokio::time::sleep(STEP).await;
        let transaction_id = self.state().transaction;
        let offered = charging::expected_offered_current(limit);
        self.state().offered = offered;
        self.send(MeterValuesRequest {
            connector_id: CONNECTOR,
            transaction_id,
            meter_value: vec![MeterValue {
                timestamp: Utc::now(),
                sampled_value: vec![SampledValue {
                    value: format!("{offered:.1}"),
                    context: None,
                    format: None,
                    measurand: Some(Measurand::CurrentOffered),
                    phase: None,
                    location: None,
                    unit: Some(UnitOfMeasure::A),
                }],
            }],
        });
        let status = self.state().status;
        if charging::suspends_charging(limit) {
            if status == ChargePointStatus::Charging {
                self.notify(CONNECTOR, ChargePointStatus::SuspendedEVSE);
            }
        } else if status == ChargePointStatus::SuspendedEVSE {
            self.notify(CONNECTOR, ChargePointStatus::Charging);
        }
    }

    fn change_setting(&self, key: &str, value: String) -> ConfigurationStatus {
        let measurands = key == ALIGNED_DATA || key == SAMPLED_DATA;
        if measurands && !value.split(',').all(|item| parse_measurand(item).is_some()) {
            return ConfigurationStatus::Rejected;
        }
        let generation = {
            let mut s = self.state();
            if s.locked.iter().any(|k| k == key) {
                return ConfigurationStatus::Rejected;
            }
            let Some(current) = s.config.get_mut(key) else {
                return ConfigurationStatus::NotSupported;
            };
            current.clone_from(&value);
            if key != ALIGNED_INTERVAL && key != SAMPLE_INTERVAL {
                return ConfigurationStatus::Accepted;
            }
            let generation = s.meter_timers.entry(key.to_owned()).or_default();
            *generation += 1;
            *generation
        };
        match value.parse::<u64>() {
            Ok(0) | Err(_) => {}
            Ok(secs) => {
                let aligned = key == ALIGNED_INTERVAL;
                let period = Duration::from_secs(secs) + self.state().quirks.meter_lag;
                tokio::spawn(self.clone().meter_every(aligned, generation, period));
            }
        }
        ConfigurationStatus::Accepted
    }

    /// Reports meter values every `period` until the interval changes.
    async fn meter_every(self, aligned: bool, generation: u32, period: Duration) {
        let key = if aligned { ALIGNED_INTERVAL } else { SAMPLE_INTERVAL };
        loop {
            tokio::time::sleep(period).await;
            if self.state().meter_timers.get(key) != Some(&generation) {
                return;
            }
            let transaction_id = self.state().transaction;
            if aligned {
                for connector_id in [0, CONNECTOR] {
                    self.send_readings(connector_id, ALIGNED_DATA, None);
                }
            } else if transaction_id.is_some() {
                self.send_readings(CONNECTOR, SAMPLED_DATA, transaction_id);
            }
        }
    }

    /// Samples the measurands listed under `data_key`. Unpinned current is
    /// reported per line and connector 0 has no temperature sensor.
    fn readings(&self, connector_id: usize, data_key: &str) -> Vec<SampledValue> {
        let (listed, offered) = {
            let s = self.state();
            (s.config.get(data_key).cloned().unwrap_or_default(), s.offered)
        };
        let mut readings = Vec::new();
        for (measurand, phase) in listed.split(',').filter_map(parse_measurand) {
            if connector_id == 0 && measurand == Measurand::Temperature {
                continue;
            }
            let value = match measurand {
                Measurand::CurrentOffered => format!("{offered:.1}"),
                _ => "1.0".to_owned(),
            };
            let phases = match phase {
                Some(p) => vec![Some(p)],
                None if measurand == Measurand::CurrentImport => LINES.map(Some).to_vec(),
                None => vec![None],
            };
            readings.extend(phases.into_iter().map(|phase| SampledValue {
                value: value.clone(),
                context: None,
                format: None,
                measurand: Some(measurand),
                phase,
                location: None,
                unit: None,
            }));
        }
        readings
    }

    fn send_readings(&self, connector_id: usize, data_key: &str, transaction_id: Option<i32>) {
        let sampled_value = self.readings(connector_id, data_key);
        if sampled_value.is_empty() {
            return;
        }
        self.send(MeterValuesRequest {
            connector_id,
            transaction_id,
            meter_value: vec![MeterValue {
                timestamp: self.now(),
                sampled_value,
            }],
        });
    }

    /// Sends what a TriggerMessage asked for.
    fn send_triggered(&self, message: MessageTrigger) {
        match message {
            MessageTrigger::BootNotification => {
                self.boot();
            }
            MessageTrigger::DiagnosticsStatusNotification => {
                self.send(DiagnosticsStatusNotificationRequest {
                    status: DiagnosticsStatus::Idle,
                });
            }
            MessageTrigger::FirmwareStatusNotification => {
                self.send(FirmwareStatusNotificationRequest {
                    status: FirmwareStatus::Idle,
                });
            }
            MessageTrigger::Heartbeat => {
                self.send(HeartbeatRequest {});
            }
            MessageTrigger::MeterValues => {
                let transaction_id = self.state().transaction;
                self.send_readings(CONNECTOR, ALIGNED_DATA, transaction_id);
            }
            MessageTrigger::StatusNotification => {
                let status = self.state().status;
                self.notify(CONNECTOR, status);
            }
        }
    }

    fn after_step(&self, act: impl FnOnce(&SimChargePoint) + Send + 'static) {
        let sim = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(STEP).await;
            act(&sim);
        });
    }

    fn answer(&self, action: Action, payload: Value) -> Result<Value, CallError> {
        self.state().received.push(action);
        match action {
            Action::GetConfiguration => {
                let req: GetConfigurationRequest = parse(payload)?;
                let s = self.state();
                let (known, unknown): (Vec<String>, Vec<String>) = match req.key {
                    Some(keys) => keys.into_iter().partition(|k| s.config.contains_key(k)),
                    None => (s.config.keys().cloned().collect(), Vec::new()),
                };
                let configuration_key = known
                    .into_iter()
                    .map(|key| KeyValue {
                        value: s.config.get(&key).cloned(),
                        readonly: false,
                        key,
                    })
                    .collect();
                reply(GetConfigurationResponse {
                    configuration_key: Some(configuration_key),
                    unknown_key: (!unknown.is_empty()).then_some(unknown),
                })
            }
            Action::ChangeConfiguration => {
                let req: ChangeConfigurationRequest = parse(payload)?;
                let status = self.change_setting(&req.key, req.value);
                reply(ChangeConfigurationResponse { status })
            }
            Action::RemoteStartTransaction => {
                let req: RemoteStartTransactionRequest = parse(payload)?;
                let (busy, reserved_for_other) = {
                    let s = self.state();
                    (
                        s.transaction.is_some(),
                        s.reservation.as_ref().is_some_and(|(_, tag)| *tag != req.id_tag),
                    )
                };
                let refused =
                    busy || (reserved_for_other && !self.enabled("AuthorizeRemoteTxRequests"));
                let status = if refused {
                    RemoteStartStopStatus::Rejected
                } else {
                    tokio::spawn(self.clone().remote_start(req.id_tag));
                    RemoteStartStopStatus::Accepted
                };
                reply(RemoteStartTransactionResponse { status })
            }
            Action::RemoteStopTransaction => {
                let req: RemoteStopTransactionRequest = parse(payload)?;
                let running = self.state().transaction == Some(req.transaction_id);
                let status = if running {
                    self.after_step(|sim| sim.stop_transaction(Reason::Remote));
                    RemoteStartStopStatus::Accepted
                } else {
                    RemoteStartStopStatus::Rejected
                };
                reply(RemoteStopTransactionResponse { status })
            }
            Action::GetLocalListVersion => {
                let list_version = self.state().local_list.version();
                reply(GetLocalListVersionResponse { list_version })
            }
            Action::SendLocalList => {
                let req: SendLocalListRequest = parse(payload)?;
                let list = req.local_authorization_list.as_deref();
                let mut s = self.state();
                let status = match req.update_type {
                    UpdateType::Full => s.local_list.apply_full(req.list_version, list),
                    UpdateType::Differential => s
                        .local_list
                        .apply_differential(req.list_version, list.unwrap_or_default()),
                };
                reply(SendLocalListResponse { status })
            }
            Action::ReserveNow => {
                let req: ReserveNowRequest = parse(payload)?;
                let accepted = {
                    let mut s = self.state();
                    let free = s.status == ChargePointStatus::Available && s.reservation.is_none();
                    if free {
                        s.reservation = Some((req.reservation_id, req.id_tag.clone()));
                    }
                    free
                };
                let status = if accepted {
                    let ttl = (req.expiry_date - Utc::now()).to_std().unwrap_or_default();
                    tokio::spawn(self.clone().hold_reservation(req.reservation_id, ttl));
                    ReservationStatus::Accepted
                } else {
                    ReservationStatus::Occupied
                };
                reply(ReserveNowResponse { status })
            }
            Action::CancelReservation => {
                let req: CancelReservationRequest = parse(payload)?;
                let status = if self.release_reservation(req.reservation_id) {
                    self.after_step(|sim| {
                        let status = sim.idle_status();
                        sim.notify(CONNECTOR, status);
                    });
                    CancelReservationStatus::Accepted
                } else {
                    CancelReservationStatus::Rejected
                };
                reply(CancelReservationResponse { status })
            }
            Action::SetChargingProfile => {
                let req: SetChargingProfileRequest = parse(payload)?;
                let profile = req.cs_charging_profiles;
                let Some(limit) = profile
                    .charging_schedule
                    .charging_schedule_period
                    .first()
                    .map(|p| p.limit)
                else {
                    return reply(SetChargingProfileResponse {
                        status: ChargingProfileStatus::Rejected,
                    });
                };
                let in_transaction = {
                    let s = self.state();
                    s.transaction.is_some() && profile.transaction_id == s.transaction
                };
                let is_tx_profile =
                    profile.charging_profile_purpose == ChargingProfilePurposeType::TxProfile;
                let accepted =
                    charging::is_representable(limit) && (in_transaction || !is_tx_profile);
                let status = if accepted {
                    if in_transaction {
                        tokio::spawn(self.clone().offer(limit));
                    }
                    ChargingProfileStatus::Accepted
                } else {
                    ChargingProfileStatus::Rejected
                };
                reply(SetChargingProfileResponse { status })
            }
            Action::ClearChargingProfile => reply(ClearChargingProfileResponse {
                status: ClearChargingProfileStatus::Accepted,
            }),
            Action::Reset => {
                let req: ResetRequest = parse(payload)?;
                let reason = match req.kind {
                    ResetType::Hard => Reason::HardReset,
                    ResetType::Soft => Reason::SoftReset,
                };
                self.after_step(move |sim| {
                    sim.stop_transaction(reason);
                    sim.boot();
                });
                reply(ResetResponse {
                    status: ResetStatus::Accepted,
                })
            }
            Action::TriggerMessage => {
                let req: TriggerMessageRequest = parse(payload)?;
                let registered = {
                    let s = self.state();
                    s.registration == Some(RegistrationStatus::Accepted) && !s.quirks.boots_on_trigger
                };
                let refused =
                    registered && req.requested_message == MessageTrigger::BootNotification;
                let status = if refused {
                    TriggerMessageStatus::Rejected
                } else {
                    let message = req.requested_message;
                    self.after_step(move |sim| sim.send_triggered(message));
                    TriggerMessageStatus::Accepted
                };
                reply(TriggerMessageResponse { status })
            }
            _ => Err(OcppError::Protocol(ProtocolError::NotImplemented)),
        }
    }
}

#[async_trait]
impl CallTransport for SimChargePoint {
    async fn send_call(&self, action: Action, payload: Value) -> Result<Value, CallError> {
        let rejected = self.state().registration == Some(RegistrationStatus::Rejected);
        if rejected {
            self.state().received.push(action);
            tokio::time::sleep(SILENT_CALL).await;
            return Err(OcppError::Other(GenericError::TimeOut));
        }
        self.answer(action, payload)
    }

    async fn close(&self, code: u16, _reason: &str) {
        self.state().closed_with.push(code);
        self.unplug();
        tokio::spawn(self.clone().reconnect());
    }
}

fn parse<T: DeserializeOwned>(payload: Value) -> Result<T, CallError> {
    serde_json::from_value(payload).map_err(|_| OcppError::Protocol(ProtocolError::FormationViolation))
}

fn reply<T: Serialize>(res: T) -> Result<Value, CallError> {
    serde_json::to_value(res).map_err(|_| OcppError::Other(GenericError::General))
}
