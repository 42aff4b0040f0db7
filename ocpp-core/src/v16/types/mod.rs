mod authorization_data;
mod authorization_status;
mod availability;
mod cancel_reservation_status;
mod charge_point_error_code;
mod charge_point_status;
mod charging_profile;
mod charging_profile_kind;
mod charging_profile_purpose;
mod charging_profile_status;
mod charging_rate_unit;
mod charging_schedule;
mod charging_schedule_period;
mod clear_charging_profile_status;
mod configuration_status;
mod diagnostics_status;
mod firmware_status;
mod id_tag_info;
mod key_value;
mod location;
mod measurand;
mod message_trigger;
mod meter_value;
mod phase;
mod reading_context;
mod reason;
mod registration_status;
mod remote_start_stop_status;
mod reservation_status;
mod reset;
mod sampled_value;
mod trigger_message_status;
mod unit_of_measure;
mod unlock_status;
mod update_status;
mod update_type;

pub use authorization_data::AuthorizationData;
pub use authorization_status::AuthorizationStatus;
pub use availability::{AvailabilityStatus, AvailabilityType};
pub use cancel_reservation_status::CancelReservationStatus;
pub use charge_point_error_code::ChargePointErrorCode;
pub use charge_point_status::ChargePointStatus;
pub use charging_profile::ChargingProfile;
pub use charging_profile_kind::{ChargingProfileKindType, RecurrencyKindType};
pub use charging_profile_purpose::ChargingProfilePurposeType;
pub use charging_profile_status::ChargingProfileStatus;
pub use charging_rate_unit::ChargingRateUnitType;
pub use charging_schedule::ChargingSchedule;
pub use charging_schedule_period::ChargingSchedulePeriod;
pub use clear_charging_profile_status::ClearChargingProfileStatus;
pub use configuration_status::ConfigurationStatus;
pub use diagnostics_status::DiagnosticsStatus;
pub use firmware_status::FirmwareStatus;
pub use id_tag_info::IdTagInfo;
pub use key_value::KeyValue;
pub use location::Location;
pub use measurand::Measurand;
pub use message_trigger::MessageTrigger;
pub use meter_value::MeterValue;
pub use phase::Phase;
pub use reading_context::{ReadingContext, ValueFormat};
pub use reason::Reason;
pub use registration_status::RegistrationStatus;
pub use remote_start_stop_status::RemoteStartStopStatus;
pub use reservation_status::ReservationStatus;
pub use reset::{ResetStatus, ResetType};
pub use sampled_value::SampledValue;
pub use trigger_message_status::TriggerMessageStatus;
pub use unit_of_measure::UnitOfMeasure;
pub use unlock_status::UnlockStatus;
pub use update_status::UpdateStatus;
pub use update_type::UpdateType;
