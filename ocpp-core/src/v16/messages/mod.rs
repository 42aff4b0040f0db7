pub mod authorize;
pub mod boot_notification;
pub mod cancel_reservation;
pub mod change_availability;
pub mod change_configuration;
pub mod clear_charging_profile;
pub mod diagnostics_status_notification;
pub mod firmware_status_notification;
pub mod get_configuration;
pub mod get_local_list_version;
pub mod heart_beat;
pub mod meter_values;
pub mod remote_start_transaction;
pub mod remote_stop_transaction;
pub mod reserve_now;
pub mod reset;
pub mod send_local_list;
pub mod set_charging_profile;
pub mod start_transaction;
pub mod status_notification;
pub mod stop_transaction;
pub mod trigger_message;
pub mod unlock_connector;
