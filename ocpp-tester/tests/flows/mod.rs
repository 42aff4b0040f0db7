pub mod core_profile;
pub mod dispatcher;
pub mod local_list;
pub mod remote_trigger;
pub mod reservation;
pub mod server;
pub mod smart_charging;
pub mod websocket;
