pub mod action;
pub mod messages;
pub mod protocol_error;
pub mod types;

pub use action::{Action, OcppRequest};
