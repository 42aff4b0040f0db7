pub mod charge_point;
pub mod context;
pub mod logger;
