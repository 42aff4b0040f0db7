pub mod config;
pub mod dispatcher;
pub mod fault;
pub mod operator;
pub mod reconcile;
pub mod scenarios;
pub mod session;
pub mod sync;
pub mod transport;
