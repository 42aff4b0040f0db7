use async_trait::async_trait;
use rocpp_core::{
    format::error::OcppError,
    v16::{protocol_error::ProtocolError, Action},
};
use serde_json::Value;

mod link;
mod registry;
mod server;

pub use link::WsLink;
pub use registry::Registry;
pub use server::{run_server, serve, ServerContext};

pub type CallError = OcppError<ProtocolError>;

/// Outbound half of a charge point connection.
#[async_trait]
pub trait CallTransport: Send + Sync {
    /// Sends a Call and resolves with the CallResult payload.
    async fn send_call(&self, action: Action, payload: Value) -> Result<Value, CallError>;

    /// Closes the connection with a websocket close code.
    async fn close(&self, code: u16, reason: &str);
}
