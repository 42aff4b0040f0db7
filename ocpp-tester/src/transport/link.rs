use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use flume::Sender;
use rocpp_core::{
    format::{
        error::{GenericError, OcppError},
        frame::Call,
        message::{CallResponse, EncodeDecode},
    },
    v16::{protocol_error::ProtocolError, Action},
};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::{
    protocol::{frame::coding::CloseCode, CloseFrame},
    Message,
};
use tokio_util::sync::CancellationToken;

use super::{CallError, CallTransport};

type Pending = HashMap<String, oneshot::Sender<Result<Value, CallError>>>;

/// One live websocket connection, seen from the scenario side. Frames go
/// out through the connection's writer queue; replies come back through
/// [`WsLink::complete`].
pub struct WsLink {
    identity: String,
    outbound: Sender<Message>,
    pending: Mutex<Pending>,
    call_timeout: Duration,
    token: CancellationToken,
}

impl WsLink {
    pub fn new(
        identity: impl Into<String>,
        outbound: Sender<Message>,
        call_timeout: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            identity: identity.into(),
            outbound,
            pending: Mutex::new(HashMap::new()),
            call_timeout,
            token,
        }
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Routes a CallResult or CallError to the call waiting on its id.
    pub fn resolve(&self, response: CallResponse<ProtocolError>) {
        match response {
            CallResponse::CallResult(r) => self.complete(&r.unique_id, Ok(r.payload)),
            CallResponse::CallError(e) => {
                log::warn!(
                    "{} CallError {} for {}: {}",
                    self.identity,
                    e.error_code,
                    e.unique_id,
                    e.error_description
                );
                self.complete(&e.unique_id, Err(OcppError::Protocol(e.error_code)))
            }
        }
    }

    pub fn complete(&self, unique_id: &str, result: Result<Value, CallError>) {
        match self.pending().remove(unique_id) {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => log::warn!("{} reply for unknown call {}", self.identity, unique_id),
        }
    }

    /// Fails every outstanding call as offline.
    pub fn fail_all(&self) {
        let drained: Vec<_> = self.pending().drain().collect();
        for (_, tx) in drained {
            let _ = tx.send(Err(OcppError::Other(GenericError::Offline)));
        }
    }

    pub fn in_flight(&self) -> usize {
        self.pending().len()
    }
}

#[async_trait]
impl CallTransport for WsLink {
    async fn send_call(&self, action: Action, payload: Value) -> Result<Value, CallError> {
        if self.token.is_cancelled() {
            return Err(OcppError::Other(GenericError::Offline));
        }
        let unique_id = uuid::Uuid::new_v4().to_string();
        let frame = Call {
            unique_id: unique_id.clone(),
            action: action.to_string(),
            payload,
        }
        .encode();
        let (tx, rx) = oneshot::channel();
        self.pending().insert(unique_id.clone(), tx);
        if self.outbound.send_async(Message::Text(frame.into())).await.is_err() {
            self.pending().remove(&unique_id);
            return Err(OcppError::Other(GenericError::Offline));
        }
        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(OcppError::Other(GenericError::Offline)),
            Err(_) => {
                self.pending().remove(&unique_id);
                log::error!("{} {} {} timed out", self.identity, action, unique_id);
                Err(OcppError::Other(GenericError::TimeOut))
            }
        }
    }

    async fn close(&self, code: u16, reason: &str) {
        log::info!("{} closing with {} \"{}\"", self.identity, code, reason);
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        let _ = self.outbound.send_async(Message::Close(Some(frame))).await;
        self.token.cancel();
    }
}
