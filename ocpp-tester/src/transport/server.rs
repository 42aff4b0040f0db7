use std::{net::SocketAddr, sync::Arc};

use futures_util::{SinkExt, StreamExt};
use rocpp_core::{
    format::{
        error::{GenericError, OcppError},
        frame::{CallError as ErrorFrame, CallResult},
        message::{EncodeDecode, Invalid, OcppMessage},
    },
    v16::protocol_error::ProtocolError,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderValue},
        Message,
    },
};
use tokio_util::sync::CancellationToken;

use super::{CallTransport, Registry, WsLink};
use crate::{
    config::TesterConfig,
    dispatcher,
    fault::FaultInjector,
    operator::Operator,
    session::Session,
};

const SUBPROTOCOL: &str = "ocpp1.6";

/// Everything a connection needs to serve a charge point and start its
/// dispatcher.
#[derive(Clone)]
pub struct ServerContext {
    pub config: Arc<TesterConfig>,
    pub registry: Registry,
    pub operator: Arc<dyn Operator>,
    pub faults: Option<Arc<dyn FaultInjector>>,
}

impl ServerContext {
    pub fn new(config: TesterConfig, operator: Arc<dyn Operator>) -> Self {
        Self {
            config: Arc::new(config),
            registry: Registry::new(),
            operator,
            faults: None,
        }
    }

    pub fn with_faults(mut self, faults: Arc<dyn FaultInjector>) -> Self {
        self.faults = Some(faults);
        self
    }
}

pub async fn run_server(ctx: ServerContext) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&ctx.config.bind_address).await?;
    log::info!("central system listening on {}", listener.local_addr()?);
    serve(listener, ctx).await
}

/// Accepts connections on an already bound listener.
pub async fn serve(listener: TcpListener, ctx: ServerContext) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, ctx).await {
                log::error!("connection from {} failed: {:#}", peer, e);
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: ServerContext,
) -> anyhow::Result<()> {
    let mut path = String::new();
    let ws = accept_hdr_async(stream, |req: &Request, mut resp: Response| {
        path = req.uri().path().to_owned();
        let offered = req
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.split(',').any(|p| p.trim() == SUBPROTOCOL));
        if offered {
            resp.headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
        } else {
            log::warn!("{} did not offer {}", peer, SUBPROTOCOL);
        }
        Ok::<_, ErrorResponse>(resp)
    })
    .await?;

    let identity = path.trim_matches('/').to_owned();
    let (session, fresh) = ctx.registry.session(&identity);
    if fresh {
        log::info!("{} connected from {}", identity, peer);
    } else {
        log::warn!("{} reconnected from {}", identity, peer);
    }

    let (outbound_tx, outbound_rx) = flume::unbounded::<Message>();
    let token = CancellationToken::new();
    let link = Arc::new(WsLink::new(
        identity.clone(),
        outbound_tx.clone(),
        ctx.config.call_timeout(),
        token.clone(),
    ));
    let transport: Arc<dyn CallTransport> = link.clone();
    session.attach(transport.clone());

    if fresh {
        let session = session.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            dispatcher::run(session.clone(), ctx.clone()).await;
            ctx.registry.remove(session.identity());
            log::info!("{} session dropped", session.identity());
        });
    }

    let (mut ws_tx, mut ws_rx) = ws.split();
    let writer_token = token.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                msg = outbound_rx.recv_async() => {
                    let Ok(msg) = msg else { break };
                    let closing = matches!(msg, Message::Close(_));
                    if ws_tx.send(msg).await.is_err() || closing {
                        break;
                    }
                }
                _ = writer_token.cancelled() => break,
            }
        }
    });

    loop {
        let msg = tokio::select! {
            _ = token.cancelled() => break,
            msg = ws_rx.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                on_text(&session, &link, &outbound_tx, text.as_str().to_owned());
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                log::warn!("{} closed the connection: {:?}", identity, frame);
                break;
            }
            Some(Ok(other)) => log::warn!("{} sent unexpected frame {:?}", identity, other),
            Some(Err(e)) => {
                log::error!("{} websocket error: {}", identity, e);
                break;
            }
            None => break,
        }
    }

    token.cancel();
    let _ = writer.await;
    link.fail_all();
    session.detach(&transport);
    Ok(())
}

fn on_text(session: &Session, link: &WsLink, outbound: &flume::Sender<Message>, text: String) {
    log::debug!("{} <- {}", session.identity(), text);
    let reply = match OcppMessage::<ProtocolError>::decode(text) {
        OcppMessage::Call(call) => match session.handle_call(&call.action, call.payload) {
            Ok(payload) => Some(CallResult::new(call.unique_id, payload).encode()),
            Err(code) => Some(ErrorFrame::new(call.unique_id, code).encode()),
        },
        OcppMessage::CallResponse(response) => {
            link.resolve(response);
            None
        }
        OcppMessage::Invalid(invalid) => on_invalid(session, link, invalid),
    };
    if let Some(reply) = reply {
        log::debug!("{} -> {}", session.identity(), reply);
        let _ = outbound.send(Message::Text(reply.into()));
    }
}

/// A malformed Call with a readable id is answered with FormationViolation;
/// a malformed reply fails the call waiting on it.
fn on_invalid(session: &Session, link: &WsLink, invalid: Invalid) -> Option<String> {
    log::warn!(
        "{} sent invalid frame ({}): {}",
        session.identity(),
        invalid.err_msg,
        invalid.message
    );
    let unique_id = invalid.unique_id?;
    let kind = serde_json::from_str::<serde_json::Value>(&invalid.message)
        .ok()
        .and_then(|v| v.get(0).and_then(serde_json::Value::as_u64));
    if kind == Some(2) {
        Some(ErrorFrame::new(unique_id, ProtocolError::FormationViolation).encode())
    } else {
        link.complete(&unique_id, Err(OcppError::Other(GenericError::ParsingError)));
        None
    }
}
