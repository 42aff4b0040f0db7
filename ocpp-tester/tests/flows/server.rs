use std::{sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use rocpp_core::v16::{
    messages::get_local_list_version::GetLocalListVersionRequest, types::RegistrationStatus,
};
use rocpp_tester::{
    config::TesterConfig,
    operator::ScriptedOperator,
    transport::{serve, ServerContext},
};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderValue},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};

use crate::harness::logger::init_logger;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn next_frame(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(10), ws.next())
            .await
            .expect("frame within 10s")
            .expect("connection open")
            .expect("readable frame");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("json frame");
        }
    }
}

async fn send(ws: &mut Client, frame: Value) {
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .expect("frame sent");
}

pub async fn round_trip() {
    init_logger();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let ctx = ServerContext::new(TesterConfig::default(), Arc::new(ScriptedOperator::default()));
    let registry = ctx.registry.clone();
    let server = tokio::spawn(serve(listener, ctx));

    let mut request = format!("ws://{addr}/CP_WS")
        .into_client_request()
        .expect("request");
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("ocpp1.6"));
    let (mut ws, response) = connect_async(request).await.expect("handshake");
    assert_eq!(
        response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok()),
        Some("ocpp1.6")
    );

    send(
        &mut ws,
        json!([2, "boot-1", "BootNotification", {
            "chargePointVendor": "Simulated",
            "chargePointModel": "SIM-1"
        }]),
    )
    .await;
    let reply = next_frame(&mut ws).await;
    assert_eq!(reply[0], 3);
    assert_eq!(reply[1], "boot-1");
    assert_eq!(reply[2]["status"], "Accepted");

    let session = registry.get("CP_WS").expect("session registered");
    assert_eq!(session.registration(), RegistrationStatus::Accepted);
    assert!(session.is_connected());

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.call(GetLocalListVersionRequest {}).await }
    });
    let call = next_frame(&mut ws).await;
    assert_eq!(call[0], 2);
    assert_eq!(call[2], "GetLocalListVersion");
    let unique_id = call[1].as_str().expect("string id").to_owned();
    send(&mut ws, json!([3, unique_id, {"listVersion": 4}])).await;
    let res = pending.await.expect("call task").expect("call answered");
    assert_eq!(res.list_version, 4);

    send(
        &mut ws,
        json!([2, "status-1", "StatusNotification", {"connectorId": "one"}]),
    )
    .await;
    let error = next_frame(&mut ws).await;
    assert_eq!(error[0], 4);
    assert_eq!(error[1], "status-1");
    assert_eq!(error[2], "FormationViolation");

    ws.close(None).await.expect("close");
    let detached = tokio::time::timeout(Duration::from_secs(5), async {
        while session.is_connected() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(detached.is_ok(), "session still attached after close");
    server.abort();
}
