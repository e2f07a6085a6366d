use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt, stream::BoxStream};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, client::IntoClientRequest},
};
use toolbridge_core::{BridgeAction, BridgeError, BridgeGateway, BridgeParams};
use toolbridge_session::SessionRegistry;
use toolbridge_tools::ToolRegistry;
use toolbridge_transport::{
    AppState, AuthConfig, BRIDGE_KEY_HEADER, CLOSE_UNAUTHORIZED, McpHandler, create_router,
};

type Agent = WebSocketStream<MaybeTlsStream<TcpStream>>;

const KEY: &str = "bridge-secret";

async fn serve(gateway: Arc<BridgeGateway>) -> SocketAddr {
    serve_with(gateway, SessionRegistry::new()).await
}

async fn serve_with(gateway: Arc<BridgeGateway>, sessions: SessionRegistry) -> SocketAddr {
    let state = AppState {
        sessions,
        mcp: Arc::new(McpHandler::new(Arc::new(ToolRegistry::new()))),
        gateway,
        auth: Arc::new(AuthConfig::new(None, Some(KEY.to_string()))),
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, key: Option<&str>) -> Agent {
    let mut request = format!("ws://{addr}/bridge").into_client_request().unwrap();
    if let Some(key) = key {
        request
            .headers_mut()
            .insert(BRIDGE_KEY_HEADER, key.parse().unwrap());
    }
    connect_async(request).await.unwrap().0
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn next_request(agent: &mut Agent) -> Value {
    loop {
        match agent.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn next_event(events: &mut BoxStream<'static, Value>) -> Value {
    tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_wrong_key_closed_with_4001() {
    let gateway = Arc::new(BridgeGateway::default());
    let addr = serve(Arc::clone(&gateway)).await;

    for key in [Some("wrong"), None] {
        let mut agent = connect(addr, key).await;
        match agent.next().await.unwrap().unwrap() {
            Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), CLOSE_UNAUTHORIZED),
            other => panic!("expected close frame, got {other:?}"),
        }
    }
    assert!(!gateway.status().connected);
}

#[tokio::test]
async fn test_request_reply_round_trip() {
    let gateway = Arc::new(BridgeGateway::default());
    let addr = serve(Arc::clone(&gateway)).await;
    let mut agent = connect(addr, Some(KEY)).await;

    agent
        .send(Message::Text(
            json!({"type": "register", "hostname": "desk", "platform": "win32"}).to_string(),
        ))
        .await
        .unwrap();
    wait_until(|| gateway.status().agent.is_some()).await;
    assert!(gateway.status().connected);

    let call = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            let params = BridgeParams {
                command: Some("echo hi".to_string()),
                ..BridgeParams::default()
            };
            gateway.invoke(BridgeAction::Exec, params, None).await
        })
    };

    let request = next_request(&mut agent).await;
    assert_eq!(request["action"], "exec");
    assert_eq!(request["command"], "echo hi");

    let reply = json!({"id": request["id"], "result": {"stdout": "hi\r\n", "code": 0}});
    agent.send(Message::Text(reply.to_string())).await.unwrap();

    let result = call.await.unwrap().unwrap();
    assert_eq!(result["stdout"], "hi\r\n");
    assert_eq!(gateway.status().in_flight, 0);
}

#[tokio::test]
async fn test_disconnect_rejects_in_flight() {
    let gateway = Arc::new(BridgeGateway::default());
    let addr = serve(Arc::clone(&gateway)).await;
    let mut agent = connect(addr, Some(KEY)).await;
    wait_until(|| gateway.status().connected).await;

    let call = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move { gateway.ping(None).await })
    };

    let request = next_request(&mut agent).await;
    assert_eq!(request["action"], "ping");
    agent.close(None).await.unwrap();

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, BridgeError::LinkAbsent));
    wait_until(|| !gateway.status().connected).await;

    let err = gateway.ping(None).await.unwrap_err();
    assert!(matches!(err, BridgeError::BridgeUnavailable));
}

#[tokio::test]
async fn test_reconnect_supersedes_previous_agent() {
    let gateway = Arc::new(BridgeGateway::default());
    let addr = serve(Arc::clone(&gateway)).await;

    let mut first = connect(addr, Some(KEY)).await;
    wait_until(|| gateway.status().connected).await;
    let first_id = gateway.link().current().unwrap().id();

    let mut second = connect(addr, Some(KEY)).await;
    wait_until(|| gateway.link().current().is_some_and(|h| h.id() != first_id)).await;

    first.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(gateway.status().connected);

    let call = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move { gateway.ping(None).await })
    };
    let request = next_request(&mut second).await;
    second
        .send(Message::Text(
            json!({"id": request["id"], "result": "pong"}).to_string(),
        ))
        .await
        .unwrap();
    assert_eq!(call.await.unwrap().unwrap(), json!("pong"));
}

#[tokio::test]
async fn test_sessions_hear_bridge_events() {
    let gateway = Arc::new(BridgeGateway::default());
    let sessions = SessionRegistry::new();
    let (session, _) = sessions.get_or_create(None);
    let mut events = session.notification_stream();
    let addr = serve_with(Arc::clone(&gateway), sessions.clone()).await;

    let mut agent = connect(addr, Some(KEY)).await;
    let connected = next_event(&mut events).await;
    assert_eq!(connected["method"], "notifications/message");
    assert_eq!(connected["params"]["logger"], "bridge");
    assert_eq!(connected["params"]["data"]["event"], "connected");

    // Frames that are neither replies nor registrations are skipped
    agent
        .send(Message::Text(json!({"hello": "world"}).to_string()))
        .await
        .unwrap();
    agent
        .send(Message::Text(
            json!({"type": "register", "hostname": "desk", "platform": "linux"}).to_string(),
        ))
        .await
        .unwrap();
    let registered = next_event(&mut events).await;
    assert_eq!(registered["params"]["data"]["event"], "registered");
    assert_eq!(registered["params"]["data"]["agent"]["hostname"], "desk");
    assert!(gateway.status().connected);

    agent.close(None).await.unwrap();
    let disconnected = next_event(&mut events).await;
    assert_eq!(disconnected["params"]["data"]["event"], "disconnected");
    assert_eq!(disconnected["params"]["level"], "warning");
}
