//! End-to-end tests of [`RealtimeClient`] over a real WebSocket.
//!
//! Spins up a small axum server on an ephemeral port that behaves like
//! the builder backend's `/ws` endpoint: it acknowledges subscribe
//! intents and then pushes a status update for the subscribed task.

use std::time::Duration;

use assert_matches::assert_matches;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use launchpad_realtime::{ConnectionEvent, ConnectionState, RealtimeClient, ReconnectConfig};

const WAIT: Duration = Duration::from_secs(5);

async fn ws_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(handle_socket)
}

async fn handle_socket(mut socket: WebSocket) {
    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let Ok(intent) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        if intent["type"] != "subscribe" {
            continue;
        }
        let task_id = intent["task_id"].as_str().unwrap_or_default().to_string();

        let ack = json!({"type": "subscribed", "task_id": task_id});
        let update = json!({
            "type": "project_update",
            "task_id": task_id,
            "data": {"status": "processing", "message": "Starting project generation..."}
        });
        for frame in [ack, update] {
            if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
                return;
            }
        }
    }
}

/// Accepts the upgrade, then immediately closes with "going away".
async fn closing_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        let frame = CloseFrame {
            code: 1001,
            reason: "restarting".into(),
        };
        let _ = socket.send(Message::Close(Some(frame))).await;
    })
}

async fn spawn_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/closing", get(closing_handler));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}/ws")
}

#[tokio::test]
async fn receives_project_update_over_websocket() {
    let url = spawn_server().await;
    let client = RealtimeClient::websocket(url, ReconnectConfig::default());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = client.subscribe("project:todo-app", move |payload: &Value| {
        let _ = tx.send(payload.clone());
    });
    client.connect();

    let payload = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(payload["status"], "processing");
    assert_eq!(payload["message"], "Starting project generation...");
    assert_eq!(client.state(), ConnectionState::Open);

    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn unreachable_server_schedules_retries() {
    // Bind then drop to get a port with nothing listening.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ReconnectConfig {
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(40),
        multiplier: 2.0,
    };
    let client = RealtimeClient::websocket(format!("ws://{addr}/ws"), config);
    let mut events = client.events();

    client.connect();

    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_matches!(event, ConnectionEvent::Reconnecting { attempt: 1, .. });
    assert_ne!(client.state(), ConnectionState::Open);

    client.disconnect();
}

#[tokio::test]
async fn server_close_frame_reports_code_and_reason() {
    let url = spawn_server().await.replace("/ws", "/closing");
    let config = ReconnectConfig {
        initial_delay: Duration::from_secs(10),
        max_delay: Duration::from_secs(10),
        multiplier: 2.0,
    };
    let client = RealtimeClient::websocket(url, config);
    let mut events = client.events();

    client.connect();

    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_matches!(event, ConnectionEvent::Connected { .. });

    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_matches!(
        event,
        ConnectionEvent::Disconnected { reason, .. }
            if reason.contains("code 1001") && reason.contains("restarting")
    );

    client.disconnect();
}
