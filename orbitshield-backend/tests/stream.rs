use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use orbitshield_backend::model::{CycleSnapshot, JsonCatalog};
use orbitshield_backend::module::{RiskScorer, SubscriberRegistry, TokenAuthority};
use orbitshield_backend::service::{AppState, build_router};

type Client =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Serve the router on an ephemeral port and return its address.
async fn spawn_server(dir: &TempDir) -> (SocketAddr, AppState) {
    let catalog = JsonCatalog::open(dir.path().join("catalog.json"))
        .await
        .unwrap();
    let state = AppState {
        tokens: Arc::new(TokenAuthority::new(Duration::from_secs(600)).unwrap()),
        registry: Arc::new(SubscriberRegistry::new()),
        catalog: Arc::new(catalog),
        scorer: Arc::new(RiskScorer::heuristic()),
        allowed_origin: None,
        subscriber_queue: 16,
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

async fn connect(addr: SocketAddr, query: &str) -> Client {
    let url = format!("ws://{}/ws/positions{}", addr, query);
    let (client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    client
}

async fn next_message(client: &mut Client) -> Message {
    tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("no message from server")
        .expect("stream ended")
        .unwrap()
}

async fn close_code(client: &mut Client) -> u16 {
    match next_message(client).await {
        Message::Close(Some(frame)) => u16::from(frame.code),
        other => panic!("expected close frame, got {:?}", other),
    }
}

async fn wait_for_subscribers(registry: &SubscriberRegistry, expected: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while registry.len().await != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscriber count never settled");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_token_closes_with_4000() {
    let dir = TempDir::new().unwrap();
    let (addr, state) = spawn_server(&dir).await;

    let mut client = connect(addr, "").await;
    assert_eq!(close_code(&mut client).await, 4000);
    assert!(state.registry.is_empty().await);
}

#[tokio::test]
async fn unknown_token_closes_with_4001() {
    let dir = TempDir::new().unwrap();
    let (addr, state) = spawn_server(&dir).await;

    let mut client = connect(addr, "?token=deadbeef").await;
    assert_eq!(close_code(&mut client).await, 4001);
    assert!(state.registry.is_empty().await);
}

#[tokio::test]
async fn subscriber_receives_frames_and_unregisters_on_close() {
    let dir = TempDir::new().unwrap();
    let (addr, state) = spawn_server(&dir).await;
    let token = state.tokens.issue().await;

    let mut client = connect(addr, &format!("?token={}", token.value)).await;
    wait_for_subscribers(&state.registry, 1).await;

    let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let report = state.registry.broadcast(&CycleSnapshot::empty(ts)).await;
    assert_eq!(report.delivered, 1);

    let message = next_message(&mut client).await;
    let value: serde_json::Value = serde_json::from_str(message.to_text().unwrap()).unwrap();
    assert_eq!(value["timestamp"], "2024-03-01T12:00:00.000000Z");
    assert_eq!(value["objects"], serde_json::json!([]));

    client.close(None).await.unwrap();
    wait_for_subscribers(&state.registry, 0).await;
}

#[tokio::test]
async fn token_cannot_open_a_second_stream() {
    let dir = TempDir::new().unwrap();
    let (addr, state) = spawn_server(&dir).await;
    let token = state.tokens.issue().await;
    let query = format!("?token={}", token.value);

    let mut first = connect(addr, &query).await;
    wait_for_subscribers(&state.registry, 1).await;

    let mut second = connect(addr, &query).await;
    assert_eq!(close_code(&mut second).await, 4001);
    assert_eq!(state.registry.len().await, 1);

    first.send(Message::Close(None)).await.unwrap();
    wait_for_subscribers(&state.registry, 0).await;
}
