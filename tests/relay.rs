//! End-to-end tests using a real WebSocket client.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use chat_relay::app::{ServerSettings, SessionSettings};
use chat_relay::models::{Backend, BackendClient, EchoBackend, RetryPolicy, Role, Turn};
use chat_relay::server::{ServeHandle, Server};
use chat_relay::{BackendError, RelayError};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

fn settings() -> ServerSettings {
    ServerSettings {
        host: "127.0.0.1".to_string(),
        port: 0,
        max_frame_bytes: 64,
        shutdown_grace_secs: 2,
    }
}

async fn boot(backend: Arc<dyn Backend>) -> ServeHandle {
    boot_with(backend, settings()).await
}

async fn boot_with(backend: Arc<dyn Backend>, settings: ServerSettings) -> ServeHandle {
    let client = BackendClient::new(backend, TIMEOUT, RetryPolicy::none());
    let (host, port) = (settings.host.clone(), settings.port);
    Server::new(Arc::new(client), settings, SessionSettings::default())
        .start(&host, port)
        .await
        .unwrap()
}

async fn connect(handle: &ServeHandle) -> WsStream {
    let url = format!("ws://{}/ws", handle.local_addr());
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn send(ws: &mut WsStream, text: &str) {
    ws.send(Message::text(text.to_owned())).await.unwrap();
}

async fn recv(ws: &mut WsStream) -> Message {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

async fn recv_text(ws: &mut WsStream) -> String {
    match recv(ws).await {
        Message::Text(text) => text.as_str().to_owned(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

async fn wait_for_no_connections(handle: &ServeHandle) {
    timeout(TIMEOUT, async {
        while handle.active_connections() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("connection was not released");
}

// ── Test backends ──

/// Echoes the latest user turn and keeps every history it was handed
#[derive(Default)]
struct RecordingBackend {
    calls: Mutex<Vec<Vec<(Role, String)>>>,
}

impl RecordingBackend {
    fn calls(&self) -> Vec<Vec<(Role, String)>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn generate(&self, history: &[Turn]) -> Result<String, BackendError> {
        let seen: Vec<(Role, String)> = history.iter().map(|t| (t.role, t.text.clone())).collect();
        self.calls.lock().unwrap().push(seen);
        EchoBackend::new().generate(history).await
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Echo with a delay, signalling when each call starts
struct SlowEcho {
    delay: Duration,
    started: Arc<Notify>,
}

impl SlowEcho {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl Backend for SlowEcho {
    async fn generate(&self, history: &[Turn]) -> Result<String, BackendError> {
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        EchoBackend::new().generate(history).await
    }

    fn name(&self) -> &str {
        "slow-echo"
    }
}

/// Never answers
struct HangingBackend {
    started: Arc<Notify>,
}

#[async_trait]
impl Backend for HangingBackend {
    async fn generate(&self, _history: &[Turn]) -> Result<String, BackendError> {
        self.started.notify_one();
        std::future::pending::<()>().await;
        unreachable!()
    }

    fn name(&self) -> &str {
        "hanging"
    }
}

struct FailingBackend(BackendError);

#[async_trait]
impl Backend for FailingBackend {
    async fn generate(&self, _history: &[Turn]) -> Result<String, BackendError> {
        Err(self.0.clone())
    }

    fn name(&self) -> &str {
        "failing"
    }
}

// ── Tests ──

#[tokio::test]
async fn echo_round_trip() {
    let handle = boot(Arc::new(EchoBackend::new())).await;
    let mut ws = connect(&handle).await;

    send(&mut ws, "hello").await;
    assert_eq!(recv_text(&mut ws).await, "hello");
}

#[tokio::test]
async fn empty_frame_is_rejected_and_connection_stays_usable() {
    let backend = Arc::new(RecordingBackend::default());
    let handle = boot(backend.clone()).await;
    let mut ws = connect(&handle).await;

    send(&mut ws, "").await;
    assert_eq!(recv_text(&mut ws).await, "error: empty frame rejected");

    send(&mut ws, "still here").await;
    assert_eq!(recv_text(&mut ws).await, "still here");

    // The empty frame never reached the backend
    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], vec![(Role::User, "still here".to_string())]);
}

#[tokio::test]
async fn pipelined_frames_are_answered_in_order() {
    let handle = boot(Arc::new(SlowEcho::new(Duration::from_millis(20)))).await;
    let mut ws = connect(&handle).await;

    let inputs = ["one", "two", "three", "four", "five"];
    for input in inputs {
        send(&mut ws, input).await;
    }

    let mut replies = Vec::new();
    for _ in inputs {
        replies.push(recv_text(&mut ws).await);
    }
    assert_eq!(replies, inputs);
}

#[tokio::test]
async fn history_grows_by_two_turns_per_exchange() {
    let backend = Arc::new(RecordingBackend::default());
    let handle = boot(backend.clone()).await;
    let mut ws = connect(&handle).await;

    for input in ["one", "two", "three"] {
        send(&mut ws, input).await;
        assert_eq!(recv_text(&mut ws).await, input);
    }

    let calls = backend.calls();
    let lengths: Vec<usize> = calls.iter().map(Vec::len).collect();
    assert_eq!(lengths, vec![1, 3, 5]);

    let last: Vec<(Role, &str)> = calls[2].iter().map(|(r, t)| (*r, t.as_str())).collect();
    assert_eq!(
        last,
        vec![
            (Role::User, "one"),
            (Role::Assistant, "one"),
            (Role::User, "two"),
            (Role::Assistant, "two"),
            (Role::User, "three"),
        ]
    );
}

#[tokio::test]
async fn concurrent_connections_have_independent_histories() {
    let backend = Arc::new(RecordingBackend::default());
    let handle = boot(backend.clone()).await;
    let mut first = connect(&handle).await;
    let mut second = connect(&handle).await;

    send(&mut first, "A").await;
    send(&mut second, "B").await;
    assert_eq!(recv_text(&mut first).await, "A");
    assert_eq!(recv_text(&mut second).await, "B");

    send(&mut second, "B2").await;
    assert_eq!(recv_text(&mut second).await, "B2");

    for history in backend.calls() {
        let has_a = history.iter().any(|(_, t)| t == "A");
        let has_b = history.iter().any(|(_, t)| t.starts_with('B'));
        assert!(!(has_a && has_b), "histories leaked across connections: {history:?}");
    }

    let last = backend.calls().pop().unwrap();
    let texts: Vec<&str> = last.iter().map(|(_, t)| t.as_str()).collect();
    assert_eq!(texts, vec!["B", "B", "B2"]);
}

#[tokio::test]
async fn closing_during_generation_releases_the_session() {
    let started = Arc::new(Notify::new());
    let handle = boot(Arc::new(HangingBackend {
        started: started.clone(),
    }))
    .await;
    let mut ws = connect(&handle).await;

    send(&mut ws, "are you there?").await;
    timeout(TIMEOUT, started.notified())
        .await
        .expect("backend was never called");
    assert_eq!(handle.active_connections(), 1);

    ws.close(None).await.unwrap();
    drop(ws);

    wait_for_no_connections(&handle).await;
}

#[tokio::test]
async fn oversized_frame_is_rejected() {
    let handle = boot(Arc::new(EchoBackend::new())).await;
    let mut ws = connect(&handle).await;

    send(&mut ws, &"x".repeat(65)).await;
    assert_eq!(
        recv_text(&mut ws).await,
        "error: frame of 65 bytes exceeds the 64 byte limit"
    );

    send(&mut ws, &"y".repeat(64)).await;
    assert_eq!(recv_text(&mut ws).await, "y".repeat(64));
}

#[tokio::test]
async fn binary_frames_are_unsupported() {
    let handle = boot(Arc::new(EchoBackend::new())).await;
    let mut ws = connect(&handle).await;

    ws.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
    assert_eq!(
        recv_text(&mut ws).await,
        "error: binary frames are not supported"
    );
}

#[tokio::test]
async fn backend_failures_are_reported_without_closing() {
    let handle = boot(Arc::new(FailingBackend(BackendError::Rejected(
        "policy".to_string(),
    ))))
    .await;
    let mut ws = connect(&handle).await;

    for _ in 0..2 {
        send(&mut ws, "tell me").await;
        assert_eq!(
            recv_text(&mut ws).await,
            "error: backend rejected the request: policy"
        );
    }
    assert_eq!(handle.active_connections(), 1);
}

#[tokio::test]
async fn unavailable_backend_is_reported() {
    let handle = boot(Arc::new(FailingBackend(BackendError::unavailable(
        "connection refused",
    ))))
    .await;
    let mut ws = connect(&handle).await;

    send(&mut ws, "hi").await;
    assert_eq!(
        recv_text(&mut ws).await,
        "error: backend unavailable: connection refused"
    );
}

#[tokio::test]
async fn shutdown_closes_idle_connections() {
    let handle = boot(Arc::new(EchoBackend::new())).await;
    let addr = handle.local_addr();
    let mut ws = connect(&handle).await;

    send(&mut ws, "before").await;
    assert_eq!(recv_text(&mut ws).await, "before");

    let shutdown = tokio::spawn(handle.shutdown());
    assert!(matches!(recv(&mut ws).await, Message::Close(_)));
    timeout(TIMEOUT, shutdown).await.unwrap().unwrap().unwrap();

    assert!(connect_async(format!("ws://{addr}/ws")).await.is_err());
}

#[tokio::test]
async fn shutdown_lets_the_pending_turn_finish() {
    let backend = SlowEcho::new(Duration::from_millis(200));
    let started = backend.started.clone();
    let handle = boot(Arc::new(backend)).await;
    let mut ws = connect(&handle).await;

    send(&mut ws, "finish me").await;
    timeout(TIMEOUT, started.notified()).await.unwrap();

    let shutdown = tokio::spawn(handle.shutdown());
    assert_eq!(recv_text(&mut ws).await, "finish me");
    assert!(matches!(recv(&mut ws).await, Message::Close(_)));
    timeout(TIMEOUT, shutdown).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_answers_frames_waiting_behind_the_pending_turn() {
    let backend = SlowEcho::new(Duration::from_millis(300));
    let started = backend.started.clone();
    let handle = boot(Arc::new(backend)).await;
    let mut ws = connect(&handle).await;

    send(&mut ws, "a").await;
    timeout(TIMEOUT, started.notified()).await.unwrap();
    send(&mut ws, "b").await;
    send(&mut ws, "c").await;
    // Give the handler time to read both frames while "a" is pending
    tokio::time::sleep(Duration::from_millis(50)).await;

    let shutdown = tokio::spawn(handle.shutdown());
    assert_eq!(recv_text(&mut ws).await, "a");
    assert_eq!(recv_text(&mut ws).await, "error: server shutting down");
    assert_eq!(recv_text(&mut ws).await, "error: server shutting down");
    assert!(matches!(recv(&mut ws).await, Message::Close(_)));
    timeout(TIMEOUT, shutdown).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn oversized_frame_during_pending_turn_is_rejected_in_order() {
    let backend = SlowEcho::new(Duration::from_millis(200));
    let started = backend.started.clone();
    let handle = boot(Arc::new(backend)).await;
    let mut ws = connect(&handle).await;

    send(&mut ws, "first").await;
    timeout(TIMEOUT, started.notified()).await.unwrap();
    send(&mut ws, &"x".repeat(65)).await;
    send(&mut ws, "third").await;

    assert_eq!(recv_text(&mut ws).await, "first");
    assert_eq!(
        recv_text(&mut ws).await,
        "error: frame of 65 bytes exceeds the 64 byte limit"
    );
    assert_eq!(recv_text(&mut ws).await, "third");
}

#[tokio::test]
async fn frame_beyond_transport_limit_drops_the_connection() {
    let handle = boot(Arc::new(EchoBackend::new())).await;
    let mut ws = connect(&handle).await;

    // Well past the 64 byte frame limit plus transport headroom
    send(&mut ws, &"x".repeat(256 * 1024)).await;

    let next = timeout(TIMEOUT, ws.next()).await.expect("connection stayed open");
    assert!(
        !matches!(next, Some(Ok(Message::Text(_)))),
        "unexpected reply: {next:?}"
    );
    wait_for_no_connections(&handle).await;
}

#[tokio::test]
async fn health_reports_active_connections() {
    let handle = boot(Arc::new(EchoBackend::new())).await;
    let mut ws = connect(&handle).await;
    send(&mut ws, "ping").await;
    assert_eq!(recv_text(&mut ws).await, "ping");

    let body: serde_json::Value = reqwest::get(format!("http://{}/health", handle.local_addr()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_connections"], 1);
}

#[tokio::test]
async fn binding_a_taken_port_fails() {
    let first = boot(Arc::new(EchoBackend::new())).await;
    let taken = ServerSettings {
        port: first.local_addr().port(),
        ..settings()
    };

    let client = BackendClient::new(Arc::new(EchoBackend::new()), TIMEOUT, RetryPolicy::none());
    let result = Server::new(Arc::new(client), taken.clone(), SessionSettings::default())
        .start(&taken.host, taken.port)
        .await;

    match result {
        Err(RelayError::Bind { addr, .. }) => {
            assert_eq!(addr, format!("127.0.0.1:{}", taken.port))
        }
        Err(other) => panic!("expected a bind error, got {other:?}"),
        Ok(_) => panic!("expected a bind error"),
    }
}
