//! In-process mock servers shared by the unit tests
//!
//! `MockBackend` serves the agent backend's HTTP and SSE routes;
//! `MockControlServer` serves the WebSocket control channel. Both bind to
//! `127.0.0.1:0`.

use crate::config::{BackendConfig, ControlConfig};
use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// An address nothing listens on
pub async fn unused_addr() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// An address that accepts TCP connections but never answers
pub async fn hanging_addr() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

/// An HTTP server whose responses promise more body than they send.
///
/// Each request is answered with `status`, a `Content-Length` larger than
/// `partial`, then the connection is closed.
pub async fn truncated_response_addr(status: u16, partial: &'static str) -> std::net::SocketAddr {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                // Read the whole request so closing does not reset the connection
                loop {
                    let Ok(n) = socket.read(&mut buf).await else { return };
                    if n == 0 {
                        return;
                    }
                    request.extend_from_slice(&buf[..n]);
                    let text = String::from_utf8_lossy(&request).to_string();
                    if let Some(end) = text.find("\r\n\r\n") {
                        let length = text[..end]
                            .lines()
                            .find_map(|l| {
                                let (name, value) = l.split_once(':')?;
                                name.eq_ignore_ascii_case("content-length")
                                    .then(|| value.trim().parse::<usize>().ok())?
                            })
                            .unwrap_or(0);
                        if request.len() >= end + 4 + length {
                            break;
                        }
                    }
                }
                let head = format!(
                    "HTTP/1.1 {} Status\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
                    status,
                    partial.len() + 64,
                    partial
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.flush().await;
            });
        }
    });
    addr
}

async fn serve(app: Router) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    addr
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

// =============================================================================
// Agent backend
// =============================================================================

/// Mutable behaviour and counters of the mock backend
#[derive(Default)]
pub struct MockBackendState {
    start_failure: Mutex<Option<(u16, String)>>,
    query_failure: Mutex<Option<(u16, String)>>,
    fragments: Mutex<HashMap<String, Vec<String>>>,
    failing_streams: Mutex<Vec<String>>,
    opens: Mutex<HashMap<String, usize>>,
    finish_after: AtomicUsize,
    start_calls: AtomicUsize,
    query_calls: AtomicUsize,
    status_calls: AtomicUsize,
    last_query: Mutex<Option<serde_json::Value>>,
}

impl MockBackendState {
    pub fn fail_start(&self, status: u16, body: &str) {
        *self.start_failure.lock().unwrap() = Some((status, body.to_string()));
    }

    pub fn fail_query(&self, status: u16, body: &str) {
        *self.query_failure.lock().unwrap() = Some((status, body.to_string()));
    }

    pub fn clear_query_failure(&self) {
        *self.query_failure.lock().unwrap() = None;
    }

    pub fn set_fragments(&self, channel: &str, fragments: &[&str]) {
        self.fragments.lock().unwrap().insert(
            channel.to_string(),
            fragments.iter().map(|f| f.to_string()).collect(),
        );
    }

    pub fn fail_stream(&self, channel: &str) {
        self.failing_streams.lock().unwrap().push(channel.to_string());
    }

    pub fn heal_streams(&self) {
        self.failing_streams.lock().unwrap().clear();
    }

    pub fn finish_after(&self, calls: usize) {
        self.finish_after.store(calls, Ordering::SeqCst);
    }

    pub fn stream_opens(&self, channel: &str) -> usize {
        self.opens.lock().unwrap().get(channel).copied().unwrap_or(0)
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn last_query(&self) -> Option<serde_json::Value> {
        self.last_query.lock().unwrap().clone()
    }
}

/// Mock multi-agent backend.
///
/// Session id is always `abc123`; every query returns stream `s1` with
/// channels `output` and `log`.
pub struct MockBackend {
    pub base_url: String,
    pub state: Arc<MockBackendState>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = Arc::new(MockBackendState::default());
        let app = Router::new()
            .route("/start-session", post(start_session))
            .route("/query-session", post(query_session))
            .route("/get-status", post(get_status))
            .route("/stream/:stream_id/:channel", get(open_stream))
            .with_state(state.clone());
        let addr = serve(app).await;
        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            base_url: self.base_url.clone(),
            request_timeout_secs: 5,
            ..BackendConfig::default()
        }
    }
}

fn failure(status: u16, body: String) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, body).into_response()
}

async fn start_session(State(state): State<Arc<MockBackendState>>) -> Response {
    state.start_calls.fetch_add(1, Ordering::SeqCst);
    if let Some((status, body)) = state.start_failure.lock().unwrap().clone() {
        return failure(status, body);
    }
    Json(serde_json::json!("abc123")).into_response()
}

async fn query_session(
    State(state): State<Arc<MockBackendState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    state.query_calls.fetch_add(1, Ordering::SeqCst);
    *state.last_query.lock().unwrap() = Some(body);
    if let Some((status, body)) = state.query_failure.lock().unwrap().clone() {
        return failure(status, body);
    }
    Json(serde_json::json!({"streamId": "s1", "channels": ["output", "log"]})).into_response()
}

async fn get_status(State(state): State<Arc<MockBackendState>>) -> Response {
    let calls = state.status_calls.fetch_add(1, Ordering::SeqCst) + 1;
    let finish_after = state.finish_after.load(Ordering::SeqCst);
    let finished = finish_after > 0 && calls >= finish_after;
    Json(serde_json::json!({ "finished": finished })).into_response()
}

async fn open_stream(
    State(state): State<Arc<MockBackendState>>,
    Path((_stream_id, channel)): Path<(String, String)>,
) -> Response {
    *state.opens.lock().unwrap().entry(channel.clone()).or_default() += 1;

    if state.failing_streams.lock().unwrap().contains(&channel) {
        return failure(500, "stream unavailable".to_string());
    }

    let records: Vec<Result<String, Infallible>> = state
        .fragments
        .lock()
        .unwrap()
        .get(&channel)
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .map(|fragment| Ok(format!("data: {}\n\n", fragment)))
        .collect();

    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(futures::stream::iter(records)),
    )
        .into_response()
}

// =============================================================================
// Control channel
// =============================================================================

/// Shared state of the mock control server
pub struct MockControlState {
    received: Mutex<Vec<serde_json::Value>>,
    connections: AtomicUsize,
    push: broadcast::Sender<String>,
    kick: broadcast::Sender<()>,
}

impl MockControlState {
    /// Every JSON message received from clients
    pub fn received(&self) -> Vec<serde_json::Value> {
        self.received.lock().unwrap().clone()
    }

    /// Received messages of `{"type": "register"}`
    pub fn registrations(&self) -> Vec<serde_json::Value> {
        self.received()
            .into_iter()
            .filter(|m| m["type"] == "register")
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Send a text frame to every connected client
    pub fn push(&self, message: serde_json::Value) {
        self.push.send(message.to_string()).ok();
    }

    /// Close every open connection from the server side
    pub fn kick(&self) {
        self.kick.send(()).ok();
    }
}

/// Mock WebSocket control server at `ws://127.0.0.1:<port>/ws`
pub struct MockControlServer {
    pub url: String,
    pub state: Arc<MockControlState>,
}

impl MockControlServer {
    pub async fn start() -> Self {
        let (push, _) = broadcast::channel(64);
        let (kick, _) = broadcast::channel(4);
        let state = Arc::new(MockControlState {
            received: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            push,
            kick,
        });
        let app = Router::new()
            .route("/ws", get(ws_upgrade))
            .with_state(state.clone());
        let addr = serve(app).await;
        Self {
            url: format!("ws://{}/ws", addr),
            state,
        }
    }

    /// Control configuration that tries `candidates` with short timers
    pub fn control_config(candidates: Vec<String>) -> ControlConfig {
        ControlConfig {
            candidate_urls: candidates,
            connect_timeout_ms: 1000,
            reconnect_delay_ms: 50,
        }
    }
}

async fn ws_upgrade(
    State(state): State<Arc<MockControlState>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<MockControlState>) {
    state.connections.fetch_add(1, Ordering::SeqCst);
    let mut push = state.push.subscribe();
    let mut kick = state.kick.subscribe();

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
                        continue;
                    };
                    let is_register = value["type"] == "register";
                    state.received.lock().unwrap().push(value);
                    if is_register {
                        let ack = serde_json::json!({"type": "register_success"}).to_string();
                        if socket.send(Message::Text(ack)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            outgoing = push.recv() => {
                if let Ok(text) = outgoing {
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            }
            _ = kick.recv() => {
                socket.send(Message::Close(None)).await.ok();
                break;
            }
        }
    }
}
