//! In-process fake control-room server for tests.
//!
//! REST requests are answered from a canned `(method, path) -> (status, body)`
//! table and recorded. The stream route accepts WebSocket clients, records
//! what they send, and forwards frames pushed by the test.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::config::ClientConfig;

#[derive(Debug, Clone)]
enum Push {
    Frame(String),
    Close,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

struct FakeState {
    connections: AtomicUsize,
    stream_tokens: Mutex<Vec<Option<String>>>,
    received: Mutex<Vec<Value>>,
    push_tx: broadcast::Sender<Push>,
    routes: Mutex<HashMap<(String, String), (StatusCode, Value)>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

pub struct FakeBackend {
    pub addr: SocketAddr,
    state: Arc<FakeState>,
}

impl FakeBackend {
    pub async fn start() -> Self {
        let (push_tx, _) = broadcast::channel(64);
        let state = Arc::new(FakeState {
            connections: AtomicUsize::new(0),
            stream_tokens: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            push_tx,
            routes: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/api/v1/stream", get(stream_handler))
            .fallback(rest_handler)
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake backend");
        let addr = listener.local_addr().expect("fake backend addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state }
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            base_url: format!("http://{}", self.addr),
            ..ClientConfig::default()
        }
    }

    /// Canned JSON answer for `method path` (path includes `/api/v1`).
    pub fn respond(&self, method: &str, path: &str, body: Value) {
        self.respond_with(method, path, StatusCode::OK, body);
    }

    pub fn respond_with(&self, method: &str, path: &str, status: StatusCode, body: Value) {
        self.state
            .routes
            .lock()
            .expect("routes lock")
            .insert((method.to_string(), path.to_string()), (status, body));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().expect("requests lock").clone()
    }

    pub fn request_count(&self, method: &str, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|req| req.method == method && req.path == path)
            .count()
    }

    /// Stream connections accepted so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// `token` query values seen on stream connections, in order.
    pub fn stream_tokens(&self) -> Vec<Option<String>> {
        self.state.stream_tokens.lock().expect("tokens lock").clone()
    }

    /// JSON frames received from clients, in order.
    pub fn received(&self) -> Vec<Value> {
        self.state.received.lock().expect("received lock").clone()
    }

    pub fn received_of_type(&self, event_type: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|frame| frame["type"] == event_type)
            .collect()
    }

    /// Send a raw text frame to every connected client.
    pub fn push_raw(&self, text: impl Into<String>) {
        let _ = self.state.push_tx.send(Push::Frame(text.into()));
    }

    pub fn push(&self, frame: Value) {
        self.push_raw(frame.to_string());
    }

    /// Close every connected client from the server side.
    pub fn close_clients(&self) {
        let _ = self.state.push_tx.send(Push::Close);
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn rest_handler(
    State(state): State<Arc<FakeState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let path = uri.path().to_string();
    let authorization = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = serde_json::from_str::<Value>(&body).ok();
    state.requests.lock().expect("requests lock").push(RecordedRequest {
        method: method.to_string(),
        path: path.clone(),
        authorization,
        body,
    });

    let routes = state.routes.lock().expect("routes lock");
    match routes.get(&(method.to_string(), path)) {
        Some((status, body)) => (*status, Json(body.clone())),
        None => (StatusCode::NOT_FOUND, Json(json!({"detail": "Not Found"}))),
    }
}

async fn stream_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<Arc<FakeState>>,
) -> impl IntoResponse {
    state
        .stream_tokens
        .lock()
        .expect("tokens lock")
        .push(query.get("token").cloned());
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

async fn handle_stream(mut socket: WebSocket, state: Arc<FakeState>) {
    let mut push_rx = state.push_tx.subscribe();
    state.connections.fetch_add(1, Ordering::SeqCst);

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                };
                let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
                    continue;
                };
                let is_ping = frame["type"] == "ping";
                state.received.lock().expect("received lock").push(frame);
                if is_ping {
                    let pong = json!({"type": "pong"}).to_string();
                    if socket.send(Message::Text(pong.into())).await.is_err() {
                        break;
                    }
                }
            }
            pushed = push_rx.recv() => {
                match pushed {
                    Ok(Push::Frame(text)) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(Push::Close) | Err(broadcast::error::RecvError::Closed) => {
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                }
            }
        }
    }
}
