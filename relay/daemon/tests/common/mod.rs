//! Shared helpers for daemon integration tests
//!
//! - a relay server on an ephemeral port, backed by any [`GenerationBackend`]
//! - a WebSocket client speaking the relay protocol
//! - a fake Ollama server answering `/api/generate` with scripted NDJSON

#![allow(dead_code)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use relay_core::config::ServerSettings;
use relay_core::{GenerationBackend, OutboundMessage};
use relay_daemon::{RelayServer, ServerHandle};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);
pub const QUIET_PERIOD: Duration = Duration::from_millis(150);

// =============================================================================
// Relay Server
// =============================================================================

pub fn test_settings() -> ServerSettings {
    ServerSettings {
        bind_addr: "127.0.0.1:0".to_string(),
        ..ServerSettings::default()
    }
}

pub async fn start_relay(backend: Arc<dyn GenerationBackend>) -> ServerHandle {
    start_relay_with(test_settings(), backend).await
}

pub async fn start_relay_with(
    settings: ServerSettings,
    backend: Arc<dyn GenerationBackend>,
) -> ServerHandle {
    RelayServer::new(settings, backend)
        .start()
        .await
        .expect("relay server failed to start")
}

/// Poll until `condition` holds or the timeout passes
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met before timeout"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// =============================================================================
// WebSocket Client
// =============================================================================

pub struct WsClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let (socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
            .await
            .expect("WebSocket handshake failed");
        Self { socket }
    }

    pub async fn send_raw(&mut self, raw: &str) {
        self.socket
            .send(Message::text(raw.to_owned()))
            .await
            .expect("WebSocket send failed");
    }

    pub async fn send_text(&mut self, text: &str) {
        self.send_raw(&json!({ "text": text }).to_string()).await;
    }

    /// Next relay message, or `None` once the server closed the socket
    pub async fn try_recv(&mut self) -> Option<OutboundMessage> {
        loop {
            let next = tokio::time::timeout(RECV_TIMEOUT, self.socket.next())
                .await
                .expect("timed out waiting for a relay message");
            match next? {
                Ok(Message::Text(text)) => return Some(OutboundMessage::parse_frame(text.as_str())),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    pub async fn recv(&mut self) -> OutboundMessage {
        self.try_recv().await.expect("socket closed")
    }

    /// Receive until `done` matches, returning everything received
    pub async fn recv_until(&mut self, done: impl Fn(&OutboundMessage) -> bool) -> Vec<OutboundMessage> {
        let mut received = Vec::new();
        loop {
            let message = self.recv().await;
            let finished = done(&message);
            received.push(message);
            if finished {
                return received;
            }
        }
    }

    pub async fn assert_silent(&mut self) {
        if let Ok(Some(Ok(Message::Text(text)))) =
            tokio::time::timeout(QUIET_PERIOD, self.socket.next()).await
        {
            panic!("expected silence, got {text:?}");
        }
    }

    pub async fn close(mut self) {
        let _ = self.socket.close(None).await;
    }
}

pub fn fragment(text: &str) -> OutboundMessage {
    OutboundMessage::Fragment(text.to_string())
}

// =============================================================================
// Fake Ollama
// =============================================================================

/// How the fake answers one prompt
#[derive(Clone, Debug)]
pub enum FakeReply {
    /// 200 with these body chunks, written with a delay between them
    Ndjson(Vec<String>),
    /// 200 with raw body chunks, for splits inside a UTF-8 sequence
    Bytes(Vec<Vec<u8>>),
    /// 200 with an endless stream of fragments; sets the flag when the body is dropped
    Endless,
    /// Non-2xx status with a body
    Status(u16, String),
}

#[derive(Clone, Default)]
pub struct FakeOllama {
    replies: Arc<Mutex<HashMap<String, FakeReply>>>,
    requests: Arc<Mutex<Vec<Value>>>,
    endless_dropped: Arc<AtomicBool>,
}

impl FakeOllama {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, prompt: &str, reply: FakeReply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(prompt.to_string(), reply);
        self
    }

    /// Request bodies received so far
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    /// Whether an endless response body has been dropped by the server
    pub fn endless_dropped(&self) -> bool {
        self.endless_dropped.load(Ordering::SeqCst)
    }

    pub async fn spawn(&self) -> SocketAddr {
        let app = Router::new()
            .route("/api/generate", post(fake_generate))
            .route("/api/tags", get(|| async { Json(json!({ "models": [] })) }))
            .with_state(self.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }
}

/// NDJSON body lines for a list of fragments followed by a done marker
pub fn ndjson_lines(fragments: &[&str]) -> Vec<String> {
    let mut lines: Vec<String> = fragments
        .iter()
        .map(|f| format!("{}\n", json!({ "response": f, "done": false })))
        .collect();
    lines.push(format!("{}\n", json!({ "response": "", "done": true })));
    lines
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

async fn fake_generate(State(fake): State<FakeOllama>, Json(body): Json<Value>) -> Response {
    fake.requests.lock().unwrap().push(body.clone());

    let prompt = body["prompt"].as_str().unwrap_or_default().to_string();
    let streaming = body["stream"].as_bool().unwrap_or(true);
    let reply = fake.replies.lock().unwrap().get(&prompt).cloned();

    let reply = reply.unwrap_or_else(|| {
        // Echo word by word by default
        let words: Vec<&str> = prompt.split_inclusive(' ').collect();
        FakeReply::Ndjson(ndjson_lines(&words))
    });

    match reply {
        FakeReply::Status(status, text) => {
            let status = StatusCode::from_u16(status).unwrap();
            (status, text).into_response()
        }
        FakeReply::Ndjson(chunks) if !streaming => {
            // Join fragments into a single response object
            let full: String = chunks
                .concat()
                .lines()
                .filter_map(|line| serde_json::from_str::<Value>(line).ok())
                .filter_map(|v| v["response"].as_str().map(str::to_string))
                .collect();
            Json(json!({ "response": full, "done": true })).into_response()
        }
        FakeReply::Ndjson(chunks) => {
            paced_body(chunks.into_iter().map(String::into_bytes).collect())
        }
        FakeReply::Bytes(chunks) => paced_body(chunks),
        FakeReply::Endless => {
            let guard = DropFlag(Arc::clone(&fake.endless_dropped));
            let body = futures::stream::unfold((0_u64, guard), |(i, guard)| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let line = format!("{}\n", json!({ "response": format!("tok{i} "), "done": false }));
                Some((Ok::<_, Infallible>(Bytes::from(line)), (i + 1, guard)))
            });
            Body::from_stream(body).into_response()
        }
    }
}

fn paced_body(chunks: Vec<Vec<u8>>) -> Response {
    let body = futures::stream::iter(chunks).then(|chunk| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok::<_, Infallible>(Bytes::from(chunk))
    });
    Body::from_stream(body).into_response()
}
