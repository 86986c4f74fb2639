//! Daemon Server Implementation
//!
//! This module provides the server for the relay daemon:
//! - Accepts WebSocket connections at `/` and runs one relay connection each
//! - Serves the plain HTTP `GET /generate` and `GET /health` endpoints
//! - Tracks active connections and enforces the connection limit
//! - Supports graceful shutdown
//!
//! # Connection Handling
//!
//! ```text
//!                      RelayServer
//!                          │
//!          ┌───────────────┼───────────────┐
//!          │               │               │
//!     WebSocket        WebSocket       WebSocket
//!     (conn-1)         (conn-2)        (conn-3)
//!          │               │               │
//!     Connection       Connection      Connection     one task each,
//!          │               │               │          own Session
//!          └───────────────┴───────────────┘
//!                          │
//!                 GenerationBackend (shared)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn, Instrument};

use relay_core::outbound::{self, OutboundReceiver};
use relay_core::{
    config::ServerSettings, Connection, ConnectionId, GenerationBackend, GenerationRequest,
    InboundError, InboundFrame, Router as RequestRouter, API_REQUEST_ERROR,
};

/// How long shutdown waits for connections to wind down
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection state tracking
#[derive(Debug)]
struct ConnectionState {
    /// When the connection was established
    connected_at: Instant,
}

/// Shared state for request handlers
#[derive(Clone)]
struct AppState {
    router: RequestRouter,
    settings: Arc<ServerSettings>,
    connection_states: Arc<DashMap<ConnectionId, ConnectionState>>,
    /// One permit per allowed connection, taken before the upgrade
    slots: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

/// The relay server
pub struct RelayServer {
    settings: ServerSettings,
    backend: Arc<dyn GenerationBackend>,
    connection_states: Arc<DashMap<ConnectionId, ConnectionState>>,
    slots: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl RelayServer {
    /// Create a server relaying to `backend`
    pub fn new(settings: ServerSettings, backend: Arc<dyn GenerationBackend>) -> Self {
        let slots = Arc::new(Semaphore::new(settings.max_connections));
        Self {
            settings,
            backend,
            connection_states: Arc::new(DashMap::new()),
            slots,
            tracker: TaskTracker::new(),
        }
    }

    /// Get number of active connections
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connection_states.len()
    }

    /// Build the axum router
    ///
    /// Connections opened through it stop when `shutdown` is cancelled.
    pub fn router(&self, shutdown: CancellationToken) -> Router {
        let state = AppState {
            router: RequestRouter::new(Arc::clone(&self.backend)),
            settings: Arc::new(self.settings.clone()),
            connection_states: Arc::clone(&self.connection_states),
            slots: Arc::clone(&self.slots),
            tracker: self.tracker.clone(),
            shutdown,
        };

        Router::new()
            .route("/", get(ws_handler))
            .route("/generate", get(generate_handler))
            .route("/health", get(health_handler))
            .with_state(state)
    }

    /// Bind the configured address and start serving in the background
    ///
    /// # Errors
    ///
    /// Returns an error if the bind address is invalid or cannot be bound.
    pub async fn start(self) -> Result<ServerHandle> {
        let addr = self.settings.socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {addr}"))?;
        let local_addr = listener
            .local_addr()
            .context("Failed to read bound address")?;

        info!(%local_addr, backend = self.backend.name(), "Listening for connections");

        let shutdown = CancellationToken::new();
        let connection_states = Arc::clone(&self.connection_states);
        let task = tokio::spawn(self.serve(listener, shutdown.clone()));

        Ok(ServerHandle {
            local_addr,
            shutdown,
            connection_states,
            task,
        })
    }

    /// Serve on `listener` until `shutdown` is cancelled
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails while accepting connections.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let app = self.router(shutdown.clone());

        let stop = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                stop.cancelled().await;
                info!("Shutdown requested, stopping accept loop");
            })
            .await
            .context("Server error")?;

        // Connections observe the same token; wait for them to cancel their
        // generations and flush
        shutdown.cancel();
        self.tracker.close();
        if tokio::time::timeout(DRAIN_TIMEOUT, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.tracker.len(),
                "Connections still open after shutdown timeout"
            );
        }
        info!("Shutdown complete");
        Ok(())
    }
}

/// Handle to a running server
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    connection_states: Arc<DashMap<ConnectionId, ConnectionState>>,
    task: JoinHandle<Result<()>>,
}

impl ServerHandle {
    /// The address the server is listening on
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get number of active connections
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connection_states.len()
    }

    /// Uptime of each active connection
    #[must_use]
    pub fn connection_uptimes(&self) -> Vec<(ConnectionId, Duration)> {
        self.connection_states
            .iter()
            .map(|entry| (*entry.key(), entry.value().connected_at.elapsed()))
            .collect()
    }

    /// Stop accepting, cancel every connection and wait for the server to exit
    ///
    /// # Errors
    ///
    /// Returns the server's error, if it failed.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();
        self.task.await.context("Server task panicked")?
    }
}

// =============================================================================
// WebSocket Endpoint
// =============================================================================

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    // The slot is held from here until the connection ends; a failed upgrade
    // drops the closure and frees it
    let Ok(permit) = Arc::clone(&state.slots).try_acquire_owned() else {
        warn!(
            max_connections = state.settings.max_connections,
            "Connection limit reached, rejecting new connection"
        );
        return ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "too many connections")
            .into_response();
    };

    let tracker = state.tracker.clone();
    ws.max_message_size(state.settings.max_message_size)
        .on_upgrade(move |socket| {
            let conn_id = ConnectionId::new();
            tracker.track_future(
                handle_connection(conn_id, socket, state, permit)
                    .instrument(tracing::info_span!("connection", %conn_id)),
            )
        })
}

/// Run one WebSocket as a relay connection
async fn handle_connection(
    conn_id: ConnectionId,
    socket: WebSocket,
    state: AppState,
    permit: OwnedSemaphorePermit,
) {
    state.connection_states.insert(
        conn_id,
        ConnectionState {
            connected_at: Instant::now(),
        },
    );
    info!(
        active_connections = state.connection_states.len(),
        "New connection accepted"
    );

    let (sender, receiver) = socket.split();
    let (out_tx, out_rx) = outbound::channel(state.settings.outbound_capacity);
    let writer = tokio::spawn(write_messages(sender, out_rx).in_current_span());

    let connection = Connection::new(conn_id, state.router.clone());
    connection
        .run(inbound_frames(receiver), out_tx, state.shutdown.clone())
        .await;

    // The connection dropped its sender; the writer flushes and closes
    if writer.await.is_err() {
        warn!("Writer task panicked");
    }

    drop(permit);
    let uptime_ms = state.connection_states.remove(&conn_id).map(|(_, conn)| {
        u64::try_from(conn.connected_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    });
    info!(
        active_connections = state.connection_states.len(),
        uptime_ms,
        "Connection handler finished"
    );
}

/// Client frames as a stream that ends when the socket closes
fn inbound_frames(receiver: SplitStream<WebSocket>) -> impl Stream<Item = InboundFrame> {
    futures::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.next().await? {
                Ok(Message::Text(text)) => {
                    return Some((InboundFrame::Text(text.as_str().to_owned()), receiver));
                }
                Ok(Message::Binary(bytes)) => {
                    return Some((InboundFrame::Binary(bytes.to_vec()), receiver));
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Client sent close");
                    return None;
                }
                Err(e) => {
                    debug!(error = %e, "WebSocket read failed");
                    return None;
                }
            }
        }
    })
}

/// Drain the outbound queue onto the socket
///
/// Fragments of a generation cancelled while they waited are skipped by the
/// queue, not written.
async fn write_messages(mut sender: SplitSink<WebSocket, Message>, mut out_rx: OutboundReceiver) {
    while let Some(message) = out_rx.recv().await {
        if let Err(e) = sender.send(Message::Text(message.to_frame().into())).await {
            debug!(error = %e, "WebSocket write failed");
            return;
        }
    }
    if out_rx.discarded() > 0 {
        debug!(discarded = out_rx.discarded(), "Stale fragments discarded");
    }
    // Closing fails if the client already went away
    let _ = sender.close().await;
}

// =============================================================================
// HTTP Endpoints
// =============================================================================

/// Error response with a `{"error": ...}` body
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct GenerateParams {
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    response: String,
}

async fn generate_handler(
    State(state): State<AppState>,
    Query(params): Query<GenerateParams>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let text = params
        .text
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| {
            ApiError::new(StatusCode::BAD_REQUEST, InboundError::Empty.client_message())
        })?;

    let backend = state.router.backend();
    match backend.generate(GenerationRequest::new(text)).await {
        Ok(response) => Ok(Json(GenerateResponse { response })),
        Err(e) => {
            warn!(error = %e, backend = backend.name(), "Generate request failed");
            Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                API_REQUEST_ERROR,
            ))
        }
    }
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    backend: bool,
}

async fn health_handler(State(state): State<AppState>) -> Json<Health> {
    let backend = state.router.backend().health_check().await;
    Json(Health {
        status: "ok",
        backend,
    })
}
