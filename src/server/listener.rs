use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use super::frame::FrameLimits;
use super::handler::ConnectionHandler;
use crate::app::{Config, ServerSettings, SessionSettings};
use crate::models::BackendClient;
use crate::session::ChatSession;
use crate::utils::RelayError;

/// Shared state handed to every axum handler
#[derive(Clone)]
struct RelayState {
    backend: Arc<BackendClient>,
    limits: FrameLimits,
    max_history_turns: Option<usize>,
    connections: TaskTracker,
    shutdown: CancellationToken,
}

/// Accepts WebSocket connections and runs one [`ConnectionHandler`] per connection
pub struct Server {
    backend: Arc<BackendClient>,
    settings: ServerSettings,
    session: SessionSettings,
}

impl Server {
    pub fn new(
        backend: Arc<BackendClient>,
        settings: ServerSettings,
        session: SessionSettings,
    ) -> Self {
        Self {
            backend,
            settings,
            session,
        }
    }

    pub fn from_config(config: &Config, backend: BackendClient) -> Self {
        Self::new(
            Arc::new(backend),
            config.server.clone(),
            config.session.clone(),
        )
    }

    /// Bind `host:port` and start accepting connections in the background.
    ///
    /// Fails with [`RelayError::Bind`] when the address is unavailable.
    pub async fn start(self, host: &str, port: u16) -> Result<ServeHandle, RelayError> {
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| RelayError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let connections = TaskTracker::new();
        let shutdown = CancellationToken::new();
        let state = RelayState {
            backend: self.backend.clone(),
            limits: FrameLimits {
                max_frame_bytes: self.settings.max_frame_bytes,
            },
            max_history_turns: self.session.max_history_turns,
            connections: connections.clone(),
            shutdown: shutdown.clone(),
        };

        info!(%local_addr, backend = self.backend.name(), "relay listening on ws://{local_addr}");

        let stop = shutdown.clone();
        let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
        let join = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await
        });

        Ok(ServeHandle {
            local_addr,
            shutdown,
            connections,
            grace: self.settings.shutdown_grace(),
            join,
        })
    }
}

/// Build the axum router: WebSocket on `/` and `/ws`, plus `/health`
fn router(state: RelayState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    let limit = state.limits.transport_limit();
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| async move {
            let handler = ConnectionHandler::new(
                socket,
                peer,
                ChatSession::with_window(state.max_history_turns),
                state.backend.clone(),
                state.limits,
                state.shutdown.clone(),
            );
            state.connections.track_future(handler.run()).await;
        })
}

async fn health_handler(State(state): State<RelayState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "active_connections": state.connections.len(),
    }))
}

/// Handle returned by [`Server::start`]
pub struct ServeHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    connections: TaskTracker,
    grace: Duration,
    join: JoinHandle<std::io::Result<()>>,
}

impl ServeHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connections whose handler is still running
    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    /// Stop accepting, let in-flight turns finish, then close every connection.
    ///
    /// Handlers still running after the grace period are left to be dropped
    /// with the runtime.
    pub async fn shutdown(self) -> Result<()> {
        info!(active = self.connections.len(), "shutting down relay");
        self.shutdown.cancel();

        let deadline = tokio::time::Instant::now() + self.grace;

        match tokio::time::timeout_at(deadline, self.join).await {
            Ok(joined) => joined
                .context("Listener task panicked")?
                .context("Listener failed")?,
            Err(_) => warn!("listener did not stop within the grace period"),
        }

        self.connections.close();
        if tokio::time::timeout_at(deadline, self.connections.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.connections.len(),
                "grace period elapsed with connections still open"
            );
        } else {
            info!("all connections closed");
        }

        Ok(())
    }
}
