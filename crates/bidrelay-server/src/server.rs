use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use bidrelay_core::protocol::{self, Health, PushAck};

use crate::broadcast::Broadcaster;
use crate::client::{self, ClientRegistry};

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            max_send_queue: 256,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ClientRegistry>,
    pub broadcaster: Arc<Broadcaster>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/push", post(push_handler))
        .route("/broadcast", post(push_handler))
        .route("/ws", get(ws_handler))
        .fallback(not_found_handler)
        .method_not_allowed_fallback(not_found_handler)
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the relay server. Returns a handle that keeps the
/// background tasks alive and exposes the broadcaster for channel wiring.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(ClientRegistry::new(config.max_send_queue));
    let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));

    // Sweep subscribers that stopped answering pings (every 60s)
    let _cleanup = client::start_cleanup_task(
        Arc::clone(&registry),
        std::time::Duration::from_secs(60),
    );

    let app_state = AppState {
        registry: Arc::clone(&registry),
        broadcaster: Arc::clone(&broadcaster),
    };

    let router = build_router(app_state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "Relay server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        registry,
        broadcaster,
        _server: server_handle,
        _cleanup,
    })
}

/// Handle returned by `start()` — keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    pub registry: Arc<ClientRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    _server: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

/// Accept a push from a trusted backend caller and relay it to all
/// subscribers. `/push` and `/broadcast` share this handler.
async fn push_handler(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    // An empty body is treated as an empty object, matching the
    // control contract's lenient parse.
    let raw: &[u8] = if body.is_empty() { b"{}" } else { &body };

    match serde_json::from_slice::<serde_json::Value>(raw) {
        Ok(payload) => {
            let outbound = protocol::unwrap_envelope(payload);
            let delivered = state.broadcaster.broadcast(&outbound);
            tracing::debug!(delivered, "Push relayed");
            (StatusCode::OK, Json(PushAck::accepted()))
        }
        Err(_) => (StatusCode::BAD_REQUEST, Json(PushAck::invalid_json())),
    }
}

/// Health check for `GET /`.
async fn health_handler() -> Json<Health> {
    Json(Health::ok())
}

/// Any other method/path combination.
async fn not_found_handler() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

/// WebSocket upgrade handler for subscribers.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a new subscriber connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, rx) = state.registry.register();
    tracing::info!(client_id = %client_id, "Subscriber connected");

    client::handle_ws_connection(socket, client_id, rx, state.registry).await;
}
