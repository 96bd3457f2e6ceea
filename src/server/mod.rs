//! JSON-RPC style HTTP server.
//!
//! Procedures are served at `POST /rpc/:procedure`, live notifications at
//! `/ws`. The workspace sits behind one async mutex; every call runs to
//! completion while holding it.

pub mod rpc;
pub mod websocket;

use std::sync::Arc;

use axum::{Json, Router, routing::get, routing::post};
use serde_json::{Value, json};
use tokio::sync::{Mutex, broadcast};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::Result;
use crate::commands::Workspace;
use websocket::{BroadcastTransport, SocketEvent};

/// Buffered socket events per subscriber before slow clients lag.
const EVENT_BUFFER: usize = 256;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub workspace: Arc<Mutex<Workspace>>,
    /// Notifications fanned out to connected sockets
    pub events: broadcast::Sender<SocketEvent>,
}

impl AppState {
    /// Wrap a workspace, registering the socket transport on its dispatcher.
    pub fn new(mut workspace: Workspace) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        workspace
            .dispatcher
            .register(Box::new(BroadcastTransport::new(events.clone())));
        Self {
            workspace: Arc::new(Mutex::new(workspace)),
            events,
        }
    }
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/rpc", get(rpc::list_procedures))
        .route("/rpc/:procedure", post(rpc::handle))
        .route("/ws", get(websocket::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Serve until the process is stopped.
pub fn serve(workspace: Workspace, addr: &str) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "qc server listening");
        axum::serve(listener, router(AppState::new(workspace))).await?;
        Ok::<(), crate::Error>(())
    })
}
