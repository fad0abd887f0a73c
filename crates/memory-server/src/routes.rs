use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::state::AppState;
use crate::ws;

// ── Health ──────────────────────────────────────────────────────────────

pub async fn health() -> &'static str {
    "ok"
}

// ── WebSocket upgrade ───────────────────────────────────────────────────

pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let current = state.connection_count.load(Ordering::Relaxed);
    if current >= state.max_connections {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let conn_id = state.next_conn_id.fetch_add(1, Ordering::Relaxed);

    Ok(ws.on_upgrade(move |socket| ws::handle_socket(state, socket, conn_id)))
}
