pub mod routes;
pub mod state;
pub mod ws;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;

use crate::state::{AppState, SessionPhase};

/// Rooms still waiting for a second player are reaped after this long.
const WAITING_TTL: Duration = Duration::from_secs(600);
/// Finished sessions linger this long before being reaped.
const ENDED_TTL: Duration = Duration::from_secs(120);

/// Build a fully configured Router + shared state.
pub fn build_app() -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState::new());

    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                reap_stale_sessions(&state);
            }
        });
    }

    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/ws", get(routes::ws_upgrade))
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    (app, state)
}

/// Background task: remove abandoned rooms no disconnect will ever clean up.
///
/// A disconnect deletes a Playing session on the spot, so those are only
/// re-checked for seats whose connection handle is gone.
fn reap_stale_sessions(state: &AppState) {
    let now = Instant::now();
    let mut to_remove = Vec::new();
    let mut to_verify = Vec::new();

    for entry in state.sessions.iter() {
        let session = entry.value();
        match session.phase {
            SessionPhase::Waiting => {
                // A room code that never attracted a second player.
                if now.duration_since(session.created_at) > WAITING_TTL {
                    to_remove.push(session.id.clone());
                }
            }
            SessionPhase::Ended => {
                if now.duration_since(session.last_activity) > ENDED_TTL {
                    to_remove.push(session.id.clone());
                }
            }
            SessionPhase::Playing => {
                if session
                    .players
                    .iter()
                    .any(|p| !state.connections.contains_key(p))
                {
                    to_verify.push(session.id.clone());
                }
            }
        }
    }

    for room_id in to_verify {
        ws::close_if_vacated(state, &room_id);
    }

    for room_id in to_remove {
        if let Some((_, session)) = state.sessions.remove(&room_id) {
            tracing::info!(%room_id, "reaped stale session");
            for player in session.players {
                if let Some(mut conn) = state.connections.get_mut(&player) {
                    if conn.room_id.as_deref() == Some(room_id.as_str()) {
                        conn.room_id = None;
                    }
                }
            }
        }
    }
}
