use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64};
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::mpsc;

use memory_core::{GameState, ServerMessage};

/// Server-assigned identity of one WebSocket connection.
pub type ConnectionId = u64;

/// Handle to push messages to a connected WebSocket client.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub conn_id: ConnectionId,
    pub tx: mpsc::UnboundedSender<ServerMessage>,
    /// Session this connection is seated in, if any.
    pub room_id: Option<String>,
    /// Messages received in the current second window.
    pub message_count: u32,
    pub rate_limit_window: Instant,
}

/// Session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// One seat filled, waiting for an opponent.
    Waiting,
    Playing,
    Ended,
}

/// The server-side record pairing two connections with one shared game.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    /// Seated connections in join order; position 0 is player 1.
    /// Never exceeds two; a vacated seat ends the session.
    pub players: Vec<ConnectionId>,
    /// Authoritative board, populated once both seats are filled.
    pub game: Option<GameState>,
    /// Connections that have voted to restart since the last game start.
    pub restart_votes: HashSet<ConnectionId>,
    pub phase: SessionPhase,
    pub created_at: Instant,
    pub last_activity: Instant,
}

impl Session {
    pub fn new(id: String, creator: ConnectionId) -> Self {
        let now = Instant::now();
        Session {
            id,
            players: vec![creator],
            game: None,
            restart_votes: HashSet::new(),
            phase: SessionPhase::Waiting,
            created_at: now,
            last_activity: now,
        }
    }

    /// Seat number (1 or 2) of a connection, if seated here.
    pub fn seat_of(&self, conn_id: ConnectionId) -> Option<u8> {
        self.players
            .iter()
            .position(|&p| p == conn_id)
            .map(|i| i as u8 + 1)
    }

    /// The other seated connection, if any.
    pub fn opponent_of(&self, conn_id: ConnectionId) -> Option<ConnectionId> {
        self.players.iter().copied().find(|&p| p != conn_id)
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Shared application state.
pub struct AppState {
    /// Session Registry: code -> session. The DashMap entry guard serializes
    /// all mutation of one session; broadcasts go out after it is dropped.
    pub sessions: DashMap<String, Session>,
    pub connections: DashMap<ConnectionId, ConnectionHandle>,
    /// Auto-match queue: a single FIFO slot holding at most one waiter.
    pub waiting: Mutex<Option<ConnectionId>>,
    pub next_conn_id: AtomicU64,
    pub connection_count: AtomicU32,
    pub max_connections: u32,
}

impl AppState {
    pub fn new() -> Self {
        AppState {
            sessions: DashMap::new(),
            connections: DashMap::new(),
            waiting: Mutex::new(None),
            next_conn_id: AtomicU64::new(1),
            connection_count: AtomicU32::new(0),
            max_connections: 100,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        AppState::new()
    }
}

/// Generate a random 6-character uppercase alphanumeric session code.
/// Collisions are statistically negligible and not specially handled.
pub fn generate_session_id() -> String {
    use rand::RngExt;
    let mut rng = rand::rng();
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    (0..6)
        .map(|_| {
            let idx = rng.random_range(0..CHARS.len());
            CHARS[idx] as char
        })
        .collect()
}
