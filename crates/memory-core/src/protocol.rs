use serde::{Deserialize, Serialize};

use crate::game::GameState;

/// Messages sent from client to server.
///
/// Tagged with `type` and camelCase on the wire, so a flip submission looks
/// like `{"type": "flipCard", "roomId": "ABC123", "index": 4}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Allocate a room and wait for an opponent to join by code.
    CreateRoom,
    /// Join an existing room by its code.
    JoinRoom { room_id: String },
    /// Enter the auto-match queue. The legacy `playerId` payload field is
    /// accepted and ignored; the transport identity is authoritative.
    JoinGame,
    /// Turn one tile face-up. Validated and scored server-side.
    FlipCard {
        #[serde(alias = "gameId")]
        room_id: String,
        index: usize,
    },
    /// Submit a full mirror of the client's board for reconciliation.
    UpdateGameState {
        #[serde(alias = "gameId")]
        room_id: String,
        numbers: Vec<u8>,
        flipped: Vec<bool>,
        score_player1: u32,
        score_player2: u32,
        current_player: u8,
        steps: u32,
    },
    /// Vote to restart the current game.
    #[serde(alias = "restartGame")]
    PlayerWantsRestart {
        #[serde(alias = "gameId")]
        room_id: String,
    },
    /// Client-announced end of game (full-state protocol only).
    GameEnded {
        #[serde(alias = "gameId")]
        room_id: String,
        winner: u8,
    },
    /// Leave the game voluntarily.
    PlayerQuit { room_id: String },
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    RoomCreated {
        room_id: String,
    },
    /// Seated first in a room-code session; an opponent has yet to join.
    WaitingForOpponent {
        room_id: String,
    },
    /// Parked in the auto-match waiting slot.
    Waiting,
    GameJoined {
        room_id: String,
        opponent_id: u64,
        is_first_player: bool,
        game_state: GameState,
    },
    RoomJoinError {
        message: String,
    },
    /// Delta notification for a single accepted flip; always followed by the
    /// full canonical `gameState`.
    CardFlipped {
        index: usize,
    },
    /// The canonical state after any accepted mutation.
    GameState(GameState),
    GameRestarted {
        game_state: GameState,
        starting_player: u8,
    },
    OpponentWantsRestart,
    /// `winner` is 1 or 2, or absent on a draw.
    GameEnded {
        winner: Option<u8>,
    },
    OpponentQuit,
    OpponentDisconnected,
    Error {
        message: String,
    },
    Pong,
}
