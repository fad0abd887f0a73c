pub mod game;
pub mod protocol;
pub mod reconcile;

pub use game::{BOARD_SIZE, GameState, PAIR_COUNT};
pub use protocol::{ClientMessage, ServerMessage};
pub use reconcile::{FlipError, FlipOutcome, ReconcileError, apply_flip, reconcile};
