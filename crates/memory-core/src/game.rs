use rand::RngExt;
use rand::rng;
use serde::{Deserialize, Serialize};

/// Number of tiles on the board.
pub const BOARD_SIZE: usize = 16;

/// Distinct tile values; each appears exactly twice.
pub const PAIR_COUNT: u8 = 8;

/// The authoritative board for one session.
///
/// Serialized camelCase so the wire shape matches the original protocol
/// (`scorePlayer1`, `currentPlayer`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    /// Tile values, a random permutation of two copies each of 1..=8.
    pub numbers: Vec<u8>,
    /// Face-up flag per tile, parallel to `numbers`.
    pub flipped: Vec<bool>,
    pub score_player1: u32,
    pub score_player2: u32,
    /// Whose turn it is: 1 or 2.
    pub current_player: u8,
    /// Completed-pair counter.
    pub steps: u32,
    /// First face-up tile of the turn in progress. Server-internal,
    /// only meaningful for the command-based flip path.
    #[serde(skip)]
    pub pending: Option<usize>,
}

impl GameState {
    /// Generate a fresh shuffled board: all tiles face-down, scores zero,
    /// player 1 to move.
    pub fn new() -> Self {
        let mut numbers: Vec<u8> = (0..BOARD_SIZE).map(|i| (i / 2) as u8 + 1).collect();
        shuffle(&mut numbers);
        GameState {
            numbers,
            flipped: vec![false; BOARD_SIZE],
            score_player1: 0,
            score_player2: 0,
            current_player: 1,
            steps: 0,
            pending: None,
        }
    }

    /// All sixteen tiles face-up, i.e. every pair has been matched.
    pub fn is_complete(&self) -> bool {
        self.flipped.iter().all(|&f| f)
    }

    /// Winner by score: `Some(1)` or `Some(2)`, `None` on a draw.
    pub fn winner(&self) -> Option<u8> {
        match self.score_player1.cmp(&self.score_player2) {
            std::cmp::Ordering::Greater => Some(1),
            std::cmp::Ordering::Less => Some(2),
            std::cmp::Ordering::Equal => None,
        }
    }
}

impl Default for GameState {
    fn default() -> Self {
        GameState::new()
    }
}

/// In-place Fisher-Yates shuffle.
fn shuffle(values: &mut [u8]) {
    let mut rng = rng();
    for i in (1..values.len()).rev() {
        let j = rng.random_range(0..=i);
        values.swap(i, j);
    }
}
