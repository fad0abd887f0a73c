use thiserror::Error;

use crate::game::{BOARD_SIZE, GameState};

/// Why a full-state submission was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// The submitted `numbers` array does not mirror the canonical board.
    #[error("submitted numbers do not match the canonical board")]
    DesynchronizedState,
    /// More than two positions transitioned face-up in one submission,
    /// or the submitted arrays have the wrong length.
    #[error("malformed flip submission")]
    MalformedFlip,
}

/// Why a flip command was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FlipError {
    #[error("not this player's turn")]
    NotYourTurn,
    #[error("tile index out of range")]
    OutOfRange,
    #[error("tile is already face-up")]
    AlreadyFaceUp,
}

/// What a flip command did to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipOutcome {
    /// First tile of the turn turned face-up; waiting for the second.
    FirstFlip,
    /// Second tile matched the first: point scored, turn retained.
    Matched { finished: bool },
    /// Second tile did not match: both forced face-down, turn passed.
    Mismatched,
}

/// Reconcile a client-submitted full state against the previous canonical
/// state.
///
/// The submission is a full mirror of the board, not a patch. Positions that
/// transitioned false -> true since `prev` are the newly-flipped set:
/// zero or one newly-flipped tiles are accepted as-is, exactly two resolve a
/// turn (mismatching values are forced back face-down and the turn passes),
/// and anything more is rejected. Re-flips of already face-up tiles are
/// absorbed by the diff and count as no change.
pub fn reconcile(prev: &GameState, submitted: GameState) -> Result<GameState, ReconcileError> {
    if submitted.numbers != prev.numbers {
        return Err(ReconcileError::DesynchronizedState);
    }
    if submitted.flipped.len() != BOARD_SIZE || !matches!(submitted.current_player, 1 | 2) {
        return Err(ReconcileError::MalformedFlip);
    }

    let newly_flipped: Vec<usize> = submitted
        .flipped
        .iter()
        .zip(prev.flipped.iter())
        .enumerate()
        .filter(|(_, (now, before))| **now && !**before)
        .map(|(i, _)| i)
        .collect();

    let mut next = submitted;
    match newly_flipped.as_slice() {
        [] | [_] => {}
        [a, b] => {
            if next.numbers[*a] != next.numbers[*b] {
                next.flipped[*a] = false;
                next.flipped[*b] = false;
                next.current_player = 3 - next.current_player;
            }
            // Matching values: accepted unchanged; the submitting client
            // already applied score and turn retention.
        }
        _ => return Err(ReconcileError::MalformedFlip),
    }
    next.pending = None;
    Ok(next)
}

/// Apply a server-validated flip command for the given seat (1 or 2).
///
/// Scores, steps and turn order are computed here rather than trusted from
/// the client. The first flip of a turn is remembered in `state.pending`;
/// the second resolves the pair.
pub fn apply_flip(state: &mut GameState, seat: u8, index: usize) -> Result<FlipOutcome, FlipError> {
    if seat != state.current_player {
        return Err(FlipError::NotYourTurn);
    }
    if index >= BOARD_SIZE {
        return Err(FlipError::OutOfRange);
    }
    if state.flipped[index] {
        return Err(FlipError::AlreadyFaceUp);
    }

    state.flipped[index] = true;

    let first = match state.pending.take() {
        None => {
            state.pending = Some(index);
            return Ok(FlipOutcome::FirstFlip);
        }
        Some(first) => first,
    };

    state.steps += 1;
    if state.numbers[first] == state.numbers[index] {
        if state.current_player == 1 {
            state.score_player1 += 1;
        } else {
            state.score_player2 += 1;
        }
        Ok(FlipOutcome::Matched {
            finished: state.is_complete(),
        })
    } else {
        state.flipped[first] = false;
        state.flipped[index] = false;
        state.current_player = 3 - state.current_player;
        Ok(FlipOutcome::Mismatched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A board with a known layout: numbers[2i] == numbers[2i+1] == i+1.
    fn ordered_state() -> GameState {
        GameState {
            numbers: (0..BOARD_SIZE).map(|i| (i / 2) as u8 + 1).collect(),
            flipped: vec![false; BOARD_SIZE],
            score_player1: 0,
            score_player2: 0,
            current_player: 1,
            steps: 0,
            pending: None,
        }
    }

    #[test]
    fn mismatched_pair_flips_back_and_switches_turn() {
        let prev = ordered_state();
        let mut submitted = prev.clone();
        // Tiles 0 and 2 hold values 1 and 2.
        submitted.flipped[0] = true;
        submitted.flipped[2] = true;

        let next = reconcile(&prev, submitted).unwrap();
        assert!(!next.flipped[0]);
        assert!(!next.flipped[2]);
        assert_eq!(next.current_player, 2);
    }

    #[test]
    fn matched_pair_is_accepted_unchanged() {
        let prev = ordered_state();
        let mut submitted = prev.clone();
        // Tiles 0 and 1 both hold value 1; client kept the turn and scored.
        submitted.flipped[0] = true;
        submitted.flipped[1] = true;
        submitted.score_player1 = 1;
        submitted.steps = 1;

        let next = reconcile(&prev, submitted.clone()).unwrap();
        assert_eq!(next, submitted);
        assert_eq!(next.current_player, 1);
    }

    #[test]
    fn single_flip_is_accepted_as_is() {
        let prev = ordered_state();
        let mut submitted = prev.clone();
        submitted.flipped[5] = true;

        let next = reconcile(&prev, submitted.clone()).unwrap();
        assert_eq!(next, submitted);
    }

    #[test]
    fn identical_resubmission_changes_nothing() {
        let mut prev = ordered_state();
        prev.flipped[0] = true;
        prev.flipped[1] = true;
        prev.score_player1 = 1;

        let next = reconcile(&prev, prev.clone()).unwrap();
        assert_eq!(next, prev);
    }

    #[test]
    fn three_new_flips_are_malformed() {
        let prev = ordered_state();
        let mut submitted = prev.clone();
        submitted.flipped[0] = true;
        submitted.flipped[3] = true;
        submitted.flipped[7] = true;

        assert_eq!(
            reconcile(&prev, submitted),
            Err(ReconcileError::MalformedFlip)
        );
    }

    #[test]
    fn foreign_numbers_are_desynchronized() {
        let prev = ordered_state();
        let mut submitted = prev.clone();
        submitted.numbers.swap(0, 2);

        assert_eq!(
            reconcile(&prev, submitted),
            Err(ReconcileError::DesynchronizedState)
        );
    }

    #[test]
    fn bad_current_player_is_rejected() {
        let prev = ordered_state();
        let mut submitted = prev.clone();
        submitted.current_player = 5;

        assert_eq!(
            reconcile(&prev, submitted),
            Err(ReconcileError::MalformedFlip)
        );
    }

    #[test]
    fn flip_rejects_out_of_turn_and_out_of_range() {
        let mut state = ordered_state();
        assert_eq!(apply_flip(&mut state, 2, 0), Err(FlipError::NotYourTurn));
        assert_eq!(
            apply_flip(&mut state, 1, BOARD_SIZE),
            Err(FlipError::OutOfRange)
        );
    }

    #[test]
    fn flip_rejects_face_up_tile() {
        let mut state = ordered_state();
        apply_flip(&mut state, 1, 0).unwrap();
        assert_eq!(apply_flip(&mut state, 1, 0), Err(FlipError::AlreadyFaceUp));
    }

    #[test]
    fn matching_flip_pair_scores_and_keeps_turn() {
        let mut state = ordered_state();
        assert_eq!(apply_flip(&mut state, 1, 0), Ok(FlipOutcome::FirstFlip));
        assert_eq!(
            apply_flip(&mut state, 1, 1),
            Ok(FlipOutcome::Matched { finished: false })
        );
        assert_eq!(state.score_player1, 1);
        assert_eq!(state.current_player, 1);
        assert_eq!(state.steps, 1);
        assert!(state.flipped[0] && state.flipped[1]);
    }

    #[test]
    fn mismatching_flip_pair_passes_turn() {
        let mut state = ordered_state();
        apply_flip(&mut state, 1, 0).unwrap();
        assert_eq!(apply_flip(&mut state, 1, 2), Ok(FlipOutcome::Mismatched));
        assert_eq!(state.current_player, 2);
        assert_eq!(state.score_player1, 0);
        assert!(!state.flipped[0] && !state.flipped[2]);
        assert_eq!(state.steps, 1);
    }

    #[test]
    fn clearing_the_board_reports_finished() {
        let mut state = ordered_state();
        for pair in 0..8 {
            let seat = state.current_player;
            apply_flip(&mut state, seat, pair * 2).unwrap();
            let outcome = apply_flip(&mut state, seat, pair * 2 + 1).unwrap();
            if pair == 7 {
                assert_eq!(outcome, FlipOutcome::Matched { finished: true });
            }
        }
        assert!(state.is_complete());
        assert_eq!(state.score_player1, 8);
        assert_eq!(state.winner(), Some(1));
        assert_eq!(state.steps, 8);
    }
}
