//! Game-termination queries shared by the runner and the PGN codec.

use shakmaty::{Chess, Color, Position};

/// True when no further play is possible without a draw claim: checkmate,
/// stalemate, insufficient material, or the 75-move rule.
#[must_use]
pub fn is_terminal(pos: &Chess) -> bool {
    pos.is_game_over() || pos.halfmoves() >= 150
}

/// PGN result token for a position: `1-0`, `0-1`, `1/2-1/2`, or `*` when
/// the game is still open.
#[must_use]
pub fn result_token(pos: &Chess) -> &'static str {
    if pos.is_checkmate() {
        match pos.turn() {
            Color::White => "0-1",
            Color::Black => "1-0",
        }
    } else if is_terminal(pos) {
        "1/2-1/2"
    } else {
        "*"
    }
}
