//! Value types shared by the engine bridge: positions, UCI move strings and
//! normalised engine scores.

pub mod position;
pub mod score;
pub mod uci_move;

pub use position::{Position, Side};
pub use score::{is_mate_score, Score, Wdl, MATE_SENTINEL};
pub use uci_move::{UciMove, UciMoveError};
