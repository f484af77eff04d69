//! Engine scores and their normalisation to pawn units.

use serde::{Deserialize, Serialize};

/// Lower bound of the mate band, in pawns.
pub const MATE_SENTINEL: f64 = 10_000.0;

/// Mate distances beyond this are treated as equally far.
const MAX_MATE_DISTANCE: i32 = 1_000;

/// Largest ordinary evaluation, kept strictly below the mate band.
const MAX_PAWN_SCORE: f64 = MATE_SENTINEL - 1.0;

/// Score as reported on an `info` line, from the side to move's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Score {
    /// Centipawns: positive favours the side to move.
    Centipawns(i32),
    /// Mate in N moves: positive = side to move mates, negative or zero =
    /// side to move gets mated.
    Mate(i32),
}

impl Score {
    /// Normalised evaluation in pawns.
    ///
    /// Mate scores land at or beyond `±MATE_SENTINEL` and shrink in magnitude
    /// as the mate gets further away, so mate-in-1 > mate-in-5 > any ordinary
    /// evaluation > getting mated in 5 > getting mated in 1.
    pub fn to_pawns(self) -> f64 {
        match self {
            Self::Centipawns(cp) => (cp as f64 / 100.0).clamp(-MAX_PAWN_SCORE, MAX_PAWN_SCORE),
            Self::Mate(n) => {
                let distance = n.unsigned_abs().min(MAX_MATE_DISTANCE as u32) as i32;
                let magnitude = MATE_SENTINEL + (MAX_MATE_DISTANCE - distance) as f64;
                if n > 0 {
                    magnitude
                } else {
                    -magnitude
                }
            }
        }
    }

    pub fn mate_distance(self) -> Option<i32> {
        match self {
            Self::Mate(n) => Some(n),
            Self::Centipawns(_) => None,
        }
    }
}

/// True if a normalised pawn score encodes a forced mate.
pub fn is_mate_score(pawns: f64) -> bool {
    pawns.abs() >= MATE_SENTINEL
}

/// Win/draw/loss probabilities in per mille, as some engines report with
/// `UCI_ShowWDL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wdl {
    pub win: u32,
    pub draw: u32,
    pub loss: u32,
}
