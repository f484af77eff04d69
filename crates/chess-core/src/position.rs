//! Board positions as handed to engines.

use std::fmt;

use serde::{Deserialize, Serialize};

/// FEN of the standard starting position.
pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Side to move as read from a FEN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

/// An opaque FEN string.
///
/// The bridge never validates positions; whatever the board source produced is
/// passed to the engine unchanged (apart from trimming surrounding whitespace).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(String);

impl Position {
    pub fn new(fen: impl Into<String>) -> Self {
        let fen = fen.into();
        let trimmed = fen.trim();
        if trimmed.len() == fen.len() {
            Self(fen)
        } else {
            Self(trimmed.to_string())
        }
    }

    pub fn startpos() -> Self {
        Self(STARTING_FEN.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Side to move, if the FEN carries a recognisable second field.
    pub fn side_to_move(&self) -> Option<Side> {
        match self.0.split_whitespace().nth(1) {
            Some("w") => Some(Side::White),
            Some("b") => Some(Side::Black),
            _ => None,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Position {
    fn from(fen: &str) -> Self {
        Self::new(fen)
    }
}

impl From<String> for Position {
    fn from(fen: String) -> Self {
        Self::new(fen)
    }
}
