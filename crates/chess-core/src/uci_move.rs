//! UCI long algebraic move strings (`e2e4`, `e7e8q`).

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static UCI_MOVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-h][1-8])([a-h][1-8])([qrbn])?$").unwrap());

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UciMoveError {
    #[error("Not a UCI move: {0:?}")]
    Malformed(String),

    #[error("Engine reported no move")]
    NullMove,
}

/// A move in UCI notation: origin square, destination square and an optional
/// promotion piece.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UciMove {
    from: String,
    to: String,
    promotion: Option<char>,
}

impl UciMove {
    /// Tokens engines use for "no move" (`bestmove (none)` when mated or
    /// stalemated).
    pub fn is_null_token(token: &str) -> bool {
        matches!(token, "(none)" | "0000" | "none")
    }

    pub fn from_square(&self) -> &str {
        &self.from
    }

    pub fn to_square(&self) -> &str {
        &self.to
    }

    pub fn promotion(&self) -> Option<char> {
        self.promotion
    }
}

impl FromStr for UciMove {
    type Err = UciMoveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if Self::is_null_token(s) {
            return Err(UciMoveError::NullMove);
        }
        let caps = UCI_MOVE_RE
            .captures(s)
            .ok_or_else(|| UciMoveError::Malformed(s.to_string()))?;
        Ok(Self {
            from: caps[1].to_string(),
            to: caps[2].to_string(),
            promotion: caps.get(3).and_then(|m| m.as_str().chars().next()),
        })
    }
}

impl TryFrom<String> for UciMove {
    type Error = UciMoveError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<UciMove> for String {
    fn from(m: UciMove) -> Self {
        m.to_string()
    }
}

impl fmt::Display for UciMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(p) = self.promotion {
            write!(f, "{p}")?;
        }
        Ok(())
    }
}
