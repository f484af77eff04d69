//! Bridge error types

use std::time::Duration;

use thiserror::Error;

use crate::registry::EngineId;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine {engine} did not answer {expected:?} within {waited:?}")]
    ProtocolTimeout {
        engine: EngineId,
        expected: &'static str,
        waited: Duration,
    },

    #[error("Search on {engine} exceeded {limit:?}")]
    SearchTimeout { engine: EngineId, limit: Duration },

    #[error("Engine {0} already has a search in flight")]
    ConcurrentSearch(EngineId),

    #[error("Engine {0} is not ready")]
    NotReady(EngineId),

    #[error("Failed to launch engine {engine}: {reason}")]
    Launch { engine: EngineId, reason: String },

    #[error("Unknown engine: {0}")]
    UnknownEngine(EngineId),

    #[error("Unknown pool: {0}")]
    UnknownPool(String),

    #[error("Every engine in pool {0} failed to initialize")]
    PoolExhausted(String),

    #[error("Engine {0} is disabled")]
    Disabled(EngineId),

    #[error("Engine {0} closed its output stream")]
    Disconnected(EngineId),

    #[error("Engine {0} reported no legal move")]
    NoLegalMove(EngineId),

    #[error("Engine {engine} sent an invalid move: {source}")]
    InvalidMove {
        engine: EngineId,
        #[source]
        source: chess_core::UciMoveError,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error talking to engine {engine}: {source}")]
    Io {
        engine: EngineId,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    /// Errors that leave the adapter usable for the next request.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SearchTimeout { .. } | Self::ConcurrentSearch(_) | Self::NoLegalMove(_)
        )
    }
}
