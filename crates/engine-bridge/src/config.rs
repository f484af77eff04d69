//! Runtime configuration from environment variables

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::adapter::AdapterSettings;
use crate::error::EngineError;
use crate::pool::PoolSettings;
use crate::record::SearchBudget;
use crate::registry::{EngineId, Registry};
use crate::selection::SelectionStrategy;

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// JSON registry file; the built-in registry is used when unset
    pub registry_path: Option<PathBuf>,

    /// Stockfish binary for the built-in registry
    pub stockfish_path: String,

    /// Pool driving autoplay
    pub pool: String,

    pub strategy: SelectionStrategy,

    /// Analyses between engine switches (0 = never)
    pub switch_interval: u32,

    /// Budget used when a request sets no limit
    pub default_budget: SearchBudget,

    /// Lines per engine in comparison mode
    pub candidate_lines: u32,

    pub adapter: AdapterSettings,

    /// Extra delay handed to the move sink
    pub move_delay: Option<Duration>,

    /// Label and engine pairs; non-empty selects comparison mode
    pub compare: Vec<(String, EngineId)>,
}

impl BridgeConfig {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self, EngineError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EngineError> {
        let registry_path = lookup("ENGINE_REGISTRY")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let stockfish_path = lookup("STOCKFISH_PATH")
            .unwrap_or_else(|| "/usr/local/bin/stockfish".to_string());

        let pool = lookup("ENGINE_POOL").unwrap_or_else(|| "default".to_string());

        let strategy = match lookup("SELECTION_STRATEGY") {
            Some(v) => v
                .parse()
                .map_err(|_| EngineError::Config(format!("unknown selection strategy '{v}'")))?,
            None => SelectionStrategy::Sequential,
        };

        let switch_interval = parse_or(&lookup, "SWITCH_INTERVAL", 10);

        // Same precedence as per-request options: time, then nodes, then depth
        let default_budget = if let Some(ms) = parse::<u64>(&lookup, "SEARCH_MOVETIME_MS") {
            SearchBudget::MoveTime(Duration::from_millis(ms.max(1)))
        } else if let Some(nodes) = parse::<u64>(&lookup, "SEARCH_NODES") {
            SearchBudget::Nodes(nodes.max(1))
        } else {
            SearchBudget::Depth(parse_or(&lookup, "SEARCH_DEPTH", 15u32).max(1))
        };

        let candidate_lines = parse_or(&lookup, "CANDIDATE_LINES", 3u32).max(1);

        let defaults = AdapterSettings::default();
        let adapter = AdapterSettings {
            handshake_timeout: millis_or(
                &lookup,
                "HANDSHAKE_TIMEOUT_MS",
                defaults.handshake_timeout,
            ),
            network_handshake_timeout: millis_or(
                &lookup,
                "NETWORK_HANDSHAKE_TIMEOUT_MS",
                defaults.network_handshake_timeout,
            ),
            search_margin: millis_or(&lookup, "SEARCH_MARGIN_MS", defaults.search_margin),
            open_search_timeout: millis_or(
                &lookup,
                "OPEN_SEARCH_TIMEOUT_MS",
                defaults.open_search_timeout,
            ),
            quit_grace: defaults.quit_grace,
        };

        let move_delay = parse::<u64>(&lookup, "MOVE_DELAY_MS").map(Duration::from_millis);

        let compare = match lookup("COMPARE_ENGINES") {
            Some(v) => parse_participants(&v)?,
            None => Vec::new(),
        };

        Ok(Self {
            registry_path,
            stockfish_path,
            pool,
            strategy,
            switch_interval,
            default_budget,
            candidate_lines,
            adapter,
            move_delay,
            compare,
        })
    }

    pub fn registry(&self) -> Result<Registry, EngineError> {
        match &self.registry_path {
            Some(path) => {
                info!(path = %path.display(), "Loading engine registry");
                Registry::from_file(path)
            }
            None => Ok(Registry::builtin(&self.stockfish_path)),
        }
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            strategy: self.strategy,
            switch_interval: self.switch_interval,
            adapter: self.adapter,
            default_budget: self.default_budget,
        }
    }

    pub fn compare_mode(&self) -> bool {
        !self.compare.is_empty()
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    parse(lookup, key).unwrap_or(default)
}

fn millis_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    parse::<u64>(lookup, key)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Parse `label=engine,label=engine`. A bare `engine` is its own label.
fn parse_participants(value: &str) -> Result<Vec<(String, EngineId)>, EngineError> {
    let mut participants = Vec::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (label, id) = match entry.split_once('=') {
            Some((label, id)) => (label.trim(), id.trim()),
            None => (entry, entry),
        };
        if label.is_empty() || id.is_empty() {
            return Err(EngineError::Config(format!("bad COMPARE_ENGINES entry '{entry}'")));
        }
        participants.push((label.to_string(), EngineId::new(id)));
    }
    Ok(participants)
}
