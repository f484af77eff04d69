//! Engine registry: which engines exist, how to launch them, and which pools
//! group them.
//!
//! Loaded once at startup and shared read-only (`Arc<Registry>`); tests build
//! their own from JSON fixtures.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Name of one configured engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineId(String);

impl EngineId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EngineId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// How an engine is run. Decides which launch path the adapter takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineFamily {
    /// Native UCI binary talking over stdio (Stockfish and friends).
    Native,
    /// The in-process engine bundled with this crate.
    Embedded,
    /// UCI binary with a slow network backend (lc0/Maia weights).
    Network,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Display name
    pub name: String,
    pub family: EngineFamily,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Executable path (unused for embedded engines)
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Extra process arguments, e.g. `--weights=maia-1500.pb.gz`
    #[serde(default)]
    pub args: Vec<String>,
    /// UCI options sent with `setoption` during the handshake
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

impl EngineConfig {
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The `MultiPV` value the engine runs with outside of candidate searches.
    pub fn multipv(&self) -> u32 {
        self.option("MultiPV")
            .and_then(|v| v.parse().ok())
            .filter(|n| *n >= 1)
            .unwrap_or(1)
    }
}

/// Named list of engines. Duplicates weigh an engine up for random selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub engines: Vec<EngineId>,
    /// Parallel to `engines`, only used by the weighted strategy
    #[serde(default)]
    pub weights: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    engines: HashMap<EngineId, EngineConfig>,
    #[serde(default)]
    pools: HashMap<String, PoolConfig>,
}

impl Registry {
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let registry: Self = serde_json::from_str(json)
            .map_err(|e| EngineError::Config(format!("Invalid engine registry: {e}")))?;
        registry.validate()?;
        Ok(registry)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read registry {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Registry used when no registry file is configured.
    pub fn builtin(stockfish_path: &str) -> Self {
        let threads = (num_cpus::get() / 2).max(1).to_string();

        let mut engines = HashMap::new();
        engines.insert(
            EngineId::new("stockfish"),
            EngineConfig {
                name: "Stockfish".to_string(),
                family: EngineFamily::Native,
                enabled: true,
                path: Some(PathBuf::from(stockfish_path)),
                args: Vec::new(),
                options: BTreeMap::from([
                    ("Threads".to_string(), threads),
                    ("Hash".to_string(), "256".to_string()),
                ]),
            },
        );
        engines.insert(
            EngineId::new("embedded"),
            EngineConfig {
                name: "Embedded".to_string(),
                family: EngineFamily::Embedded,
                enabled: true,
                path: None,
                args: Vec::new(),
                options: BTreeMap::new(),
            },
        );
        engines.insert(
            EngineId::new("embedded-casual"),
            EngineConfig {
                name: "Embedded (casual)".to_string(),
                family: EngineFamily::Embedded,
                enabled: true,
                path: None,
                args: Vec::new(),
                options: BTreeMap::from([("Temperature".to_string(), "60".to_string())]),
            },
        );

        let mut pools = HashMap::new();
        pools.insert(
            "default".to_string(),
            PoolConfig {
                engines: vec![EngineId::new("stockfish")],
                weights: None,
            },
        );
        pools.insert(
            "embedded".to_string(),
            PoolConfig {
                engines: vec![EngineId::new("embedded"), EngineId::new("embedded-casual")],
                weights: None,
            },
        );
        pools.insert(
            "mixed".to_string(),
            PoolConfig {
                engines: vec![EngineId::new("stockfish"), EngineId::new("embedded")],
                weights: Some(vec![3.0, 1.0]),
            },
        );

        Self { engines, pools }
    }

    pub fn engine(&self, id: &EngineId) -> Result<&EngineConfig, EngineError> {
        self.engines
            .get(id)
            .ok_or_else(|| EngineError::UnknownEngine(id.clone()))
    }

    pub fn pool(&self, name: &str) -> Result<&PoolConfig, EngineError> {
        self.pools
            .get(name)
            .ok_or_else(|| EngineError::UnknownPool(name.to_string()))
    }

    pub fn engine_ids(&self) -> impl Iterator<Item = &EngineId> {
        self.engines.keys()
    }

    /// Every pool member must name a configured engine.
    fn validate(&self) -> Result<(), EngineError> {
        for (name, pool) in &self.pools {
            for id in &pool.engines {
                if !self.engines.contains_key(id) {
                    return Err(EngineError::UnknownEngine(id.clone()));
                }
            }
            if pool.engines.is_empty() {
                return Err(EngineError::Config(format!("Pool {name} is empty")));
            }
        }
        Ok(())
    }
}
