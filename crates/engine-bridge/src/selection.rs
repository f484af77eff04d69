//! Engine selection strategies for pools.

use std::fmt;
use std::str::FromStr;

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionStrategy {
    /// Uniform over the member list; duplicates count twice
    Random,
    /// Round-robin in pool order
    Sequential,
    /// Cumulative-weight sampling over the pool's weights
    Weighted,
    /// Always the first member, never switches
    Single,
}

impl SelectionStrategy {
    pub fn allows_switching(self) -> bool {
        self != SelectionStrategy::Single
    }
}

impl FromStr for SelectionStrategy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "sequential" | "round-robin" | "roundrobin" => Ok(Self::Sequential),
            "weighted" => Ok(Self::Weighted),
            "single" | "fixed" => Ok(Self::Single),
            other => Err(EngineError::Config(format!("Unknown selection strategy: {other}"))),
        }
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Random => "random",
            Self::Sequential => "sequential",
            Self::Weighted => "weighted",
            Self::Single => "single",
        };
        f.write_str(name)
    }
}

/// Picks indices into a member list according to a strategy.
pub struct Selector {
    strategy: SelectionStrategy,
    /// Next index for the sequential strategy
    cursor: usize,
    rng: StdRng,
}

impl Selector {
    pub fn new(strategy: SelectionStrategy) -> Self {
        Self::with_rng(strategy, StdRng::from_entropy())
    }

    pub fn seeded(strategy: SelectionStrategy, seed: u64) -> Self {
        Self::with_rng(strategy, StdRng::seed_from_u64(seed))
    }

    fn with_rng(strategy: SelectionStrategy, rng: StdRng) -> Self {
        Self {
            strategy,
            cursor: 0,
            rng,
        }
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    /// Index of the next member, or `None` for an empty list.
    ///
    /// Weighted selection falls back to random when weights are missing,
    /// of the wrong length, or unusable (all zero, negative, NaN).
    pub fn pick(&mut self, len: usize, weights: Option<&[f64]>) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let index = match self.strategy {
            SelectionStrategy::Single => 0,
            SelectionStrategy::Sequential => {
                let index = self.cursor % len;
                self.cursor = index + 1;
                index
            }
            SelectionStrategy::Random => self.rng.gen_range(0..len),
            SelectionStrategy::Weighted => match weights
                .filter(|w| w.len() == len)
                .and_then(|w| WeightedIndex::new(w).ok())
            {
                Some(dist) => dist.sample(&mut self.rng),
                None => self.rng.gen_range(0..len),
            },
        };
        Some(index)
    }
}
