//! Side-by-side analysis: several engines on one position, with agreement
//! statistics over their best moves.

use std::sync::Arc;

use chess_core::{Position, UciMove};
use futures::future::join_all;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::adapter::{AdapterSettings, EngineAdapter};
use crate::error::EngineError;
use crate::record::{
    renumber, AnalysisResult, MoveRecord, SearchBudget, SearchOptions, SearchRequest,
};
use crate::registry::{EngineId, Registry};

/// Candidate lines requested from every participant.
pub const CANDIDATE_LINES: u32 = 3;

struct Participant {
    label: String,
    adapter: Arc<EngineAdapter>,
}

/// One engine's share of a comparison. `result` is `None` when the unit failed.
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub label: String,
    pub engine: EngineId,
    pub result: Option<AnalysisResult>,
    pub candidates: Vec<MoveRecord>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveTally {
    #[serde(rename = "move")]
    pub mv: UciMove,
    pub count: usize,
}

/// Agreement over the successful units. Everything is `None` when no unit
/// produced a move.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Consensus {
    pub consensus_move: Option<UciMove>,
    pub strength: Option<f64>,
    pub divergence: Option<f64>,
    /// In first-seen order
    pub tally: Vec<MoveTally>,
    pub successful: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub position: Position,
    pub units: Vec<UnitReport>,
    pub consensus: Consensus,
}

/// Tally best moves and derive consensus strength and divergence.
///
/// Ties go to the move seen first.
pub fn consensus<'a>(moves: impl IntoIterator<Item = &'a UciMove>) -> Consensus {
    let mut tally: Vec<MoveTally> = Vec::new();
    let mut successful = 0usize;

    for mv in moves {
        successful += 1;
        match tally.iter_mut().find(|t| &t.mv == mv) {
            Some(entry) => entry.count += 1,
            None => tally.push(MoveTally {
                mv: mv.clone(),
                count: 1,
            }),
        }
    }

    if successful == 0 {
        return Consensus {
            consensus_move: None,
            strength: None,
            divergence: None,
            tally,
            successful,
        };
    }

    // first maximum wins
    let mut winner = &tally[0];
    for entry in &tally[1..] {
        if entry.count > winner.count {
            winner = entry;
        }
    }

    let n = successful as f64;
    Consensus {
        consensus_move: Some(winner.mv.clone()),
        strength: Some(winner.count as f64 / n),
        divergence: Some((tally.len() - 1) as f64 / n),
        tally,
        successful,
    }
}

pub struct Coordinator {
    participants: Vec<Participant>,
    candidate_lines: u32,
    default_budget: SearchBudget,
}

impl Coordinator {
    /// Start every `(label, engine)` pair concurrently. Engines that fail to
    /// start are logged and left out.
    pub async fn launch(
        registry: &Registry,
        participants: &[(String, EngineId)],
        settings: AdapterSettings,
        default_budget: SearchBudget,
    ) -> Result<Self, EngineError> {
        let launches = participants.iter().map(|(label, id)| async move {
            let outcome = match registry.engine(id) {
                Ok(config) => EngineAdapter::launch(id.clone(), config, settings).await,
                Err(e) => Err(e),
            };
            (label, id, outcome)
        });

        let mut started = Vec::new();
        for (label, id, outcome) in join_all(launches).await {
            match outcome {
                Ok(adapter) => started.push((label.clone(), Arc::new(adapter))),
                Err(e) => warn!(
                    label = %label,
                    engine = %id,
                    error = %e,
                    "Comparison engine failed to start"
                ),
            }
        }

        if started.is_empty() {
            return Err(EngineError::PoolExhausted("comparison".to_string()));
        }
        info!(engines = started.len(), "Comparison engines ready");
        Ok(Self::from_adapters(started, default_budget))
    }

    /// Build from adapters that are already running.
    pub fn from_adapters(
        adapters: Vec<(String, Arc<EngineAdapter>)>,
        default_budget: SearchBudget,
    ) -> Self {
        Self {
            participants: adapters
                .into_iter()
                .map(|(label, adapter)| Participant { label, adapter })
                .collect(),
            candidate_lines: CANDIDATE_LINES,
            default_budget,
        }
    }

    pub fn with_candidate_lines(mut self, count: u32) -> Self {
        self.candidate_lines = count.max(1);
        self
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.participants.iter().map(|p| p.label.as_str())
    }

    /// Run every participant on `position` at once and report their
    /// agreement. Never fails as a whole; broken units carry their error.
    pub async fn analyze(&self, position: &Position, options: &SearchOptions) -> ComparisonReport {
        let budget = options.resolve(self.default_budget);
        let units = join_all(
            self.participants
                .iter()
                .map(|p| self.run_unit(p, position, budget)),
        )
        .await;

        let consensus = consensus(
            units
                .iter()
                .filter_map(|u| u.result.as_ref().map(|r| &r.best.mv)),
        );

        ComparisonReport {
            position: position.clone(),
            units,
            consensus,
        }
    }

    pub async fn quit(&self) {
        join_all(self.participants.iter().map(|p| p.adapter.quit())).await;
    }

    async fn run_unit(
        &self,
        participant: &Participant,
        position: &Position,
        budget: SearchBudget,
    ) -> UnitReport {
        let started = Instant::now();
        let adapter = &participant.adapter;

        let outcome = async {
            let primary = adapter
                .search(&SearchRequest::new(position.clone(), budget))
                .await?;
            let reduced = SearchRequest::new(position.clone(), budget.reduced());
            let mut candidates = adapter
                .search_multi_variation(self.candidate_lines, &reduced)
                .await?;
            renumber(&mut candidates);
            Ok::<_, EngineError>((primary, candidates))
        }
        .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok((result, candidates)) => UnitReport {
                label: participant.label.clone(),
                engine: adapter.id().clone(),
                result: Some(result),
                candidates,
                error: None,
                elapsed_ms,
            },
            Err(e) => {
                warn!(
                    label = %participant.label,
                    engine = %adapter.id(),
                    error = %e,
                    "Comparison unit failed"
                );
                UnitReport {
                    label: participant.label.clone(),
                    engine: adapter.id().clone(),
                    result: None,
                    candidates: Vec::new(),
                    error: Some(e.to_string()),
                    elapsed_ms,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(s: &str) -> UciMove {
        s.parse().unwrap()
    }

    #[test]
    fn test_two_against_one() {
        let moves = [mv("e2e4"), mv("e2e4"), mv("d2d4")];
        let c = consensus(&moves);

        assert_eq!(c.consensus_move, Some(mv("e2e4")));
        assert_eq!(c.successful, 3);
        assert!((c.strength.unwrap() - 2.0 / 3.0).abs() < 1e-9);
        assert!((c.divergence.unwrap() - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(
            c.tally,
            vec![
                MoveTally { mv: mv("e2e4"), count: 2 },
                MoveTally { mv: mv("d2d4"), count: 1 },
            ]
        );
    }

    #[test]
    fn test_no_results() {
        let c = consensus(std::iter::empty());
        assert_eq!(c.consensus_move, None);
        assert_eq!(c.strength, None);
        assert_eq!(c.divergence, None);
        assert_eq!(c.successful, 0);
    }

    #[test]
    fn test_unanimous() {
        let moves = [mv("g1f3"), mv("g1f3")];
        let c = consensus(&moves);
        assert_eq!(c.strength, Some(1.0));
        assert_eq!(c.divergence, Some(0.0));
    }

    #[test]
    fn test_tie_goes_to_first_seen() {
        let moves = [mv("c2c4"), mv("e2e4"), mv("e2e4"), mv("c2c4")];
        let c = consensus(&moves);
        assert_eq!(c.consensus_move, Some(mv("c2c4")));
        assert_eq!(c.strength, Some(0.5));
        assert_eq!(c.divergence, Some(0.25));
    }
}
