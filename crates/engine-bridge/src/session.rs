//! Glue between the engines and the outside world: where positions come
//! from, where moves go, and who renders the analysis.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chess_core::{is_mate_score, Position, UciMove};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::coordinator::{ComparisonReport, Coordinator};
use crate::pool::EnginePool;
use crate::record::{AnalysisResult, SearchOptions};

/// Supplies the position to analyse next. `None` means the source is closed.
#[async_trait]
pub trait BoardSource: Send {
    async fn next_position(&mut self) -> Option<Position>;
}

/// Plays a move on the board. Returns whether it went through; failed moves
/// are not retried.
#[async_trait]
pub trait MoveSink: Send {
    async fn execute(&mut self, mv: &UciMove, delay: Option<Duration>) -> bool;
}

pub trait AnalysisDisplay: Send {
    fn show_analysis(&mut self, result: &AnalysisResult);

    fn show_comparison(&mut self, report: &ComparisonReport);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AutoplayStats {
    pub positions: u64,
    pub skipped: u64,
    pub analyzed: u64,
    pub failed: u64,
    pub moves_played: u64,
    pub moves_rejected: u64,
}

/// Analyse every new position with a pool and play the best move.
pub struct Autoplay<B, M, D> {
    pool: Arc<EnginePool>,
    source: B,
    sink: M,
    display: D,
    options: SearchOptions,
    move_delay: Option<Duration>,
    last: Option<Position>,
    stats: AutoplayStats,
}

impl<B, M, D> Autoplay<B, M, D>
where
    B: BoardSource,
    M: MoveSink,
    D: AnalysisDisplay,
{
    pub fn new(pool: Arc<EnginePool>, source: B, sink: M, display: D) -> Self {
        Self {
            pool,
            source,
            sink,
            display,
            options: SearchOptions::default(),
            move_delay: None,
            last: None,
            stats: AutoplayStats::default(),
        }
    }

    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_move_delay(mut self, delay: Option<Duration>) -> Self {
        self.move_delay = delay;
        self
    }

    pub fn stats(&self) -> AutoplayStats {
        self.stats
    }

    /// Run until the board source closes.
    pub async fn run(&mut self) -> AutoplayStats {
        while let Some(position) = self.source.next_position().await {
            self.stats.positions += 1;
            if self.last.as_ref() == Some(&position) {
                self.stats.skipped += 1;
                debug!(fen = %position, "Position unchanged, skipping");
                continue;
            }
            self.last = Some(position.clone());
            self.play(position).await;
        }
        info!(
            analyzed = self.stats.analyzed,
            played = self.stats.moves_played,
            failed = self.stats.failed,
            "Board source closed"
        );
        self.stats
    }

    async fn play(&mut self, position: Position) {
        let result = match self.pool.analyze_position(position, &self.options).await {
            Ok(result) => result,
            Err(e) => {
                self.stats.failed += 1;
                warn!(pool = self.pool.name(), error = %e, "Analysis failed");
                if !e.is_recoverable() {
                    self.pool.evict_current().await;
                }
                return;
            }
        };
        self.stats.analyzed += 1;

        let best = &result.best;
        if is_mate_score(best.score) {
            info!(engine = %result.engine, mv = %best.mv, mate = ?best.mate, "Best move");
        } else {
            info!(
                engine = %result.engine,
                mv = %best.mv,
                score = best.score,
                depth = best.depth,
                "Best move"
            );
        }
        self.display.show_analysis(&result);

        if self.sink.execute(&best.mv, self.move_delay).await {
            self.stats.moves_played += 1;
        } else {
            self.stats.moves_rejected += 1;
            warn!(mv = %best.mv, "Move was not played");
        }
    }
}

/// Feed every new position to a coordinator and display the comparison.
/// Returns the number of positions compared.
pub async fn run_comparisons<B, D>(
    coordinator: &Coordinator,
    source: &mut B,
    display: &mut D,
    options: &SearchOptions,
) -> u64
where
    B: BoardSource,
    D: AnalysisDisplay,
{
    let mut last: Option<Position> = None;
    let mut compared = 0;
    while let Some(position) = source.next_position().await {
        if last.as_ref() == Some(&position) {
            continue;
        }
        let report = coordinator.analyze(&position, options).await;
        match &report.consensus.consensus_move {
            Some(mv) => info!(
                consensus = %mv,
                strength = ?report.consensus.strength,
                divergence = ?report.consensus.divergence,
                "Engines compared"
            ),
            None => warn!(fen = %position, "No engine produced a move"),
        }
        display.show_comparison(&report);
        compared += 1;
        last = Some(position);
    }
    compared
}
