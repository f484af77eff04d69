//! Engine bridge
//!
//! Reads FEN lines from stdin, analyses them with an engine pool (or several
//! engines side by side when COMPARE_ENGINES is set) and prints JSON results
//! to stdout. Logs go to stderr.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chess_core::{Position, UciMove};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{error, info};

use engine_bridge::session::run_comparisons;
use engine_bridge::{
    AnalysisDisplay, AnalysisResult, Autoplay, BoardSource, BridgeConfig, ComparisonReport,
    Coordinator, EnginePool, MoveSink, SearchOptions,
};

/// One FEN per line; blank lines are ignored.
struct StdinSource {
    lines: Lines<BufReader<Stdin>>,
}

#[async_trait]
impl BoardSource for StdinSource {
    async fn next_position(&mut self) -> Option<Position> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Some(Position::new(line)),
                Ok(None) => return None,
                Err(e) => {
                    error!(error = %e, "Failed to read stdin");
                    return None;
                }
            }
        }
    }
}

/// Stands in for a board that plays moves: waits the delay and logs.
struct LoggingSink;

#[async_trait]
impl MoveSink for LoggingSink {
    async fn execute(&mut self, mv: &UciMove, delay: Option<Duration>) -> bool {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        info!(mv = %mv, "Playing move");
        true
    }
}

struct JsonDisplay;

impl JsonDisplay {
    fn print<T: serde::Serialize>(value: &T) {
        match serde_json::to_string(value) {
            Ok(json) => println!("{json}"),
            Err(e) => error!(error = %e, "Failed to serialize result"),
        }
    }
}

impl AnalysisDisplay for JsonDisplay {
    fn show_analysis(&mut self, result: &AnalysisResult) {
        Self::print(result);
    }

    fn show_comparison(&mut self, report: &ComparisonReport) {
        Self::print(report);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file for local dev
    let _ = dotenvy::dotenv();

    // stdout carries results, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = BridgeConfig::load()?;
    let registry = Arc::new(config.registry()?);
    info!(engines = registry.engine_ids().count(), "Engine registry loaded");
    let mut source = StdinSource {
        lines: BufReader::new(tokio::io::stdin()).lines(),
    };
    let options = SearchOptions::default();

    if config.compare_mode() {
        info!(
            engines = config.compare.len(),
            budget = ?config.default_budget,
            "Starting comparison mode"
        );
        let coordinator =
            Coordinator::launch(&registry, &config.compare, config.adapter, config.default_budget)
                .await?
                .with_candidate_lines(config.candidate_lines);

        let compared = run_comparisons(&coordinator, &mut source, &mut JsonDisplay, &options).await;
        coordinator.quit().await;
        info!(compared, "Done");
        return Ok(());
    }

    info!(
        pool = %config.pool,
        strategy = %config.strategy,
        switch_interval = config.switch_interval,
        budget = ?config.default_budget,
        "Starting autoplay"
    );
    let pool = Arc::new(EnginePool::new(registry, &config.pool, config.pool_settings())?);
    pool.initialize().await?;

    let mut autoplay = Autoplay::new(pool.clone(), source, LoggingSink, JsonDisplay)
        .with_options(options)
        .with_move_delay(config.move_delay);
    let stats = autoplay.run().await;

    pool.cleanup().await;
    info!(
        positions = stats.positions,
        played = stats.moves_played,
        failed = stats.failed,
        "Done"
    );
    Ok(())
}
