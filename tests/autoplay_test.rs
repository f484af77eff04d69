//! Autoplay loop with in-memory collaborators.

mod common;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chess_core::{Position, UciMove};
use common::{fast_settings, test_registry, START_FEN};
use engine_bridge::{
    AnalysisDisplay, AnalysisResult, Autoplay, BoardSource, ComparisonReport, EnginePool,
    MoveSink, PoolSettings, SearchBudget, SelectionStrategy,
};

const AFTER_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1";

struct Script(VecDeque<Position>);

#[async_trait]
impl BoardSource for Script {
    async fn next_position(&mut self) -> Option<Position> {
        self.0.pop_front()
    }
}

#[derive(Clone, Default)]
struct Recorder {
    moves: Arc<Mutex<Vec<(String, Option<Duration>)>>>,
    accept: bool,
}

#[async_trait]
impl MoveSink for Recorder {
    async fn execute(&mut self, mv: &UciMove, delay: Option<Duration>) -> bool {
        self.moves.lock().unwrap().push((mv.to_string(), delay));
        self.accept
    }
}

#[derive(Clone, Default)]
struct Screen(Arc<Mutex<Vec<String>>>);

impl AnalysisDisplay for Screen {
    fn show_analysis(&mut self, result: &AnalysisResult) {
        self.0.lock().unwrap().push(result.best.mv.to_string());
    }

    fn show_comparison(&mut self, _report: &ComparisonReport) {}
}

fn positions(fens: &[&str]) -> Script {
    Script(fens.iter().map(|f| Position::new(*f)).collect())
}

fn embedded_pool(name: &str) -> Arc<EnginePool> {
    let settings = PoolSettings {
        strategy: SelectionStrategy::Sequential,
        switch_interval: 0,
        adapter: fast_settings(),
        default_budget: SearchBudget::Depth(1),
    };
    Arc::new(EnginePool::seeded(Arc::new(test_registry()), name, settings, 7).unwrap())
}

#[tokio::test]
async fn test_plays_each_new_position_once() {
    let pool = embedded_pool("rotation");
    let sink = Recorder {
        accept: true,
        ..Recorder::default()
    };
    let screen = Screen::default();

    let mut autoplay = Autoplay::new(
        pool.clone(),
        positions(&[START_FEN, START_FEN, AFTER_E4]),
        sink.clone(),
        screen.clone(),
    )
    .with_move_delay(Some(Duration::from_millis(10)));
    let stats = autoplay.run().await;

    assert_eq!(stats.positions, 3);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.analyzed, 2);
    assert_eq!(stats.moves_played, 2);
    assert_eq!(stats.failed, 0);

    let moves = sink.moves.lock().unwrap().clone();
    assert_eq!(moves.len(), 2);
    assert!(moves.iter().all(|(_, d)| *d == Some(Duration::from_millis(10))));
    assert_eq!(
        screen.0.lock().unwrap().clone(),
        moves.iter().map(|(m, _)| m.clone()).collect::<Vec<_>>()
    );

    pool.cleanup().await;
}

#[tokio::test]
async fn test_rejected_moves_are_not_retried() {
    let pool = embedded_pool("rotation");
    let sink = Recorder::default();

    let mut autoplay =
        Autoplay::new(pool.clone(), positions(&[START_FEN]), sink.clone(), Screen::default());
    let stats = autoplay.run().await;

    assert_eq!(stats.moves_rejected, 1);
    assert_eq!(stats.moves_played, 0);
    assert_eq!(sink.moves.lock().unwrap().len(), 1);

    pool.cleanup().await;
}

#[tokio::test]
async fn test_analysis_errors_do_not_stop_the_loop() {
    let pool = embedded_pool("dead");
    let sink = Recorder {
        accept: true,
        ..Recorder::default()
    };

    let mut autoplay = Autoplay::new(
        pool,
        positions(&[START_FEN, AFTER_E4]),
        sink.clone(),
        Screen::default(),
    );
    let stats = autoplay.run().await;

    assert_eq!(stats.positions, 2);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.analyzed, 0);
    assert!(sink.moves.lock().unwrap().is_empty());
}
