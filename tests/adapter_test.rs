//! Adapter behaviour against a scripted UCI engine on an in-memory pipe.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chess_core::Position;
use common::{
    fake_config, fast_settings, scripted_adapter, spawn_scripted, CommandLog, Go, START_FEN,
};
use engine_bridge::{
    AdapterSettings, EngineAdapter, EngineError, EngineFamily, EngineId, SearchBudget,
    SearchRequest,
};

fn depth(n: u32) -> SearchRequest {
    SearchRequest::new(Position::new(START_FEN), SearchBudget::Depth(n))
}

#[tokio::test]
async fn test_handshake_applies_options_in_order() {
    let (adapter, log) = scripted_adapter(Vec::new(), &[("Threads", "2"), ("Hash", "16")]).await;

    assert!(adapter.is_ready());
    assert_eq!(adapter.name(), "Scripted");
    assert_eq!(
        log.all(),
        vec![
            "uci",
            "setoption name Hash value 16",
            "setoption name Threads value 2",
            "isready",
        ]
    );
}

#[tokio::test]
async fn test_handshake_timeout() {
    let log = CommandLog::default();
    let (reader, writer) = spawn_scripted(Vec::new(), false, log.clone());

    let err = EngineAdapter::connect(
        EngineId::new("silent"),
        &fake_config(&[]),
        reader,
        writer,
        fast_settings(),
    )
    .await
    .err()
    .expect("silent engine must not complete the handshake");

    match err {
        EngineError::ProtocolTimeout { expected, .. } => assert_eq!(expected, "uciok"),
        other => panic!("expected ProtocolTimeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_search_collects_info_and_bestmove() {
    let (adapter, log) = scripted_adapter(
        vec![Go::Reply(vec![
            "info depth 4 seldepth 6 multipv 1 score cp 20 nodes 900 nps 45000 pv d2d4 d7d5",
            "info depth 5 seldepth 7 multipv 1 score cp 34 nodes 1000 nps 50000 pv e2e4 e7e5",
            "bestmove e2e4 ponder e7e5",
        ])],
        &[],
    )
    .await;

    let result = adapter.search(&depth(5)).await.unwrap();

    assert_eq!(result.best.mv.to_string(), "e2e4");
    assert_eq!(result.best.depth, 5);
    assert_eq!(result.best.seldepth, 7);
    assert!((result.best.score - 0.34).abs() < 1e-9);
    assert_eq!(result.best.mate, None);
    assert_eq!(result.ponder.map(|m| m.to_string()), Some("e7e5".to_string()));
    assert_eq!(result.engine, EngineId::new("scripted"));
    assert_eq!(result.position, Position::new(START_FEN));

    assert!(log.contains(&format!("position fen {START_FEN}")));
    assert!(log.contains("go depth 5"));
    assert!(!adapter.is_searching());
}

#[tokio::test]
async fn test_mate_line_uses_sentinel() {
    let (adapter, _log) = scripted_adapter(
        vec![Go::Reply(vec![
            "info depth 12 score mate 3 pv h5f7 e8e7 f7e6",
            "bestmove h5f7",
        ])],
        &[],
    )
    .await;

    let result = adapter.search(&depth(12)).await.unwrap();
    assert_eq!(result.best.mate, Some(3));
    assert!(result.best.score > 10_000.0);
}

#[tokio::test]
async fn test_bestmove_without_info_is_bare_record() {
    let (adapter, _log) = scripted_adapter(vec![Go::Reply(vec!["bestmove g1f3"])], &[]).await;

    let result = adapter.search(&depth(1)).await.unwrap();
    assert_eq!(result.best.mv.to_string(), "g1f3");
    assert_eq!(result.lines.len(), 1);
    assert_eq!(result.lines[0].mv.to_string(), "g1f3");
}

#[tokio::test]
async fn test_timeout_then_recovers_without_stale_move() {
    let (adapter, log) = scripted_adapter(
        vec![
            Go::HangUntilStop(vec!["info depth 30 score cp 99 pv a2a3", "bestmove a2a3"]),
            Go::Reply(vec!["info depth 3 score cp 15 pv d2d4", "bestmove d2d4"]),
        ],
        &[],
    )
    .await;

    let err = adapter.search(&depth(30)).await.unwrap_err();
    assert!(matches!(err, EngineError::SearchTimeout { .. }), "got {err:?}");
    assert!(err.is_recoverable());
    assert!(adapter.is_ready());

    let result = adapter.search(&depth(3)).await.unwrap();
    assert_eq!(result.best.mv.to_string(), "d2d4");
    assert!(result.lines.iter().all(|l| l.mv.to_string() != "a2a3"));

    // stop after the timeout, then a readiness sync before the next search
    let commands = log.all();
    let stop = commands.iter().position(|c| c == "stop").unwrap();
    let resync = commands.iter().rposition(|c| c == "isready").unwrap();
    assert!(resync > stop);
}

#[tokio::test]
async fn test_dropped_search_does_not_leak_into_next() {
    let (adapter, log) = scripted_adapter(
        vec![
            Go::Delayed(
                Duration::from_millis(150),
                vec!["info depth 1 score cp 99 pv a2a3", "bestmove a2a3"],
            ),
            Go::Reply(vec!["info depth 3 score cp 15 pv d2d4", "bestmove d2d4"]),
        ],
        &[],
    )
    .await;

    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), adapter.search(&depth(20))).await;
    assert!(abandoned.is_err());
    assert!(!adapter.is_searching());

    let result = adapter.search(&depth(3)).await.unwrap();
    assert_eq!(result.best.mv.to_string(), "d2d4");
    assert!(result.lines.iter().all(|l| l.mv.to_string() != "a2a3"));

    let commands = log.all();
    let stop = commands.iter().position(|c| c == "stop").unwrap();
    let go = commands.iter().rposition(|c| c == "go depth 3").unwrap();
    assert!(stop < go);
}

#[tokio::test]
async fn test_dropped_multi_variation_restores_multipv() {
    let (adapter, log) = scripted_adapter(
        vec![
            Go::Delayed(
                Duration::from_millis(150),
                vec![
                    "info depth 1 multipv 1 score cp 99 pv a2a3",
                    "info depth 1 multipv 2 score cp 98 pv h2h3",
                    "bestmove a2a3",
                ],
            ),
            Go::Reply(vec!["info depth 3 score cp 15 pv d2d4", "bestmove d2d4"]),
        ],
        &[],
    )
    .await;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        adapter.search_multi_variation(4, &depth(20)),
    )
    .await;
    assert!(abandoned.is_err());

    let result = adapter.search(&depth(3)).await.unwrap();
    assert_eq!(result.best.mv.to_string(), "d2d4");
    assert_eq!(result.lines.len(), 1);

    let commands = log.all();
    let raise = commands.iter().position(|c| c == "setoption name MultiPV value 4").unwrap();
    let restore = commands.iter().position(|c| c == "setoption name MultiPV value 1").unwrap();
    let go = commands.iter().position(|c| c == "go depth 3").unwrap();
    assert!(raise < restore && restore < go);
}

#[tokio::test]
async fn test_embedded_deep_search_honours_timeout() {
    let mut config = fake_config(&[("MaxDepth", "5")]);
    config.family = EngineFamily::Embedded;
    let settings = AdapterSettings {
        open_search_timeout: Duration::from_millis(200),
        search_margin: Duration::from_millis(100),
        ..fast_settings()
    };
    let adapter = EngineAdapter::launch(EngineId::new("embedded"), &config, settings)
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let err = adapter.search(&depth(5)).await.unwrap_err();
    assert!(matches!(err, EngineError::SearchTimeout { .. }), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(2));

    // The engine stopped, so the next search gets its own answer promptly.
    let started = std::time::Instant::now();
    let result = adapter.search(&depth(1)).await.unwrap();
    assert_eq!(result.best.depth, 1);
    assert!(started.elapsed() < Duration::from_secs(1));
    adapter.quit().await;
}

#[tokio::test]
async fn test_second_search_fails_fast() {
    let (adapter, _log) = scripted_adapter(
        vec![Go::HangUntilStop(vec!["info depth 8 score cp 5 pv g1f3", "bestmove g1f3"])],
        &[],
    )
    .await;
    let adapter = Arc::new(adapter);

    let first = {
        let adapter = adapter.clone();
        tokio::spawn(async move { adapter.search(&depth(8)).await })
    };
    while !adapter.is_searching() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let err = adapter.search(&depth(8)).await.unwrap_err();
    assert!(matches!(err, EngineError::ConcurrentSearch(_)), "got {err:?}");

    adapter.stop().await.unwrap();
    let result = first.await.unwrap().unwrap();
    assert_eq!(result.best.mv.to_string(), "g1f3");
}

#[tokio::test]
async fn test_multi_variation_collects_and_restores() {
    let (adapter, log) = scripted_adapter(
        vec![Go::Reply(vec![
            "info depth 6 multipv 1 score cp 40 pv e2e4 e7e5",
            "info depth 6 multipv 2 score cp 30 pv d2d4 d7d5",
            "info depth 7 multipv 1 score cp 42 pv e2e4 c7c5",
            "info depth 6 multipv 3 score cp 25 pv c2c4",
            "bestmove e2e4",
        ])],
        &[],
    )
    .await;

    let lines = adapter.search_multi_variation(3, &depth(7)).await.unwrap();

    let moves: Vec<String> = lines.iter().map(|l| l.mv.to_string()).collect();
    assert_eq!(moves, vec!["e2e4", "d2d4", "c2c4"]);
    assert_eq!(lines.iter().map(|l| l.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(lines[0].depth, 7);
    assert!(lines.windows(2).all(|w| w[0].score >= w[1].score));

    let commands = log.all();
    let raise = commands.iter().position(|c| c == "setoption name MultiPV value 3").unwrap();
    let go = commands.iter().position(|c| c == "go depth 7").unwrap();
    let restore = commands.iter().position(|c| c == "setoption name MultiPV value 1").unwrap();
    assert!(raise < go && go < restore);
}

#[tokio::test]
async fn test_multi_variation_tolerates_fewer_lines() {
    let (adapter, _log) = scripted_adapter(
        vec![Go::Reply(vec!["info depth 9 multipv 1 score mate 1 pv d8h4", "bestmove d8h4"])],
        &[("MultiPV", "2")],
    )
    .await;

    let lines = adapter.search_multi_variation(5, &depth(9)).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].mate, Some(1));
}

#[tokio::test]
async fn test_no_legal_move() {
    let (adapter, _log) = scripted_adapter(
        vec![Go::Reply(vec!["info depth 0 score mate 0", "bestmove (none)"])],
        &[],
    )
    .await;

    let err = adapter.search(&depth(1)).await.unwrap_err();
    assert!(matches!(err, EngineError::NoLegalMove(_)), "got {err:?}");
    assert!(adapter.is_ready());
}

#[tokio::test]
async fn test_engine_exit_is_disconnect() {
    let (adapter, _log) = scripted_adapter(vec![Go::Close], &[]).await;

    let err = adapter.search(&depth(1)).await.unwrap_err();
    assert!(matches!(err, EngineError::Disconnected(_)), "got {err:?}");
    assert!(!adapter.is_ready());
}

#[tokio::test]
async fn test_quit_is_idempotent() {
    let (adapter, log) = scripted_adapter(Vec::new(), &[]).await;

    adapter.quit().await;
    adapter.quit().await;

    assert!(!adapter.is_ready());
    assert_eq!(log.count("quit"), 1);
    let err = adapter.search(&depth(1)).await.unwrap_err();
    assert!(matches!(err, EngineError::NotReady(_)), "got {err:?}");
}

#[tokio::test]
async fn test_new_game_waits_for_readyok() {
    let (adapter, log) = scripted_adapter(Vec::new(), &[]).await;

    adapter.new_game().await.unwrap();

    let commands = log.all();
    assert_eq!(&commands[commands.len() - 2..], &["ucinewgame", "isready"]);
}
