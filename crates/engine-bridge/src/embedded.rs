//! In-process UCI engine.
//!
//! A small material-counting negamax built on the `chess` crate. It speaks
//! the same UCI dialect as an external binary, over an in-memory pipe, so the
//! adapter treats it like any other engine. Useful as a fallback pool member
//! and for running the bridge without a Stockfish install.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chess::{Board, BoardStatus, ChessMove, Color, MoveGen, Piece};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::{JoinError, JoinHandle};
use tracing::debug;

const ENGINE_NAME: &str = "Bridge Embedded";
const ENGINE_AUTHOR: &str = "engine-bridge";

const MATE: i32 = 30_000;
const INFINITY: i32 = 32_000;
/// Scores this close to MATE encode a mate distance in plies
const MAX_PLY: i32 = 256;

const DEFAULT_MAX_DEPTH: u32 = 3;
const MAX_DEPTH_LIMIT: u32 = 5;
const MAX_MULTIPV: u32 = 64;
const MAX_TEMPERATURE: i32 = 1_000;
/// Nodes between checks of the stop flag and the limits
const CHECK_INTERVAL: u64 = 1024;

const PIECE_VALUES: [(Piece, i32); 5] = [
    (Piece::Pawn, 100),
    (Piece::Knight, 320),
    (Piece::Bishop, 330),
    (Piece::Rook, 500),
    (Piece::Queen, 900),
];

/// Serve UCI on `io` until `quit` or EOF.
///
/// Searches run on the blocking pool so that `stop` and `isready` are still
/// read while one is in progress.
pub async fn run<S>(io: S)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(io);
    let mut lines = BufReader::new(reader).lines();
    let mut engine = EmbeddedEngine::default();
    let mut search: Option<JoinHandle<Vec<String>>> = None;
    let mut stop = Arc::new(AtomicBool::new(false));

    loop {
        let event = match search.as_mut() {
            Some(task) => tokio::select! {
                line = lines.next_line() => Event::Line(line),
                done = task => Event::Finished(done),
            },
            None => Event::Line(lines.next_line().await),
        };

        let line = match event {
            Event::Finished(done) => {
                search = None;
                if write_lines(&mut writer, &finished(done)).await.is_err() {
                    break;
                }
                continue;
            }
            Event::Line(Ok(Some(line))) => line,
            Event::Line(_) => break,
        };
        let line = line.trim();
        let command = line.split_whitespace().next().unwrap_or_default();

        if search.is_some() {
            match command {
                "stop" => {
                    stop.store(true, Ordering::Relaxed);
                    continue;
                }
                "isready" => {
                    if write_lines(&mut writer, &["readyok".to_string()]).await.is_err() {
                        break;
                    }
                    continue;
                }
                "quit" => break,
                _ => {
                    // Anything else waits for the running search.
                    if let Some(task) = search.take() {
                        if write_lines(&mut writer, &finished(task.await)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        if command == "go" {
            let args: Vec<&str> = line.split_whitespace().skip(1).collect();
            let job = engine.prepare_go(GoLimits::parse(&args));
            stop = Arc::new(AtomicBool::new(false));
            let flag = stop.clone();
            search = Some(tokio::task::spawn_blocking(move || job.run(&flag)));
            continue;
        }

        let Some(replies) = engine.handle(line) else {
            break;
        };
        if write_lines(&mut writer, &replies).await.is_err() {
            break;
        }
    }

    stop.store(true, Ordering::Relaxed);
    debug!("Embedded engine stopped");
}

enum Event {
    Line(std::io::Result<Option<String>>),
    Finished(Result<Vec<String>, JoinError>),
}

fn finished(done: Result<Vec<String>, JoinError>) -> Vec<String> {
    done.unwrap_or_else(|e| {
        debug!(error = %e, "Embedded search task failed");
        vec!["bestmove (none)".to_string()]
    })
}

async fn write_lines<W>(writer: &mut W, lines: &[String]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for line in lines {
        writer.write_all(format!("{line}\n").as_bytes()).await?;
    }
    writer.flush().await
}

/// Limits parsed from a `go` command.
#[derive(Debug, Default, PartialEq, Eq)]
struct GoLimits {
    depth: Option<u32>,
    movetime: Option<Duration>,
    nodes: Option<u64>,
}

impl GoLimits {
    fn parse(args: &[&str]) -> Self {
        let mut limits = Self::default();
        let mut it = args.iter();
        while let Some(key) = it.next() {
            match *key {
                "depth" => limits.depth = next_number(&mut it).map(|d| d as u32),
                "movetime" => limits.movetime = next_number(&mut it).map(Duration::from_millis),
                "nodes" => limits.nodes = next_number(&mut it),
                _ => {}
            }
        }
        limits
    }
}

fn next_number(it: &mut std::slice::Iter<'_, &str>) -> Option<u64> {
    it.next().and_then(|v| v.parse().ok())
}

struct EmbeddedEngine {
    board: Option<Board>,
    multipv: u32,
    /// Random noise in centipawns added to root scores for more human play
    temperature: i32,
    max_depth: u32,
    rng: StdRng,
}

impl Default for EmbeddedEngine {
    fn default() -> Self {
        Self {
            board: Some(Board::default()),
            multipv: 1,
            temperature: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            rng: StdRng::seed_from_u64(0),
        }
    }
}

impl EmbeddedEngine {
    /// Handle one command line. `None` means quit.
    fn handle(&mut self, line: &str) -> Option<Vec<String>> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, args)) = tokens.split_first() else {
            return Some(Vec::new());
        };

        let replies = match command {
            "uci" => vec![
                format!("id name {ENGINE_NAME}"),
                format!("id author {ENGINE_AUTHOR}"),
                format!("option name MultiPV type spin default 1 min 1 max {MAX_MULTIPV}"),
                format!(
                    "option name Temperature type spin default 0 min 0 max {MAX_TEMPERATURE}"
                ),
                format!(
                    "option name MaxDepth type spin default {DEFAULT_MAX_DEPTH} \
                     min 1 max {MAX_DEPTH_LIMIT}"
                ),
                "option name Seed type spin default 0 min 0 max 4294967295".to_string(),
                "uciok".to_string(),
            ],
            "isready" => vec!["readyok".to_string()],
            "setoption" => {
                self.set_option(args);
                Vec::new()
            }
            "ucinewgame" => {
                self.board = Some(Board::default());
                Vec::new()
            }
            "position" => self.set_position(args),
            "go" => self
                .prepare_go(GoLimits::parse(args))
                .run(&AtomicBool::new(false)),
            "quit" => return None,
            // Nothing to stop: `run` handles stop while a search is going.
            "stop" => Vec::new(),
            _ => vec![format!("info string unknown command {command}")],
        };
        Some(replies)
    }

    fn set_option(&mut self, args: &[&str]) {
        let joined = args.join(" ");
        let Some(rest) = joined.strip_prefix("name ") else {
            return;
        };
        let (name, value) = match rest.split_once(" value ") {
            Some((name, value)) => (name.trim(), value.trim()),
            None => (rest.trim(), ""),
        };

        match name.to_ascii_lowercase().as_str() {
            "multipv" => {
                if let Ok(n) = value.parse::<u32>() {
                    self.multipv = n.clamp(1, MAX_MULTIPV);
                }
            }
            "temperature" => {
                if let Ok(t) = value.parse::<i32>() {
                    self.temperature = t.clamp(0, MAX_TEMPERATURE);
                }
            }
            "maxdepth" => {
                if let Ok(d) = value.parse::<u32>() {
                    self.max_depth = d.clamp(1, MAX_DEPTH_LIMIT);
                }
            }
            "seed" => {
                if let Ok(seed) = value.parse::<u64>() {
                    self.rng = StdRng::seed_from_u64(seed);
                }
            }
            _ => {}
        }
    }

    fn set_position(&mut self, args: &[&str]) -> Vec<String> {
        let moves_at = args.iter().position(|t| *t == "moves");
        let (setup, moves) = match moves_at {
            Some(i) => (&args[..i], &args[i + 1..]),
            None => (args, &[][..]),
        };

        let board = match setup.split_first() {
            Some((&"startpos", _)) => Some(Board::default()),
            Some((&"fen", fen)) => Board::from_str(&fen.join(" ")).ok(),
            _ => None,
        };
        let Some(mut board) = board else {
            self.board = None;
            return vec!["info string invalid position".to_string()];
        };

        for token in moves {
            let Some(mv) = MoveGen::new_legal(&board).find(|m| uci_string(*m) == *token) else {
                self.board = None;
                return vec![format!("info string illegal move {token}")];
            };
            board = board.make_move_new(mv);
        }
        self.board = Some(board);
        Vec::new()
    }

    /// Snapshot everything a search needs so it can run off this task.
    fn prepare_go(&mut self, limits: GoLimits) -> SearchJob {
        let root_moves: Vec<ChessMove> = match &self.board {
            Some(board) => MoveGen::new_legal(board).collect(),
            None => Vec::new(),
        };
        let noise = root_moves
            .iter()
            .map(|_| {
                if self.temperature > 0 {
                    self.rng.gen_range(-self.temperature..=self.temperature)
                } else {
                    0
                }
            })
            .collect();

        SearchJob {
            board: self.board,
            root_moves,
            noise,
            limits,
            multipv: self.multipv,
            max_depth: self.max_depth,
        }
    }
}

/// One `go`, ready to run on any thread.
struct SearchJob {
    board: Option<Board>,
    root_moves: Vec<ChessMove>,
    /// Temperature jitter per root move
    noise: Vec<i32>,
    limits: GoLimits,
    multipv: u32,
    max_depth: u32,
}

impl SearchJob {
    /// Iterative deepening until the depth limit, a node or time limit, or
    /// `stop`. An interrupted iteration is discarded.
    fn run(&self, stop: &AtomicBool) -> Vec<String> {
        let Some(board) = self.board else {
            return vec!["bestmove (none)".to_string()];
        };
        if self.root_moves.is_empty() {
            let score = if board.checkers().popcnt() > 0 { "mate 0" } else { "cp 0" };
            return vec![
                format!("info depth 0 score {score}"),
                "bestmove (none)".to_string(),
            ];
        }

        let max_depth = self.limits.depth.unwrap_or(self.max_depth).clamp(1, self.max_depth);
        let started = Instant::now();
        let mut search = Search {
            nodes: 0,
            stop,
            deadline: self.limits.movetime.map(|t| started + t),
            node_limit: self.limits.nodes,
            aborted: false,
        };
        let mut out = Vec::new();
        let mut ranked: Vec<(i32, Vec<ChessMove>)> = Vec::new();

        for depth in 1..=max_depth {
            let mut iteration = Vec::with_capacity(self.root_moves.len());
            for (&mv, &jitter) in self.root_moves.iter().zip(&self.noise) {
                if search.should_abort() {
                    search.aborted = true;
                    break;
                }
                let (score, mut pv) =
                    search.negamax(&board.make_move_new(mv), depth - 1, 1, -INFINITY, INFINITY);
                if search.aborted {
                    break;
                }
                let score = -score;
                pv.insert(0, mv);
                let score = if score.abs() >= MATE - MAX_PLY { score } else { score + jitter };
                iteration.push((score, pv));
            }
            if search.aborted {
                break;
            }
            // Stable: equal scores keep move generation order.
            iteration.sort_by(|a, b| b.0.cmp(&a.0));
            ranked = iteration;

            let elapsed = started.elapsed();
            let ms = elapsed.as_millis().max(1) as u64;
            let nps = search.nodes * 1000 / ms;
            for (i, (score, pv)) in ranked.iter().take(self.multipv as usize).enumerate() {
                let pv: Vec<String> = pv.iter().map(|m| uci_string(*m)).collect();
                out.push(format!(
                    "info depth {depth} seldepth {depth} multipv {} score {} \
                     nodes {} nps {nps} time {} pv {}",
                    i + 1,
                    uci_score(*score),
                    search.nodes,
                    elapsed.as_millis(),
                    pv.join(" ")
                ));
            }

            let out_of_time = self.limits.movetime.is_some_and(|t| elapsed * 2 >= t);
            let out_of_nodes = self.limits.nodes.is_some_and(|n| search.nodes >= n);
            if out_of_time || out_of_nodes {
                break;
            }
        }

        // Stopped before depth 1 finished: any legal move beats none.
        if ranked.is_empty() {
            ranked = self.root_moves.iter().map(|&mv| (0, vec![mv])).collect();
        }

        let best = ranked[0].1[0];
        let mut bestmove = format!("bestmove {}", uci_string(best));
        if let Some(reply) = ranked[0].1.get(1) {
            bestmove.push_str(&format!(" ponder {}", uci_string(*reply)));
        }
        out.push(bestmove);
        out
    }
}

struct Search<'a> {
    nodes: u64,
    stop: &'a AtomicBool,
    deadline: Option<Instant>,
    node_limit: Option<u64>,
    /// Set once a limit or `stop` cut the search short; results are partial
    aborted: bool,
}

impl Search<'_> {
    fn should_abort(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
            || self.node_limit.is_some_and(|n| self.nodes >= n)
    }

    /// Alpha-beta negamax from the side to move's point of view. Returns the
    /// score and the principal variation below this node.
    fn negamax(
        &mut self,
        board: &Board,
        depth: u32,
        ply: i32,
        mut alpha: i32,
        beta: i32,
    ) -> (i32, Vec<ChessMove>) {
        self.nodes += 1;
        if self.nodes % CHECK_INTERVAL == 0 && self.should_abort() {
            self.aborted = true;
        }
        if self.aborted {
            return (0, Vec::new());
        }
        match board.status() {
            BoardStatus::Checkmate => return (-MATE + ply, Vec::new()),
            BoardStatus::Stalemate => return (0, Vec::new()),
            BoardStatus::Ongoing => {}
        }
        if depth == 0 {
            return (evaluate(board), Vec::new());
        }

        let mut best = (-INFINITY, Vec::new());
        for mv in MoveGen::new_legal(board) {
            let (score, mut pv) =
                self.negamax(&board.make_move_new(mv), depth - 1, ply + 1, -beta, -alpha);
            if self.aborted {
                return (0, Vec::new());
            }
            let score = -score;
            if score > best.0 {
                pv.insert(0, mv);
                best = (score, pv);
            }
            alpha = alpha.max(score);
            if alpha >= beta {
                break;
            }
        }
        best
    }
}

/// Material plus a small bonus for centralised pawns and minor pieces.
fn evaluate(board: &Board) -> i32 {
    let us = board.side_to_move();
    side_score(board, us) - side_score(board, !us)
}

fn side_score(board: &Board, color: Color) -> i32 {
    let ours = *board.color_combined(color);
    let material: i32 = PIECE_VALUES
        .iter()
        .map(|(piece, value)| value * (*board.pieces(*piece) & ours).popcnt() as i32)
        .sum();

    let minors =
        (*board.pieces(Piece::Pawn) | *board.pieces(Piece::Knight) | *board.pieces(Piece::Bishop))
            & ours;
    let centrality: i32 = minors
        .map(|sq| {
            let file = sq.get_file().to_index() as i32;
            let rank = sq.get_rank().to_index() as i32;
            3 - (2 * file - 7).abs().max((2 * rank - 7).abs()) / 2
        })
        .sum();

    material + 4 * centrality
}

fn uci_string(mv: ChessMove) -> String {
    let promotion = match mv.get_promotion() {
        Some(Piece::Queen) => "q",
        Some(Piece::Rook) => "r",
        Some(Piece::Bishop) => "b",
        Some(Piece::Knight) => "n",
        _ => "",
    };
    format!("{}{}{}", mv.get_source(), mv.get_dest(), promotion)
}

fn uci_score(score: i32) -> String {
    if score.abs() >= MATE - MAX_PLY {
        let plies = MATE - score.abs();
        let moves = (plies + 1) / 2;
        if score > 0 {
            format!("mate {moves}")
        } else {
            format!("mate -{moves}")
        }
    } else {
        format!("cp {score}")
    }
}
