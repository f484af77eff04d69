//! UCI wire format: commands we send and the lines engines send back.

use std::fmt;
use std::time::Duration;

use chess_core::{Position, Score, UciMove, Wdl};

use crate::record::SearchBudget;

/// Commands sent to the engine, one line each.
#[derive(Debug, Clone, PartialEq)]
pub enum Command<'a> {
    Uci,
    IsReady,
    SetOption { name: &'a str, value: &'a str },
    UciNewGame,
    Position(&'a Position),
    Go(SearchBudget),
    Stop,
    Quit,
}

impl fmt::Display for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Uci => f.write_str("uci"),
            Command::IsReady => f.write_str("isready"),
            Command::SetOption { name, value } => write!(f, "setoption name {name} value {value}"),
            Command::UciNewGame => f.write_str("ucinewgame"),
            Command::Position(position) => write!(f, "position fen {position}"),
            Command::Go(SearchBudget::Depth(depth)) => write!(f, "go depth {depth}"),
            Command::Go(SearchBudget::MoveTime(time)) => {
                write!(f, "go movetime {}", time.as_millis())
            }
            Command::Go(SearchBudget::Nodes(nodes)) => write!(f, "go nodes {nodes}"),
            Command::Stop => f.write_str("stop"),
            Command::Quit => f.write_str("quit"),
        }
    }
}

/// Score bound flag on an `info ... score` token group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Lower,
    Upper,
}

/// Parsed `info` line. Every field is optional; engines send whatever subset
/// they like in whatever order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoLine {
    pub depth: Option<u32>,
    pub seldepth: Option<u32>,
    pub multipv: Option<u32>,
    pub score: Option<Score>,
    pub bound: Option<Bound>,
    pub wdl: Option<Wdl>,
    pub nodes: Option<u64>,
    pub nps: Option<u64>,
    pub time: Option<Duration>,
    pub hashfull: Option<u32>,
    pub currmove: Option<UciMove>,
    pub pv: Vec<UciMove>,
    pub string: Option<String>,
}

/// One line of engine output.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineLine {
    UciOk,
    ReadyOk,
    Id { key: String, value: String },
    Option(String),
    /// `bestmove` with the raw move token; `(none)` is left to the caller.
    BestMove {
        best: String,
        ponder: Option<UciMove>,
    },
    Info(InfoLine),
    Other(String),
}

impl EngineLine {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("uciok") => EngineLine::UciOk,
            Some("readyok") => EngineLine::ReadyOk,
            Some("id") => {
                let key = tokens.next().unwrap_or_default().to_string();
                let value = tokens.collect::<Vec<_>>().join(" ");
                EngineLine::Id { key, value }
            }
            Some("option") => EngineLine::Option(tokens.collect::<Vec<_>>().join(" ")),
            Some("bestmove") => {
                let best = tokens.next().unwrap_or("(none)").to_string();
                let ponder = match (tokens.next(), tokens.next()) {
                    (Some("ponder"), Some(mv)) => mv.parse().ok(),
                    _ => None,
                };
                EngineLine::BestMove { best, ponder }
            }
            Some("info") => EngineLine::Info(parse_info(tokens.collect())),
            _ => EngineLine::Other(line.to_string()),
        }
    }
}

/// Parse the tokens after `info`.
///
/// Keys have fixed arities except `pv`, `string`, `refutation` and `currline`,
/// which take the rest of the line. Unknown keys and bad values are skipped.
fn parse_info(tokens: Vec<&str>) -> InfoLine {
    let mut info = InfoLine::default();
    let mut i = 0;

    while i < tokens.len() {
        let key = tokens[i];
        i += 1;
        match key {
            "depth" => info.depth = int_at(&tokens, &mut i),
            "seldepth" => info.seldepth = int_at(&tokens, &mut i),
            "multipv" => info.multipv = int_at(&tokens, &mut i),
            "nodes" => info.nodes = int_at(&tokens, &mut i),
            "nps" => info.nps = int_at(&tokens, &mut i),
            "hashfull" => info.hashfull = int_at(&tokens, &mut i),
            "time" => info.time = int_at(&tokens, &mut i).map(Duration::from_millis),
            "tbhits" | "cpuload" | "currmovenumber" | "sbhits" => i += 1,
            "currmove" => {
                info.currmove = tokens.get(i).and_then(|t| t.parse().ok());
                i += 1;
            }
            "score" => {
                let kind = tokens.get(i).copied();
                let value = tokens.get(i + 1).and_then(|t| t.parse::<i32>().ok());
                i += 2;
                info.score = match (kind, value) {
                    (Some("cp"), Some(v)) => Some(Score::Centipawns(v)),
                    (Some("mate"), Some(v)) => Some(Score::Mate(v)),
                    _ => None,
                };
                match tokens.get(i).copied() {
                    Some("lowerbound") => {
                        info.bound = Some(Bound::Lower);
                        i += 1;
                    }
                    Some("upperbound") => {
                        info.bound = Some(Bound::Upper);
                        i += 1;
                    }
                    _ => {}
                }
            }
            "wdl" => {
                let w = int_at(&tokens, &mut i);
                let d = int_at(&tokens, &mut i);
                let l = int_at(&tokens, &mut i);
                if let (Some(win), Some(draw), Some(loss)) = (w, d, l) {
                    info.wdl = Some(Wdl { win, draw, loss });
                }
            }
            "pv" => {
                info.pv = tokens[i..]
                    .iter()
                    .map_while(|t| t.parse::<UciMove>().ok())
                    .collect();
                break;
            }
            "string" => {
                info.string = Some(tokens[i..].join(" "));
                break;
            }
            "refutation" | "currline" => break,
            _ => {}
        }
    }

    info
}

/// Read one integer token and advance past it, even when it does not parse.
fn int_at<T: std::str::FromStr>(tokens: &[&str], i: &mut usize) -> Option<T> {
    let value = tokens.get(*i).and_then(|t| t.parse().ok());
    *i += 1;
    value
}
