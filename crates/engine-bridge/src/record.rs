//! Search requests and the records engines produce for them.

use std::collections::BTreeMap;
use std::time::Duration;

use chess_core::{Position, UciMove, Wdl};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::InfoLine;
use crate::registry::EngineId;

/// How long an engine may think. Exactly one unit applies per search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchBudget {
    Depth(u32),
    MoveTime(Duration),
    Nodes(u64),
}

impl SearchBudget {
    /// Wall time the budget itself asks for, if it is time based.
    pub fn wall_time(&self) -> Option<Duration> {
        match self {
            SearchBudget::MoveTime(t) => Some(*t),
            _ => None,
        }
    }

    /// Smaller budget used for secondary candidate searches.
    pub fn reduced(&self) -> Self {
        match self {
            SearchBudget::Depth(d) => SearchBudget::Depth((d * 2 / 3).max(1)),
            SearchBudget::MoveTime(t) => {
                SearchBudget::MoveTime((*t / 2).max(Duration::from_millis(1)))
            }
            SearchBudget::Nodes(n) => SearchBudget::Nodes((n / 2).max(1)),
        }
    }
}

/// Caller-facing search limits. When several are set, time wins over nodes,
/// and nodes win over depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub depth: Option<u32>,
    pub time: Option<Duration>,
    pub nodes: Option<u64>,
}

impl SearchOptions {
    pub fn depth(depth: u32) -> Self {
        Self {
            depth: Some(depth),
            ..Self::default()
        }
    }

    pub fn time(time: Duration) -> Self {
        Self {
            time: Some(time),
            ..Self::default()
        }
    }

    pub fn nodes(nodes: u64) -> Self {
        Self {
            nodes: Some(nodes),
            ..Self::default()
        }
    }

    pub fn resolve(&self, fallback: SearchBudget) -> SearchBudget {
        if let Some(time) = self.time {
            SearchBudget::MoveTime(time)
        } else if let Some(nodes) = self.nodes {
            SearchBudget::Nodes(nodes)
        } else if let Some(depth) = self.depth {
            SearchBudget::Depth(depth)
        } else {
            fallback
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub position: Position,
    pub budget: SearchBudget,
}

impl SearchRequest {
    pub fn new(position: Position, budget: SearchBudget) -> Self {
        Self { position, budget }
    }
}

/// One scored line of play.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveRecord {
    /// Variation index (1 = best)
    pub rank: u32,
    #[serde(rename = "move")]
    pub mv: UciMove,
    /// Pawns from the side to move's perspective; mate lines carry the mate
    /// sentinel so they sort correctly against ordinary scores
    pub score: f64,
    pub mate: Option<i32>,
    pub pv: Vec<UciMove>,
    pub depth: u32,
    pub seldepth: u32,
    pub nodes: u64,
    pub nps: u64,
    pub wdl: Option<Wdl>,
}

impl MoveRecord {
    /// A record that only knows its move, for engines that send `bestmove`
    /// without any scored `info` line.
    pub fn bare(mv: UciMove) -> Self {
        Self {
            rank: 1,
            pv: vec![mv.clone()],
            mv,
            score: 0.0,
            mate: None,
            depth: 0,
            seldepth: 0,
            nodes: 0,
            nps: 0,
            wdl: None,
        }
    }

    fn from_info(rank: u32, info: &InfoLine) -> Option<Self> {
        let mv = info.pv.first()?.clone();
        Some(Self {
            rank,
            mv,
            score: info.score.map(|s| s.to_pawns()).unwrap_or(0.0),
            mate: info.score.and_then(|s| s.mate_distance()),
            pv: info.pv.clone(),
            depth: info.depth.unwrap_or(0),
            seldepth: info.seldepth.or(info.depth).unwrap_or(0),
            nodes: info.nodes.unwrap_or(0),
            nps: info.nps.unwrap_or(0),
            wdl: info.wdl,
        })
    }
}

/// Latest record per variation index seen during one search.
///
/// Built fresh for every search so that output left over from an earlier,
/// aborted search never leaks into the next result.
#[derive(Debug, Default)]
pub struct Variations {
    lines: BTreeMap<u32, MoveRecord>,
}

impl Variations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one `info` line in. Lines without a pv carry nothing we keep.
    /// Bound (fail-high/low) scores never overwrite an exact one.
    pub fn apply(&mut self, info: &InfoLine) {
        let rank = info.multipv.unwrap_or(1).max(1);
        let Some(record) = MoveRecord::from_info(rank, info) else {
            return;
        };
        if info.bound.is_some() {
            if let Some(existing) = self.lines.get(&rank) {
                if existing.depth >= record.depth {
                    return;
                }
            }
        }
        self.lines.insert(rank, record);
    }

    pub fn get(&self, rank: u32) -> Option<&MoveRecord> {
        self.lines.get(&rank)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Records ordered by variation index, without repeated moves.
    pub fn into_ranked(self) -> Vec<MoveRecord> {
        let mut ranked: Vec<MoveRecord> = Vec::with_capacity(self.lines.len());
        for (_, record) in self.lines {
            if !ranked.iter().any(|r| r.mv == record.mv) {
                ranked.push(record);
            }
        }
        ranked
    }
}

/// Outcome of one analysis request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub position: Position,
    pub best: MoveRecord,
    pub ponder: Option<UciMove>,
    /// Every variation seen, ranked
    pub lines: Vec<MoveRecord>,
    pub engine: EngineId,
    pub engine_name: String,
    pub elapsed_ms: u64,
    pub analyzed_at: DateTime<Utc>,
}

/// Renumber records 1..k in their current order.
pub fn renumber(records: &mut [MoveRecord]) {
    for (i, record) in records.iter_mut().enumerate() {
        record.rank = i as u32 + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EngineLine;

    fn info(line: &str) -> InfoLine {
        match EngineLine::parse(line) {
            EngineLine::Info(info) => info,
            other => panic!("expected info line, got {other:?}"),
        }
    }

    #[test]
    fn test_budget_precedence() {
        let fallback = SearchBudget::Depth(10);
        let all = SearchOptions {
            depth: Some(5),
            time: Some(Duration::from_millis(300)),
            nodes: Some(1000),
        };
        assert_eq!(all.resolve(fallback), SearchBudget::MoveTime(Duration::from_millis(300)));

        let no_time = SearchOptions {
            time: None,
            ..all
        };
        assert_eq!(no_time.resolve(fallback), SearchBudget::Nodes(1000));
        assert_eq!(SearchOptions::depth(5).resolve(fallback), SearchBudget::Depth(5));
        assert_eq!(SearchOptions::default().resolve(fallback), fallback);
    }

    #[test]
    fn test_reduced_budget() {
        assert_eq!(SearchBudget::Depth(12).reduced(), SearchBudget::Depth(8));
        assert_eq!(SearchBudget::Depth(1).reduced(), SearchBudget::Depth(1));
        assert_eq!(
            SearchBudget::MoveTime(Duration::from_millis(1000)).reduced(),
            SearchBudget::MoveTime(Duration::from_millis(500))
        );
        assert_eq!(SearchBudget::Nodes(1).reduced(), SearchBudget::Nodes(1));
    }

    #[test]
    fn test_variations_keep_latest_per_index() {
        let mut vars = Variations::new();
        vars.apply(&info("info depth 1 multipv 1 score cp 10 pv e2e4"));
        vars.apply(&info("info depth 1 multipv 2 score cp 5 pv d2d4"));
        vars.apply(&info("info depth 2 multipv 1 score cp 20 pv g1f3 g8f6"));
        vars.apply(&info("info depth 2 currmove c2c4 currmovenumber 3"));

        assert_eq!(vars.len(), 2);
        let first = vars.get(1).unwrap();
        assert_eq!(first.mv.to_string(), "g1f3");
        assert_eq!(first.depth, 2);
        assert_eq!(first.score, 0.2);
        assert_eq!(vars.get(2).unwrap().mv.to_string(), "d2d4");
    }

    #[test]
    fn test_bound_does_not_replace_exact_score() {
        let mut vars = Variations::new();
        vars.apply(&info("info depth 8 score cp 40 pv e2e4"));
        vars.apply(&info("info depth 8 score cp 90 lowerbound pv d2d4"));
        assert_eq!(vars.get(1).unwrap().mv.to_string(), "e2e4");
        vars.apply(&info("info depth 9 score cp 90 lowerbound pv d2d4"));
        assert_eq!(vars.get(1).unwrap().mv.to_string(), "d2d4");
    }

    #[test]
    fn test_mate_record_uses_sentinel() {
        let mut vars = Variations::new();
        vars.apply(&info("info depth 5 score mate 2 pv d1h5 g7g6 h5e5"));
        let record = vars.get(1).unwrap();
        assert_eq!(record.mate, Some(2));
        assert!(record.score >= chess_core::MATE_SENTINEL);
    }

    #[test]
    fn test_into_ranked_drops_duplicate_moves() {
        let mut vars = Variations::new();
        vars.apply(&info("info depth 3 multipv 1 score cp 30 pv e2e4"));
        vars.apply(&info("info depth 3 multipv 3 score cp 10 pv e2e4"));
        vars.apply(&info("info depth 3 multipv 2 score cp 20 pv d2d4"));
        let ranked = vars.into_ranked();
        let moves: Vec<String> = ranked.iter().map(|r| r.mv.to_string()).collect();
        assert_eq!(moves, vec!["e2e4", "d2d4"]);
        assert_eq!(ranked[1].rank, 2);
    }
}
