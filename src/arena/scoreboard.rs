// =============================================================================
// Scoreboard — victories above a score threshold across ranking snapshots
// =============================================================================
//
// scoreboard.json  : entries ordered by (victories desc, last_score desc),
//                    pruned to the configured top-N
// champions.json   : entries with victories >= promotion_wins, same order
//
// The scoreboard is a meta-tally only; it never changes a profile's mode.
// =============================================================================

use std::cmp::Ordering;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ranking::RankingRow;
use crate::error::ArenaError;
use crate::persist;
use crate::types::now_iso;

/// Numeric fields of the ranking row that produced the last victory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreStats {
    pub balance: Option<f64>,
    pub goal: Option<f64>,
    pub wins: u64,
    pub losses: u64,
    pub trades: u64,
    pub sharpe_ratio: f64,
    pub drawdown_pct: f64,
    pub max_drawdown_pct: f64,
}

impl From<&RankingRow> for ScoreStats {
    fn from(row: &RankingRow) -> Self {
        Self {
            balance: row.balance,
            goal: row.goal,
            wins: row.wins,
            losses: row.losses,
            trades: row.trades,
            sharpe_ratio: row.sharpe_ratio,
            drawdown_pct: row.drawdown_pct,
            max_drawdown_pct: row.max_drawdown_pct,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreboardEntry {
    pub strategy_id: String,
    pub victories: u32,
    pub last_score: f64,
    pub last_stats: Option<ScoreStats>,
    pub updated_at: String,
}

fn board_order(a: &ScoreboardEntry, b: &ScoreboardEntry) -> Ordering {
    b.victories
        .cmp(&a.victories)
        .then_with(|| b.last_score.total_cmp(&a.last_score))
        .then_with(|| a.strategy_id.cmp(&b.strategy_id))
}

#[derive(Debug, Clone)]
pub struct Scoreboard {
    board_path: PathBuf,
    champions_path: PathBuf,
}

impl Scoreboard {
    pub fn new(board_path: impl Into<PathBuf>, champions_path: impl Into<PathBuf>) -> Self {
        Self {
            board_path: board_path.into(),
            champions_path: champions_path.into(),
        }
    }

    /// Current entries; a missing or unreadable document is empty.
    pub fn entries(&self) -> Vec<ScoreboardEntry> {
        persist::read_json(&self.board_path).or_else_default(&self.board_path, Vec::new)
    }

    /// Count a victory for every row at or above `score_threshold`, prune to
    /// `top_cap` and rewrite scoreboard.json. Returns the stored entries.
    pub fn update(
        &self,
        ranking: &[RankingRow],
        score_threshold: f64,
        top_cap: usize,
    ) -> Result<Vec<ScoreboardEntry>, ArenaError> {
        let mut entries = self.entries();
        let now = now_iso();
        let mut victors = 0usize;

        for row in ranking.iter().filter(|r| r.score >= score_threshold) {
            victors += 1;
            match entries.iter_mut().find(|e| e.strategy_id == row.id) {
                Some(entry) => {
                    entry.victories += 1;
                    entry.last_score = row.score;
                    entry.last_stats = Some(ScoreStats::from(row));
                    entry.updated_at = now.clone();
                }
                None => entries.push(ScoreboardEntry {
                    strategy_id: row.id.clone(),
                    victories: 1,
                    last_score: row.score,
                    last_stats: Some(ScoreStats::from(row)),
                    updated_at: now.clone(),
                }),
            }
        }

        entries.sort_by(board_order);
        entries.truncate(top_cap);
        persist::write_json_atomic(&self.board_path, &entries)?;

        debug!(victors, stored = entries.len(), "scoreboard updated");
        Ok(entries)
    }

    /// Entries with at least `promotion_wins` victories.
    pub fn compute_champions(&self, promotion_wins: u32) -> Vec<ScoreboardEntry> {
        let mut champions: Vec<ScoreboardEntry> = self
            .entries()
            .into_iter()
            .filter(|e| e.victories >= promotion_wins)
            .collect();
        champions.sort_by(board_order);
        champions
    }

    /// Recompute and rewrite champions.json.
    pub fn write_champions(&self, promotion_wins: u32) -> Result<Vec<ScoreboardEntry>, ArenaError> {
        let champions = self.compute_champions(promotion_wins);
        persist::write_json_atomic(&self.champions_path, &champions)?;
        Ok(champions)
    }

    /// Contents of champions.json.
    pub fn champions(&self) -> Vec<ScoreboardEntry> {
        persist::read_json(&self.champions_path).or_else_default(&self.champions_path, Vec::new)
    }
}
