// =============================================================================
// Ranking — composite score and the ranking_latest.json snapshot
// =============================================================================
//
//   progress       = balance / max(goal, 1)
//   sharpe_bonus   = max(sharpe, 0) * 0.2
//   drawdown_pen   = max(max_drawdown_pct, drawdown_pct) / 150
//   activity_bonus = min(trades / 200, 0.3)
//   score          = max(progress + sharpe_bonus + activity_bonus - drawdown_pen, 0)
//
// Strategies without stats score 0. Ties resolve by id ascending.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::registry::Registry;
use super::store::Store;
use crate::error::ArenaError;
use crate::persist;
use crate::types::{Category, Engine, Mode, StrategyProfile, StrategyStats};

/// Rows written to ranking_latest.json.
pub const RANKING_FILE_CAP: usize = 200;

/// Latest-balance rows consulted for the override.
pub const BALANCE_LOOKUP: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingRow {
    pub id: String,
    pub name: String,
    pub category: Category,
    pub mode: Mode,
    pub engine: Engine,
    pub score: f64,
    pub balance: Option<f64>,
    pub goal: Option<f64>,
    pub wins: u64,
    pub losses: u64,
    pub drawdown_pct: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub trades: u64,
}

/// Score of one stats block with `balance` already resolved.
pub fn score(stats: &StrategyStats, balance: f64) -> f64 {
    let progress = balance / stats.goal.max(1.0);
    let sharpe_bonus = stats.sharpe_ratio.max(0.0) * 0.2;
    let drawdown_pen = stats.max_drawdown_pct.max(stats.drawdown_pct) / 150.0;
    let activity_bonus = (stats.trades as f64 / 200.0).min(0.3);
    (progress + sharpe_bonus + activity_bonus - drawdown_pen).max(0.0)
}

fn row_for(profile: &StrategyProfile, latest: &HashMap<String, f64>) -> RankingRow {
    let mut row = RankingRow {
        id: profile.id.clone(),
        name: profile.name.clone(),
        category: profile.category,
        mode: profile.mode,
        engine: profile.engine,
        score: 0.0,
        balance: None,
        goal: None,
        wins: 0,
        losses: 0,
        drawdown_pct: 0.0,
        max_drawdown_pct: 0.0,
        sharpe_ratio: 0.0,
        trades: 0,
    };

    if let Some(stats) = &profile.stats {
        let balance = latest.get(&profile.id).copied().unwrap_or(stats.balance);
        row.score = score(stats, balance);
        row.balance = Some(balance);
        row.goal = Some(stats.goal);
        row.wins = stats.wins;
        row.losses = stats.losses;
        row.drawdown_pct = stats.drawdown_pct;
        row.max_drawdown_pct = stats.max_drawdown_pct;
        row.sharpe_ratio = stats.sharpe_ratio;
        row.trades = stats.trades;
    }
    row
}

/// Score every profile, best first.
pub fn rank(profiles: &[StrategyProfile], latest: &HashMap<String, f64>) -> Vec<RankingRow> {
    let mut rows: Vec<RankingRow> = profiles.iter().map(|p| row_for(p, latest)).collect();
    rows.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    rows
}

/// Rank the registry, rewrite `target` with the top rows and return the
/// full list.
pub fn generate_ranking(registry: &Registry, store: &Store, target: &Path) -> Result<Vec<RankingRow>, ArenaError> {
    let latest: HashMap<String, f64> = store
        .top_balances(BALANCE_LOOKUP)?
        .into_iter()
        .map(|e| (e.strategy_id, e.balance_after))
        .collect();

    let rows = rank(registry.all(), &latest);
    let keep = rows.len().min(RANKING_FILE_CAP);
    persist::write_json_atomic(target, &rows[..keep])?;

    debug!(ranked = rows.len(), written = keep, "ranking snapshot written");
    Ok(rows)
}
