// =============================================================================
// Shared types used across the Strategy Arena
// =============================================================================
//
// Profiles carry an optional `stats` block: a draft that never raced has no
// statistics at all, which is distinct from a strategy sitting at its
// starting balance. Every enum serialises as the lowercase tag stored in
// registry.json.
// =============================================================================

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Arena a strategy competes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Scalp,
    Intra,
    Swing,
    Macro,
    Quant,
    TestnetLive,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalp => write!(f, "scalp"),
            Self::Intra => write!(f, "intra"),
            Self::Swing => write!(f, "swing"),
            Self::Macro => write!(f, "macro"),
            Self::Quant => write!(f, "quant"),
            Self::TestnetLive => write!(f, "testnet_live"),
        }
    }
}

/// Lifecycle stage of a strategy. Only `Training` and `Race` are eligible
/// for contender selection; `Champion` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Draft,
    Training,
    Race,
    Champion,
}

impl Mode {
    pub fn is_racing(self) -> bool {
        matches!(self, Self::Training | Self::Race)
    }
}

impl Default for Mode {
    fn default() -> Self {
        Self::Draft
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Training => write!(f, "training"),
            Self::Race => write!(f, "race"),
            Self::Champion => write!(f, "champion"),
        }
    }
}

/// Where a strategy's fills come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    Sim,
    Testnet,
    Real,
}

impl Default for Engine {
    fn default() -> Self {
        Self::Sim
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sim => write!(f, "sim"),
            Self::Testnet => write!(f, "testnet"),
            Self::Real => write!(f, "real"),
        }
    }
}

/// Direction drawn by the simulator for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    /// Ledger reason tag, e.g. `sim_long`.
    pub fn reason(self) -> &'static str {
        match self {
            Self::Long => "sim_long",
            Self::Short => "sim_short",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Derived per-strategy statistics, mutated in place on every participation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub balance: f64,
    pub goal: f64,
    #[serde(default)]
    pub wins: u64,
    #[serde(default)]
    pub losses: u64,
    #[serde(default)]
    pub trades: u64,
    #[serde(default)]
    pub pnl_sum: f64,
    #[serde(default)]
    pub pnl_sum_sq: f64,
    /// Distance to the goal in percent: `max(0, (goal - balance) / goal * 100)`.
    #[serde(default)]
    pub drawdown_pct: f64,
    /// Monotonic maximum of `drawdown_pct`.
    #[serde(default)]
    pub max_drawdown_pct: f64,
    #[serde(default)]
    pub sharpe_ratio: f64,
    #[serde(default)]
    pub peak_balance: f64,
    #[serde(default = "now_iso")]
    pub last_updated: String,
}

impl StrategyStats {
    /// Fresh statistics for a strategy entering the arena.
    pub fn new(balance: f64, goal: f64) -> Self {
        let mut stats = Self {
            balance,
            goal,
            wins: 0,
            losses: 0,
            trades: 0,
            pnl_sum: 0.0,
            pnl_sum_sq: 0.0,
            drawdown_pct: 0.0,
            max_drawdown_pct: 0.0,
            sharpe_ratio: 0.0,
            peak_balance: balance,
            last_updated: now_iso(),
        };
        stats.refresh_drawdown();
        stats
    }

    /// Recompute `drawdown_pct` against the goal and raise the maximum.
    pub fn refresh_drawdown(&mut self) {
        self.drawdown_pct = if self.goal > 0.0 {
            round_to(((self.goal - self.balance) / self.goal * 100.0).max(0.0), 4)
        } else {
            0.0
        };
        if self.drawdown_pct > self.max_drawdown_pct {
            self.max_drawdown_pct = self.drawdown_pct;
        }
    }

    /// Fold one pnl draw into the accumulators. The caller has already moved
    /// `balance`.
    pub fn record_trade(&mut self, pnl: f64) {
        if pnl >= 0.0 {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.trades += 1;
        self.pnl_sum += pnl;
        self.pnl_sum_sq += pnl * pnl;

        self.sharpe_ratio = if self.trades > 1 {
            let n = self.trades as f64;
            let mean = self.pnl_sum / n;
            let variance = (self.pnl_sum_sq / n - mean * mean).max(1e-6);
            round_to(mean / variance.sqrt(), 4)
        } else {
            0.0
        };

        if self.balance > self.peak_balance {
            self.peak_balance = self.balance;
        }
        self.refresh_drawdown();
    }

}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Canonical description of a candidate strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyProfile {
    /// Stable unique key (e.g. "scalp_42").
    pub id: String,
    pub name: String,
    pub category: Category,
    pub timeframe: String,
    #[serde(default)]
    pub indicators: Vec<String>,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub engine: Engine,
    #[serde(default)]
    pub stats: Option<StrategyStats>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl StrategyProfile {
    /// Create a draft profile without statistics.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: Category,
        timeframe: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category,
            timeframe: timeframe.into(),
            indicators: Vec::new(),
            mode: Mode::Draft,
            engine: Engine::Sim,
            stats: None,
            notes: None,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_stats(mut self, stats: StrategyStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_indicators<I, S>(mut self, indicators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indicators = indicators.into_iter().map(Into::into).collect();
        self
    }

    /// Return the stats block, creating it from the given defaults if absent.
    pub fn ensure_stats(&mut self, starting_balance: f64, goal: f64) -> &mut StrategyStats {
        self.stats
            .get_or_insert_with(|| StrategyStats::new(starting_balance, goal))
    }
}

// ---------------------------------------------------------------------------
// Ledger & notes
// ---------------------------------------------------------------------------

/// Immutable append record. `balance_after` is the authoritative equity of
/// the strategy once this entry is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyLedgerEntry {
    pub strategy_id: String,
    pub ts: String,
    pub pnl: f64,
    pub balance_after: f64,
    pub reason: String,
}

/// Free-form operator note attached to a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub strategy_id: String,
    pub note: String,
    #[serde(default)]
    pub author: Option<String>,
    pub ts: String,
}

// ---------------------------------------------------------------------------
// Time & rounding helpers
// ---------------------------------------------------------------------------

/// Format a UTC instant as ISO-8601 with microseconds and a `Z` suffix.
pub fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current UTC time as an ISO-8601 `Z` string.
pub fn now_iso() -> String {
    format_ts(Utc::now())
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

// =============================================================================
// Tests
// =============================================================================
