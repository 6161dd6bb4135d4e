// =============================================================================
// Cup State — arena-wide goal tier and win counter (cup_state.json)
// =============================================================================
//
//   Init ──first read──► Running
//   Running.tick       : ticks_since_win += 1, last_tick_ts = now
//   Running.promotion  : wins += 1, current_goal += goal_increment,
//                        ticks_since_win = 0, last_tick_ts = now
//
// `current_goal` only ever moves up, and only by `goal_increment`.
// =============================================================================

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::CupConfig;
use crate::error::ArenaError;
use crate::persist::{self, Loaded};
use crate::types::{now_iso, round_to};

fn default_goal_increment() -> f64 {
    50.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CupState {
    pub current_goal: f64,
    #[serde(default = "default_goal_increment")]
    pub goal_increment: f64,
    #[serde(default)]
    pub wins: u64,
    #[serde(default)]
    pub ticks_since_win: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_tick_ts: Option<String>,
    /// Distance of the best balance to `current_goal`, in percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drawdown_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_tick_promoted: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl CupState {
    pub fn from_config(cfg: &CupConfig) -> Self {
        Self {
            current_goal: cfg.initial_goal,
            goal_increment: cfg.goal_increment,
            wins: 0,
            ticks_since_win: 0,
            last_tick_ts: None,
            drawdown_pct: None,
            last_tick_promoted: None,
            updated_at: None,
        }
    }

    /// Promotion transition. Returns the new goal.
    pub fn advance_goal(&mut self) -> f64 {
        self.wins += 1;
        self.current_goal += self.goal_increment;
        self.ticks_since_win = 0;
        self.last_tick_ts = Some(now_iso());
        self.current_goal
    }

    /// Per-tick bookkeeping after promotions were settled.
    ///
    /// `top_balance` is the best latest balance in the ledger, if any.
    pub fn record_tick(&mut self, promoted: usize, top_balance: Option<f64>, fallback_goal: f64) {
        let now = now_iso();
        self.last_tick_ts = Some(now.clone());
        self.updated_at = Some(now);
        self.last_tick_promoted = Some(promoted);
        self.ticks_since_win = if promoted > 0 { 0 } else { self.ticks_since_win + 1 };

        if let Some(top) = top_balance {
            let goal = if self.current_goal > 0.0 { self.current_goal } else { fallback_goal };
            let drawdown = ((goal - top) / goal.max(1e-9) * 100.0).max(0.0);
            self.drawdown_pct = Some(round_to(drawdown, 2));
        }
    }
}

/// File-backed owner of the cup state document.
#[derive(Debug, Clone)]
pub struct CupStateStore {
    path: PathBuf,
    config: CupConfig,
}

impl CupStateStore {
    pub fn new(path: impl Into<PathBuf>, config: CupConfig) -> Self {
        Self {
            path: path.into(),
            config,
        }
    }

    pub fn config(&self) -> &CupConfig {
        &self.config
    }

    /// Read the document; write and return the defaults when absent. An
    /// unreadable document yields defaults without being overwritten.
    pub fn ensure_state(&self) -> Result<CupState, ArenaError> {
        match persist::read_json::<CupState>(&self.path) {
            Loaded::Present(state) => Ok(state),
            Loaded::Absent => {
                let state = CupState::from_config(&self.config);
                self.save(&state)?;
                info!(goal = state.current_goal, "cup state initialised");
                Ok(state)
            }
            loaded @ Loaded::Corrupt(_) => {
                Ok(loaded.or_else_default(&self.path, || CupState::from_config(&self.config)))
            }
        }
    }

    pub fn save(&self, state: &CupState) -> Result<(), ArenaError> {
        persist::write_json_atomic(&self.path, state)
    }

    /// Apply the promotion transition and persist it. Returns the new goal.
    pub fn update_goal_after_win(&self) -> Result<f64, ArenaError> {
        let mut state = self.ensure_state()?;
        let goal = state.advance_goal();
        self.save(&state)?;
        info!(goal, wins = state.wins, "cup goal raised");
        Ok(goal)
    }
}
