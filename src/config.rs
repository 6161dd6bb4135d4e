// =============================================================================
// Configuration — cup constants, operator settings and on-disk layout
// =============================================================================
//
// Two documents:
//   - cup_config.json      — CupConfig, the constants of the tournament.
//                            Written with defaults when absent.
//   - arena_settings.json  — ArenaSettings, operator knobs (paths, cadence,
//                            market source, scoreboard, HTTP bind address).
//
// All fields carry `#[serde(default)]` so that adding new fields never
// breaks loading an older document.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ArenaError;
use crate::persist::{self, Loaded};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_starting_balance() -> f64 {
    5.0
}

fn default_initial_goal() -> f64 {
    100.0
}

fn default_goal_increment() -> f64 {
    50.0
}

fn default_max_active_strategies() -> usize {
    200
}

fn default_cooldown_after_win_minutes() -> u64 {
    30
}

fn default_drawdown_stop_pct() -> f64 {
    20.0
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("arena_data")
}

fn default_interval_seconds() -> u64 {
    300
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_timeframe() -> String {
    "5m".to_string()
}

fn default_fixed_close() -> f64 {
    65_000.0
}

fn default_score_threshold() -> f64 {
    1.15
}

fn default_promotion_wins() -> u32 {
    10
}

fn default_scoreboard_top() -> usize {
    200
}

fn default_true() -> bool {
    true
}

fn default_bind_addr() -> String {
    "0.0.0.0:3002".to_string()
}

// =============================================================================
// CupConfig
// =============================================================================

/// Tournament constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CupConfig {
    /// Equity every strategy starts from.
    #[serde(default = "default_starting_balance")]
    pub starting_balance: f64,

    /// First goal tier of the cup.
    #[serde(default = "default_initial_goal")]
    pub initial_goal: f64,

    /// Added to the cup goal after every promotion batch.
    #[serde(default = "default_goal_increment")]
    pub goal_increment: f64,

    /// Contender cap per tick.
    #[serde(default = "default_max_active_strategies")]
    pub max_active_strategies: usize,

    /// Reserved for risk extensions; carried but not consulted by the tick.
    #[serde(default = "default_cooldown_after_win_minutes")]
    pub cooldown_after_win_minutes: u64,

    /// Reserved for risk extensions; carried but not consulted by the tick.
    #[serde(default = "default_drawdown_stop_pct")]
    pub drawdown_stop_pct: f64,
}

impl Default for CupConfig {
    fn default() -> Self {
        Self {
            starting_balance: default_starting_balance(),
            initial_goal: default_initial_goal(),
            goal_increment: default_goal_increment(),
            max_active_strategies: default_max_active_strategies(),
            cooldown_after_win_minutes: default_cooldown_after_win_minutes(),
            drawdown_stop_pct: default_drawdown_stop_pct(),
        }
    }
}

impl CupConfig {
    /// Load `path`, writing the defaults there first if it does not exist.
    ///
    /// A document that exists but cannot be parsed is left untouched and the
    /// defaults are used for this process.
    pub fn load_or_create(path: &Path) -> Result<Self, ArenaError> {
        match persist::read_json::<Self>(path) {
            Loaded::Present(cfg) => {
                info!(
                    path = %path.display(),
                    initial_goal = cfg.initial_goal,
                    max_active = cfg.max_active_strategies,
                    "cup config loaded"
                );
                Ok(cfg)
            }
            Loaded::Absent => {
                let cfg = Self::default();
                persist::write_json_atomic(path, &cfg)?;
                info!(path = %path.display(), "cup config created with defaults");
                Ok(cfg)
            }
            Loaded::Corrupt(reason) => {
                warn!(path = %path.display(), reason = %reason, "cup config unreadable, using defaults");
                Ok(Self::default())
            }
        }
    }
}

// =============================================================================
// ArenaSettings
// =============================================================================

/// Where the simulator reads its market snapshot from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketSource {
    Binance,
    Fixed,
}

impl Default for MarketSource {
    fn default() -> Self {
        Self::Binance
    }
}

impl std::fmt::Display for MarketSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binance => write!(f, "binance"),
            Self::Fixed => write!(f, "fixed"),
        }
    }
}

/// Operator settings for the arena process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaSettings {
    // --- Layout -------------------------------------------------------------

    /// Directory holding every persisted arena artefact.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    // --- Service ------------------------------------------------------------

    /// Seconds between ticks. The service never goes below 30.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    // --- Market snapshot ----------------------------------------------------

    #[serde(default)]
    pub market_source: MarketSource,

    /// Reference symbol for the shared snapshot.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Kline interval of the reference series.
    #[serde(default = "default_timeframe")]
    pub timeframe: String,

    /// Close used when `market_source = fixed`.
    #[serde(default = "default_fixed_close")]
    pub fixed_close: f64,

    /// ATR used when `market_source = fixed`.
    #[serde(default)]
    pub fixed_atr: f64,

    // --- Scoreboard ---------------------------------------------------------

    /// Minimum ranking score that counts as a victory.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,

    /// Victories needed to appear in champions.json.
    #[serde(default = "default_promotion_wins")]
    pub promotion_wins: u32,

    /// Entries kept in scoreboard.json.
    #[serde(default = "default_scoreboard_top")]
    pub scoreboard_top: usize,

    /// Feed every ranking snapshot to the scoreboard.
    #[serde(default = "default_true")]
    pub update_scoreboard: bool,

    // --- HTTP ---------------------------------------------------------------

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ArenaSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            interval_seconds: default_interval_seconds(),
            market_source: MarketSource::default(),
            symbol: default_symbol(),
            timeframe: default_timeframe(),
            fixed_close: default_fixed_close(),
            fixed_atr: 0.0,
            score_threshold: default_score_threshold(),
            promotion_wins: default_promotion_wins(),
            scoreboard_top: default_scoreboard_top(),
            update_scoreboard: true,
            bind_addr: default_bind_addr(),
        }
    }
}

impl ArenaSettings {
    /// Load settings from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read arena settings from {}", path.display()))?;

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse arena settings from {}", path.display()))?;

        info!(
            path = %path.display(),
            data_dir = %settings.data_dir.display(),
            market_source = %settings.market_source,
            "arena settings loaded"
        );

        Ok(settings)
    }

    /// Persist the settings atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        persist::write_json_atomic(path, self)
            .with_context(|| format!("failed to save arena settings to {}", path.display()))?;
        info!(path = %path.display(), "arena settings saved (atomic)");
        Ok(())
    }

    /// Apply `ARENA_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("ARENA_DATA_DIR") {
            if !dir.trim().is_empty() {
                self.data_dir = PathBuf::from(dir.trim());
            }
        }
        if let Ok(raw) = std::env::var("ARENA_INTERVAL_SECONDS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) => self.interval_seconds = secs,
                Err(e) => warn!(value = %raw, error = %e, "ignoring invalid ARENA_INTERVAL_SECONDS"),
            }
        }
        if let Ok(symbol) = std::env::var("ARENA_SYMBOL") {
            let symbol = symbol.trim().to_uppercase();
            if !symbol.is_empty() {
                self.symbol = symbol;
            }
        }
        if let Ok(addr) = std::env::var("ARENA_BIND_ADDR") {
            if !addr.trim().is_empty() {
                self.bind_addr = addr.trim().to_string();
            }
        }
    }

    pub fn paths(&self) -> ArenaPaths {
        ArenaPaths::new(&self.data_dir)
    }
}

// =============================================================================
// ArenaPaths
// =============================================================================

/// File layout of the persisted arena state under one data directory.
#[derive(Debug, Clone)]
pub struct ArenaPaths {
    pub root: PathBuf,
}

impl ArenaPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn registry(&self) -> PathBuf {
        self.root.join("registry.json")
    }

    pub fn cup_state(&self) -> PathBuf {
        self.root.join("cup_state.json")
    }

    pub fn cup_config(&self) -> PathBuf {
        self.root.join("cup_config.json")
    }

    pub fn ledger_jsonl(&self) -> PathBuf {
        self.root.join("ledger.jsonl")
    }

    pub fn ranking(&self) -> PathBuf {
        self.root.join("ranking_latest.json")
    }

    pub fn database(&self) -> PathBuf {
        self.root.join("arena.db")
    }

    pub fn scoreboard(&self) -> PathBuf {
        self.root.join("scoreboard.json")
    }

    pub fn champions(&self) -> PathBuf {
        self.root.join("champions.json")
    }

    pub fn promoted(&self) -> PathBuf {
        self.root.join("promoted")
    }
}
