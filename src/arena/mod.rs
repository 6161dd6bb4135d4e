// =============================================================================
// Arena — the aggregate every caller goes through
// =============================================================================
//
// One `parking_lot::Mutex` guards the league manager, which owns the Registry,
// the Cup State document, the JSONL ledger and the Simulator. Every mutating
// operation (tick, promote, note, bootstrap) takes that lock for its whole
// duration, so no reader ever observes a half-applied tick. Read-only Store
// queries bypass the lock; SQLite serialises them against writers.
//
// All methods block on file and database I/O. Async callers run them through
// `tokio::task::spawn_blocking`.
// =============================================================================

pub mod bootstrap;
pub mod cup;
pub mod league;
pub mod promoter;
pub mod ranking;
pub mod registry;
pub mod scoreboard;
pub mod service;
pub mod simulator;
pub mod store;
pub mod validator;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{ArenaPaths, ArenaSettings, CupConfig};
use crate::error::ArenaError;
use crate::market::MarketSnapshotProvider;
use crate::persist;
use crate::types::{Note, StrategyLedgerEntry, StrategyProfile};

use self::cup::{CupState, CupStateStore};
use self::league::LeagueManager;
use self::promoter::{ExportOptions, ExportedPackage};
use self::ranking::RankingRow;
use self::registry::Registry;
use self::scoreboard::{Scoreboard, ScoreboardEntry};
use self::simulator::Simulator;
use self::store::{LedgerSummary, Store};
use self::validator::ValidationThresholds;

/// Summary of one `Arena::tick`.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub tick_id: String,
    pub contenders: usize,
    pub ledger_rows: usize,
    pub promoted: Vec<String>,
    pub current_goal: f64,
    pub ranked: usize,
    pub champions: Option<usize>,
    pub elapsed_ms: u64,
}

/// Operator request to export a strategy.
#[derive(Debug, Clone, Default)]
pub struct PromoteRequest {
    pub thresholds: ValidationThresholds,
    pub force: bool,
    /// Defaults to `<data_dir>/promoted`.
    pub dest_dir: Option<PathBuf>,
}

pub struct Arena {
    league: Mutex<LeagueManager>,
    store: Store,
    scoreboard: Scoreboard,
    settings: ArenaSettings,
    paths: ArenaPaths,
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena").field("data_dir", &self.paths.root).finish()
    }
}

impl Arena {
    /// Open the arena rooted at `settings.data_dir`, drawing market snapshots
    /// from `provider`.
    pub fn open(settings: &ArenaSettings, provider: Arc<dyn MarketSnapshotProvider>) -> Result<Self, ArenaError> {
        Self::open_with(settings, Simulator::new(provider))
    }

    /// Open with an explicit simulator (e.g. a seeded one).
    pub fn open_with(settings: &ArenaSettings, simulator: Simulator) -> Result<Self, ArenaError> {
        let paths = settings.paths();
        std::fs::create_dir_all(&paths.root)
            .map_err(|e| ArenaError::io(format!("create dir {}", paths.root.display()), e))?;

        let cfg = CupConfig::load_or_create(&paths.cup_config())?;
        let store = Store::open(paths.database())?;
        let cup = CupStateStore::new(paths.cup_state(), cfg.clone());

        // A lost cup_state.json is rebuilt from the Store mirror.
        if !paths.cup_state().exists() {
            let mirror = serde_json::Value::Object(store.load_state());
            if let Ok(state) = serde_json::from_value::<CupState>(mirror) {
                cup.save(&state)?;
                info!(goal = state.current_goal, wins = state.wins, "cup state restored from store mirror");
            }
        }

        let registry = Registry::load(paths.registry(), cup);
        let league = LeagueManager::new(registry, simulator, store.clone(), cfg, paths.ledger_jsonl());
        let scoreboard = Scoreboard::new(paths.scoreboard(), paths.champions());

        info!(data_dir = %paths.root.display(), "arena opened");
        Ok(Self {
            league: Mutex::new(league),
            store,
            scoreboard,
            settings: settings.clone(),
            paths,
        })
    }

    pub fn settings(&self) -> &ArenaSettings {
        &self.settings
    }

    pub fn paths(&self) -> &ArenaPaths {
        &self.paths
    }

    // -------------------------------------------------------------------------
    // Mutations (lock held throughout)
    // -------------------------------------------------------------------------

    /// One full arena cycle: simulate, promote, record cup state, rank, and
    /// feed the scoreboard.
    pub fn tick(&self) -> Result<TickReport, ArenaError> {
        let tick_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut league = self.league.lock();

        let outcome = league.run_tick()?;
        let promoted = league.promote_winners()?;
        let state = league.update_state(promoted.len())?;
        let ranking = ranking::generate_ranking(league.registry(), &self.store, &self.paths.ranking())?;

        let champions = if self.settings.update_scoreboard {
            self.scoreboard
                .update(&ranking, self.settings.score_threshold, self.settings.scoreboard_top)?;
            Some(self.scoreboard.write_champions(self.settings.promotion_wins)?.len())
        } else {
            None
        };

        let report = TickReport {
            tick_id,
            contenders: outcome.contenders,
            ledger_rows: outcome.entries.len(),
            promoted,
            current_goal: state.current_goal,
            ranked: ranking.len(),
            champions,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            tick_id = %report.tick_id,
            contenders = report.contenders,
            ledger_rows = report.ledger_rows,
            promoted = report.promoted.len(),
            goal = report.current_goal,
            elapsed_ms = report.elapsed_ms,
            "arena tick complete"
        );
        Ok(report)
    }

    /// Rewrite ranking_latest.json from the current registry and ledger.
    pub fn generate_ranking(&self) -> Result<Vec<RankingRow>, ArenaError> {
        let league = self.league.lock();
        ranking::generate_ranking(league.registry(), &self.store, &self.paths.ranking())
    }

    /// Validate and export `strategy_id` as a package.
    pub fn promote_strategy(&self, strategy_id: &str, req: &PromoteRequest) -> Result<ExportedPackage, ArenaError> {
        let opts = ExportOptions {
            thresholds: req.thresholds,
            force: req.force,
            dest_dir: req.dest_dir.clone().unwrap_or_else(|| self.paths.promoted()),
        };
        let league = self.league.lock();
        promoter::export_strategy(league.registry(), &self.store, strategy_id, &opts)
    }

    pub fn add_note(&self, strategy_id: &str, note: &str, author: Option<&str>) -> Result<Note, ArenaError> {
        let _league = self.league.lock();
        self.store.add_note(strategy_id, note, author)
    }

    /// Seed the registry with up to `total` training profiles.
    pub fn bootstrap(&self, total: usize) -> Result<usize, ArenaError> {
        let mut league = self.league.lock();
        let cfg = league.config().clone();
        let mut rng = StdRng::from_entropy();
        bootstrap::bootstrap(league.registry_mut(), total, &cfg, &mut rng)
    }

    /// Credit an operator-recorded win of `pnl` to `strategy_id`.
    pub fn record_win(&self, strategy_id: &str, pnl: f64) -> Result<(), ArenaError> {
        let mut league = self.league.lock();
        league.registry_mut().record_win(strategy_id, pnl)?;
        info!(strategy_id, pnl, "win credited");
        Ok(())
    }

    /// Cup state document, created with defaults on first read.
    pub fn cup_state(&self) -> Result<CupState, ArenaError> {
        let league = self.league.lock();
        league.registry().ensure_state()
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub fn profile(&self, strategy_id: &str) -> Option<StrategyProfile> {
        self.league.lock().registry().get(strategy_id).cloned()
    }

    pub fn strategy_count(&self) -> usize {
        self.league.lock().registry().len()
    }

    /// Top `limit` rows of the last ranking snapshot on disk.
    pub fn ranking(&self, limit: usize) -> Vec<RankingRow> {
        let path = self.paths.ranking();
        let mut rows: Vec<RankingRow> = persist::read_json(&path).or_else_default(&path, Vec::new);
        rows.truncate(limit);
        rows
    }

    pub fn ledger(&self, strategy_id: &str, limit: usize) -> Result<Vec<StrategyLedgerEntry>, ArenaError> {
        self.store.ledger_for(strategy_id, limit)
    }

    pub fn ledger_summary(&self, strategy_id: &str, limit: usize) -> Result<LedgerSummary, ArenaError> {
        self.store.ledger_summary(strategy_id, limit)
    }

    pub fn notes(&self, strategy_id: &str, limit: usize) -> Result<Vec<Note>, ArenaError> {
        self.store.notes_for(strategy_id, limit)
    }

    pub fn champions(&self) -> Vec<ScoreboardEntry> {
        self.scoreboard.champions()
    }

    pub fn scoreboard(&self) -> Vec<ScoreboardEntry> {
        self.scoreboard.entries()
    }

    /// Regenerate the ranking, logging instead of failing. Used on shutdown.
    pub fn flush_ranking(&self) {
        if let Err(e) = self.generate_ranking() {
            warn!(error = %e, "final ranking regeneration failed");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarketSource;
    use crate::market::FixedSnapshot;
    use crate::types::{Category, Mode, StrategyStats};

    fn settings_in(dir: &std::path::Path) -> ArenaSettings {
        ArenaSettings {
            data_dir: dir.to_path_buf(),
            market_source: MarketSource::Fixed,
            ..ArenaSettings::default()
        }
    }

    fn seeded_arena(dir: &std::path::Path, seed: u64) -> Arena {
        let provider = Arc::new(FixedSnapshot::new(65_000.0, 0.0));
        Arena::open_with(&settings_in(dir), Simulator::seeded(provider, seed)).unwrap()
    }

    fn seed_profiles(arena: &Arena, profiles: Vec<StrategyProfile>) {
        let mut league = arena.league.lock();
        league.registry_mut().extend(profiles);
        league.registry().save().unwrap();
    }

    fn training(id: &str) -> StrategyProfile {
        StrategyProfile::new(id, id, Category::Scalp, "1m").with_mode(Mode::Training)
    }

    #[test]
    fn first_tick_with_three_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let arena = seeded_arena(dir.path(), 2024);
        seed_profiles(&arena, vec![training("alpha"), training("beta"), training("gamma")]);

        let report = arena.tick().unwrap();
        assert_eq!(report.contenders, 3);
        assert_eq!(report.ledger_rows, 3);

        for id in ["alpha", "beta", "gamma"] {
            let stats = arena.profile(id).unwrap().stats.unwrap();
            assert_eq!(stats.trades, 1);
            assert_eq!(stats.wins + stats.losses, 1);
            assert!((stats.balance - 5.0).abs() <= 5.0);
            assert_eq!(arena.ledger(id, 1).unwrap()[0].balance_after, stats.balance);
        }

        let ranking = arena.ranking(usize::MAX);
        assert_eq!(ranking.len(), 3);
        for pair in ranking.windows(2) {
            assert!(
                pair[0].score > pair[1].score || (pair[0].score == pair[1].score && pair[0].id < pair[1].id),
                "{} before {}",
                pair[0].id,
                pair[1].id
            );
        }
    }

    #[test]
    fn empty_registry_tick_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let arena = seeded_arena(dir.path(), 1);
        let report = arena.tick().unwrap();
        assert_eq!(report.ledger_rows, 0);
        assert!(!dir.path().join("ledger.jsonl").exists());
        assert!(arena.ranking(10).is_empty());
    }

    #[test]
    fn ranking_is_byte_identical_when_nothing_changed() {
        let dir = tempfile::tempdir().unwrap();
        let arena = seeded_arena(dir.path(), 3);
        seed_profiles(&arena, (0..12).map(|i| training(&format!("s{i:02}"))).collect());
        arena.tick().unwrap();

        arena.generate_ranking().unwrap();
        let first = std::fs::read(arena.paths().ranking()).unwrap();
        arena.generate_ranking().unwrap();
        let second = std::fs::read(arena.paths().ranking()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn goal_only_moves_on_promotion() {
        let dir = tempfile::tempdir().unwrap();
        let arena = seeded_arena(dir.path(), 4);
        seed_profiles(&arena, vec![training("a"), training("b")]);

        let mut last_goal = arena.cup_state().unwrap().current_goal;
        for _ in 0..10 {
            let report = arena.tick().unwrap();
            let goal = arena.cup_state().unwrap().current_goal;
            if report.promoted.is_empty() {
                assert_eq!(goal, last_goal);
            } else {
                assert_eq!(goal, last_goal + 50.0);
            }
            last_goal = goal;
        }
    }

    #[test]
    fn promotion_through_tick_updates_cup_state() {
        let dir = tempfile::tempdir().unwrap();
        let arena = seeded_arena(dir.path(), 5);
        seed_profiles(
            &arena,
            vec![StrategyProfile::new("rich", "Rich", Category::Swing, "4h")
                .with_mode(Mode::Race)
                .with_stats(StrategyStats::new(101.0, 100.0))],
        );

        let report = arena.tick().unwrap();
        assert_eq!(report.promoted, ["rich"]);
        assert_eq!(report.current_goal, 150.0);

        let state = arena.cup_state().unwrap();
        assert_eq!(state.wins, 1);
        assert_eq!(state.ticks_since_win, 0);
        assert_eq!(state.last_tick_promoted, Some(1));
        assert_eq!(arena.profile("rich").unwrap().mode, Mode::Champion);
    }

    #[test]
    fn forced_promotion_writes_failed_validation() {
        let dir = tempfile::tempdir().unwrap();
        let arena = seeded_arena(dir.path(), 6);
        seed_profiles(&arena, vec![training("a")]);
        arena.tick().unwrap();

        let req = PromoteRequest::default();
        assert!(matches!(
            arena.promote_strategy("a", &req),
            Err(ArenaError::ValidationRejected { .. })
        ));

        let forced = PromoteRequest { force: true, ..PromoteRequest::default() };
        let pkg = arena.promote_strategy("a", &forced).unwrap();
        assert!(pkg.dir.starts_with(dir.path().join("promoted")));
        assert!(!pkg.validation.ok);
        assert_eq!(promoter::package_files(&pkg.dir).unwrap().len(), 4);
    }

    #[test]
    fn notes_round_trip_through_arena() {
        let dir = tempfile::tempdir().unwrap();
        let arena = seeded_arena(dir.path(), 7);
        arena.add_note("a", "watch the spread", Some("ops")).unwrap();
        let notes = arena.notes("a", 20).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].author.as_deref(), Some("ops"));
    }

    #[test]
    fn reopen_keeps_registry_and_ledger() {
        let dir = tempfile::tempdir().unwrap();
        {
            let arena = seeded_arena(dir.path(), 8);
            assert_eq!(arena.bootstrap(25).unwrap(), 25);
            arena.tick().unwrap();
        }
        let arena = seeded_arena(dir.path(), 9);
        assert_eq!(arena.strategy_count(), 25);
        let stats = arena.profile("scalp_1").unwrap().stats.unwrap();
        assert_eq!(stats.trades, 1);
        assert_eq!(arena.ledger_summary("scalp_1", 500).unwrap().total_trades, 1);
    }

    #[test]
    fn unreachable_store_fails_tick_without_advancing_cup() {
        let dir = tempfile::tempdir().unwrap();
        let arena = seeded_arena(dir.path(), 10);
        seed_profiles(
            &arena,
            vec![
                training("a"),
                StrategyProfile::new("rich", "rich", Category::Swing, "4h")
                    .with_mode(Mode::Race)
                    .with_stats(StrategyStats::new(180.0, 100.0)),
            ],
        );
        arena.cup_state().unwrap();
        let cup_path = arena.paths().cup_state();
        let before = std::fs::read(&cup_path).unwrap();

        // Swap the database file for a directory so every connection fails.
        let db = arena.paths().database();
        std::fs::remove_file(&db).unwrap();
        std::fs::create_dir(&db).unwrap();

        let err = arena.tick().unwrap_err();
        assert!(matches!(err, ArenaError::StorageUnavailable(_)), "got {err}");
        assert_eq!(std::fs::read(&cup_path).unwrap(), before);
        assert_eq!(arena.profile("rich").unwrap().mode, Mode::Race);
    }

    #[test]
    fn lost_cup_state_is_restored_from_store_mirror() {
        let dir = tempfile::tempdir().unwrap();
        {
            let arena = seeded_arena(dir.path(), 11);
            seed_profiles(
                &arena,
                vec![training("a").with_stats(StrategyStats::new(130.0, 100.0))],
            );
            assert_eq!(arena.tick().unwrap().promoted, ["a"]);
            assert_eq!(arena.cup_state().unwrap().current_goal, 150.0);
            std::fs::remove_file(arena.paths().cup_state()).unwrap();
        }

        let arena = seeded_arena(dir.path(), 12);
        let state = arena.cup_state().unwrap();
        assert_eq!(state.current_goal, 150.0);
        assert_eq!(state.wins, 1);
    }

    #[test]
    fn record_win_credits_balance() {
        let dir = tempfile::tempdir().unwrap();
        let arena = seeded_arena(dir.path(), 13);
        seed_profiles(&arena, vec![training("a").with_stats(StrategyStats::new(5.0, 100.0))]);
        arena.record_win("a", 2.5).unwrap();
        let stats = arena.profile("a").unwrap().stats.unwrap();
        assert_eq!(stats.balance, 7.5);
        assert_eq!(stats.wins, 1);
        assert!(matches!(arena.record_win("ghost", 1.0), Err(ArenaError::NotFound(_))));
    }
}
