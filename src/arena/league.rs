// =============================================================================
// League Manager — per-tick orchestration
// =============================================================================
//
// run_tick:
//   1. select contenders (stats ensured, below goal, training/race, capped)
//   2. simulate one batch against a fresh snapshot
//   3. upsert participants, save registry.json once
//   4. append the batch to ledger.jsonl and to the Store
//
// promote_winners:
//   every non-champion at or above the cup goal becomes champion; if any did,
//   the cup goal rises once (persisted first), then registry.json is saved.
//
// Any error aborts the tick before the cup state is touched.
// =============================================================================

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use tracing::{debug, info};

use super::cup::CupState;
use super::registry::Registry;
use super::simulator::Simulator;
use super::store::Store;
use crate::config::CupConfig;
use crate::error::ArenaError;
use crate::types::{Mode, StrategyLedgerEntry, StrategyProfile};

/// What one `run_tick` did.
#[derive(Debug, Clone, Default)]
pub struct TickOutcome {
    pub contenders: usize,
    pub entries: Vec<StrategyLedgerEntry>,
}

#[derive(Debug)]
pub struct LeagueManager {
    pub(crate) registry: Registry,
    pub(crate) simulator: Simulator,
    store: Store,
    cfg: CupConfig,
    ledger_path: PathBuf,
}

impl LeagueManager {
    pub fn new(registry: Registry, simulator: Simulator, store: Store, cfg: CupConfig, ledger_path: PathBuf) -> Self {
        Self {
            registry,
            simulator,
            store,
            cfg,
            ledger_path,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn config(&self) -> &CupConfig {
        &self.cfg
    }

    /// Ensure every profile has stats, then pick eligible profiles in
    /// registry order up to `max_active_strategies`.
    pub fn select_contenders(&mut self) -> Vec<StrategyProfile> {
        let (balance, goal, cap) = (
            self.cfg.starting_balance,
            self.cfg.initial_goal,
            self.cfg.max_active_strategies,
        );

        let mut contenders = Vec::new();
        for profile in self.registry.all_mut() {
            let stats = profile.ensure_stats(balance, goal);
            if stats.balance >= stats.goal {
                continue;
            }
            if profile.mode.is_racing() && contenders.len() < cap {
                contenders.push(profile.clone());
            }
        }
        contenders
    }

    pub fn run_tick(&mut self) -> Result<TickOutcome, ArenaError> {
        let mut contenders = self.select_contenders();
        if contenders.is_empty() {
            debug!("no contenders this tick");
            return Ok(TickOutcome::default());
        }

        let entries = self.simulator.play_batch(&mut contenders, &self.cfg)?;
        let count = contenders.len();
        self.registry.extend(contenders);
        self.registry.save()?;
        self.append_ledger(&entries)?;

        Ok(TickOutcome {
            contenders: count,
            entries,
        })
    }

    /// Append to ledger.jsonl, then to the Store. Both must succeed.
    fn append_ledger(&self, entries: &[StrategyLedgerEntry]) -> Result<(), ArenaError> {
        if let Some(parent) = self.ledger_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ArenaError::io(format!("create dir {}", parent.display()), e))?;
        }

        let mut buf = String::new();
        for entry in entries {
            let line = serde_json::to_string(entry)
                .map_err(|e| ArenaError::StorageUnavailable(format!("serialise ledger entry: {e}")))?;
            buf.push_str(&line);
            buf.push('\n');
        }

        let what = self.ledger_path.display();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.ledger_path)
            .map_err(|e| ArenaError::io(format!("open {what}"), e))?;
        file.write_all(buf.as_bytes())
            .map_err(|e| ArenaError::io(format!("append {what}"), e))?;
        file.sync_data()
            .map_err(|e| ArenaError::io(format!("sync {what}"), e))?;

        self.store.append_ledger(entries)?;
        Ok(())
    }

    /// Crown every non-champion whose balance reached the cup goal. Returns
    /// the promoted ids.
    ///
    /// The goal is raised before any mode changes, so a failed cup-state
    /// write leaves the registry untouched and the winners eligible again.
    pub fn promote_winners(&mut self) -> Result<Vec<String>, ArenaError> {
        let goal = self.registry.ensure_state()?.current_goal;

        let winners: Vec<String> = self
            .registry
            .all()
            .iter()
            .filter(|p| p.mode != Mode::Champion)
            .filter(|p| p.stats.as_ref().is_some_and(|s| s.balance >= goal))
            .map(|p| p.id.clone())
            .collect();
        if winners.is_empty() {
            return Ok(winners);
        }

        let new_goal = self.registry.update_goal_after_win()?;
        for id in &winners {
            if let Some(profile) = self.registry.get_mut(id) {
                profile.mode = Mode::Champion;
            }
        }
        self.registry.save()?;
        info!(promoted = winners.len(), ids = ?winners, goal = new_goal, "strategies promoted to champion");
        Ok(winners)
    }

    /// Per-tick cup bookkeeping, mirrored into the Store.
    pub fn update_state(&self, promoted: usize) -> Result<CupState, ArenaError> {
        let mut state = self.registry.ensure_state()?;
        let top = self.store.top_balances(1)?.first().map(|e| e.balance_after);
        state.record_tick(promoted, top, self.cfg.initial_goal);
        self.registry.save_state(&state)?;
        self.store.save_state(&state)?;
        Ok(state)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;

    use crate::arena::cup::CupStateStore;
    use crate::market::FixedSnapshot;
    use crate::types::{Category, StrategyStats};

    fn manager(dir: &Path, cfg: CupConfig) -> LeagueManager {
        let cup = CupStateStore::new(dir.join("cup_state.json"), cfg.clone());
        let registry = Registry::load(dir.join("registry.json"), cup);
        let simulator = Simulator::seeded(Arc::new(FixedSnapshot::new(65_000.0, 0.0)), 11);
        let store = Store::open(dir.join("arena.db")).unwrap();
        LeagueManager::new(registry, simulator, store, cfg, dir.join("ledger.jsonl"))
    }

    fn racer(id: &str, mode: Mode) -> StrategyProfile {
        StrategyProfile::new(id, id, Category::Intra, "5m").with_mode(mode)
    }

    fn jsonl_lines(dir: &Path) -> usize {
        std::fs::read_to_string(dir.join("ledger.jsonl"))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    #[test]
    fn empty_registry_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut lm = manager(dir.path(), CupConfig::default());
        let outcome = lm.run_tick().unwrap();
        assert_eq!(outcome.contenders, 0);
        assert!(!dir.path().join("ledger.jsonl").exists());
        assert!(lm.store.top_balances(10).unwrap().is_empty());
    }

    #[test]
    fn only_racing_modes_below_goal_are_selected() {
        let dir = tempfile::tempdir().unwrap();
        let mut lm = manager(dir.path(), CupConfig::default());
        lm.registry.extend([
            racer("draft", Mode::Draft),
            racer("train", Mode::Training),
            racer("race", Mode::Race),
            racer("champ", Mode::Champion),
            racer("rich", Mode::Race).with_stats(StrategyStats::new(100.0, 100.0)),
        ]);

        let ids: Vec<String> = lm.select_contenders().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, ["train", "race"]);
        assert!(lm.registry.all().iter().all(|p| p.stats.is_some()));
    }

    #[test]
    fn everyone_at_goal_means_no_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut lm = manager(dir.path(), CupConfig::default());
        lm.registry.extend([
            racer("a", Mode::Race).with_stats(StrategyStats::new(150.0, 100.0)),
            racer("b", Mode::Training).with_stats(StrategyStats::new(100.0, 100.0)),
        ]);
        assert_eq!(lm.run_tick().unwrap().contenders, 0);
        assert_eq!(jsonl_lines(dir.path()), 0);
    }

    #[test]
    fn zero_cap_selects_nobody() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CupConfig { max_active_strategies: 0, ..CupConfig::default() };
        let mut lm = manager(dir.path(), cfg);
        lm.registry.extend([racer("a", Mode::Race), racer("b", Mode::Training)]);
        assert!(lm.select_contenders().is_empty());
        assert_eq!(lm.run_tick().unwrap().contenders, 0);
    }

    #[test]
    fn cap_limits_contenders() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CupConfig { max_active_strategies: 3, ..CupConfig::default() };
        let mut lm = manager(dir.path(), cfg);
        lm.registry.extend((0..10).map(|i| racer(&format!("s{i}"), Mode::Training)));
        assert_eq!(lm.run_tick().unwrap().contenders, 3);
    }

    #[test]
    fn balances_track_ledger_across_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let mut lm = manager(dir.path(), CupConfig::default());
        lm.registry.extend(["a", "b", "c", "d"].map(|id| racer(id, Mode::Training)));
        lm.registry.upsert(racer("c", Mode::Race));

        for _ in 0..15 {
            lm.run_tick().unwrap();
        }

        assert_eq!(jsonl_lines(dir.path()), 60);
        for profile in lm.registry.all() {
            let stats = profile.stats.as_ref().unwrap();
            let last = lm.store.ledger_for(&profile.id, 1).unwrap();
            assert_eq!(last[0].balance_after, stats.balance, "{}", profile.id);
            assert!(stats.max_drawdown_pct >= stats.drawdown_pct);
            assert_eq!(stats.trades, 15);
        }

        // registry.json on disk matches memory
        let reloaded = Registry::load(
            dir.path().join("registry.json"),
            CupStateStore::new(dir.path().join("cup_state.json"), CupConfig::default()),
        );
        assert_eq!(reloaded.all(), lm.registry.all());
    }

    #[test]
    fn ledger_rows_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let mut lm = manager(dir.path(), CupConfig::default());
        lm.registry.extend((0..20).map(|i| racer(&format!("s{i}"), Mode::Training)));
        for _ in 0..5 {
            lm.run_tick().unwrap();
        }
        let content = std::fs::read_to_string(dir.path().join("ledger.jsonl")).unwrap();
        let mut lines: Vec<&str> = content.lines().collect();
        let total = lines.len();
        lines.sort_unstable();
        lines.dedup();
        assert_eq!(lines.len(), total);
    }

    #[test]
    fn promotion_raises_goal_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut lm = manager(dir.path(), CupConfig::default());
        lm.registry.extend([
            racer("winner", Mode::Race).with_stats(StrategyStats::new(101.0, 100.0)),
            racer("loser", Mode::Race).with_stats(StrategyStats::new(40.0, 100.0)),
        ]);

        let promoted = lm.promote_winners().unwrap();
        assert_eq!(promoted, ["winner"]);
        assert_eq!(lm.registry.get("winner").unwrap().mode, Mode::Champion);
        assert_eq!(lm.registry.get("loser").unwrap().mode, Mode::Race);

        let on_disk: CupState =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("cup_state.json")).unwrap()).unwrap();
        assert_eq!(on_disk.current_goal, 150.0);
        assert_eq!(on_disk.wins, 1);
        assert_eq!(on_disk.ticks_since_win, 0);

        // Already champion: nothing more happens.
        assert!(lm.promote_winners().unwrap().is_empty());
        assert_eq!(lm.registry.ensure_state().unwrap().current_goal, 150.0);
    }

    #[test]
    fn failed_goal_write_leaves_winners_eligible() {
        let dir = tempfile::tempdir().unwrap();
        let mut lm = manager(dir.path(), CupConfig::default());
        lm.registry
            .upsert(racer("winner", Mode::Race).with_stats(StrategyStats::new(120.0, 100.0)));
        lm.registry.ensure_state().unwrap();

        // A directory in place of cup_state.json makes the rename fail.
        let cup_path = dir.path().join("cup_state.json");
        std::fs::remove_file(&cup_path).unwrap();
        std::fs::create_dir(&cup_path).unwrap();

        let err = lm.promote_winners().unwrap_err();
        assert!(matches!(err, ArenaError::StorageUnavailable(_)), "got {err}");
        assert_eq!(lm.registry.get("winner").unwrap().mode, Mode::Race);

        std::fs::remove_dir(&cup_path).unwrap();
        assert_eq!(lm.promote_winners().unwrap(), ["winner"]);
        assert_eq!(lm.registry.get("winner").unwrap().mode, Mode::Champion);
        assert_eq!(lm.registry.ensure_state().unwrap().current_goal, 150.0);
    }

    #[test]
    fn champions_are_never_demoted_by_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let mut lm = manager(dir.path(), CupConfig::default());
        lm.registry.extend([
            racer("champ", Mode::Champion).with_stats(StrategyStats::new(20.0, 100.0)),
            racer("a", Mode::Training),
        ]);
        for _ in 0..5 {
            lm.run_tick().unwrap();
            lm.promote_winners().unwrap();
            assert_eq!(lm.registry.get("champ").unwrap().mode, Mode::Champion);
        }
    }

    #[test]
    fn state_bookkeeping_is_mirrored_to_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut lm = manager(dir.path(), CupConfig::default());
        lm.registry.upsert(racer("a", Mode::Training));
        lm.run_tick().unwrap();

        let state = lm.update_state(0).unwrap();
        assert_eq!(state.ticks_since_win, 1);
        assert!(state.drawdown_pct.is_some());

        let mirrored = lm.store.load_state();
        assert_eq!(mirrored.get("ticks_since_win").and_then(|v| v.as_u64()), Some(1));
    }
}
