// =============================================================================
// Registry — canonical strategy profiles (registry.json)
// =============================================================================

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, info};

use super::cup::{CupState, CupStateStore};
use crate::error::ArenaError;
use crate::persist;
use crate::types::{now_iso, round_to, StrategyProfile, StrategyStats};

/// In-memory profile set persisted as one JSON array.
///
/// Profiles keep their document order; `upsert` of a new id appends.
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    profiles: Vec<StrategyProfile>,
    index: HashMap<String, usize>,
    cup: CupStateStore,
}

impl Registry {
    /// Load `path`. An absent or unreadable document yields an empty registry.
    pub fn load(path: impl Into<PathBuf>, cup: CupStateStore) -> Self {
        let path = path.into();
        let profiles: Vec<StrategyProfile> = persist::read_json(&path).or_else_default(&path, Vec::new);

        let mut registry = Self {
            path,
            profiles: Vec::with_capacity(profiles.len()),
            index: HashMap::with_capacity(profiles.len()),
            cup,
        };
        registry.extend(profiles);
        info!(path = %registry.path.display(), profiles = registry.len(), "registry loaded");
        registry
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn all(&self) -> &[StrategyProfile] {
        &self.profiles
    }

    pub fn all_mut(&mut self) -> impl Iterator<Item = &mut StrategyProfile> {
        self.profiles.iter_mut()
    }

    pub fn get(&self, id: &str) -> Option<&StrategyProfile> {
        self.index.get(id).map(|&i| &self.profiles[i])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut StrategyProfile> {
        match self.index.get(id) {
            Some(&i) => self.profiles.get_mut(i),
            None => None,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Insert or replace by id.
    pub fn upsert(&mut self, profile: StrategyProfile) {
        match self.index.get(&profile.id) {
            Some(&i) => self.profiles[i] = profile,
            None => {
                self.index.insert(profile.id.clone(), self.profiles.len());
                self.profiles.push(profile);
            }
        }
    }

    pub fn extend(&mut self, profiles: impl IntoIterator<Item = StrategyProfile>) {
        for profile in profiles {
            self.upsert(profile);
        }
    }

    /// Atomically rewrite registry.json.
    pub fn save(&self) -> Result<(), ArenaError> {
        persist::write_json_atomic(&self.path, &self.profiles)?;
        debug!(profiles = self.profiles.len(), "registry saved");
        Ok(())
    }

    /// Credit a win of `pnl` outside the simulator and persist.
    ///
    /// Only external callers use this; the tick never does, and no ledger
    /// row is written for it.
    pub fn record_win(&mut self, id: &str, pnl: f64) -> Result<(), ArenaError> {
        let cfg = self.cup.config().clone();
        let profile = self
            .get_mut(id)
            .ok_or_else(|| ArenaError::NotFound(format!("strategy {id}")))?;

        let stats = profile.stats.get_or_insert_with(|| StrategyStats::new(cfg.starting_balance, cfg.initial_goal));
        stats.wins += 1;
        stats.balance = round_to(stats.balance + pnl, 4);
        stats.peak_balance = stats.peak_balance.max(stats.balance);
        stats.refresh_drawdown();
        stats.last_updated = now_iso();

        self.save()
    }

    // -------------------------------------------------------------------------
    // Cup state
    // -------------------------------------------------------------------------

    pub fn ensure_state(&self) -> Result<CupState, ArenaError> {
        self.cup.ensure_state()
    }

    pub fn save_state(&self, state: &CupState) -> Result<(), ArenaError> {
        self.cup.save(state)
    }

    pub fn update_goal_after_win(&self) -> Result<f64, ArenaError> {
        self.cup.update_goal_after_win()
    }
}
