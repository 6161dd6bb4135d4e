// =============================================================================
// Simulator — abstract pnl draws against one shared market snapshot
// =============================================================================
//
// Per strategy and tick:
//   direction  ~ {LONG, SHORT} uniformly
//   edge       ~ U[0.4, 1.5]
//   noise      ~ U[-0.8, 0.8]
//   pnl_pct    = sign(direction) * edge + noise
//   pnl        = clamp(pnl_pct / 100 * close / 100, -5, +5)
//
// The draw is coarse on purpose: ranking regression depends on this exact
// distribution. Do not add price-path realism here.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::config::CupConfig;
use crate::error::ArenaError;
use crate::market::{MarketSnapshot, MarketSnapshotProvider};
use crate::types::{format_ts, round_to, Direction, StrategyLedgerEntry, StrategyProfile};

/// Absolute pnl cap per tick.
pub const PNL_CLAMP: f64 = 5.0;

pub struct Simulator {
    rng: StdRng,
    provider: Arc<dyn MarketSnapshotProvider>,
    last_snapshot: Option<MarketSnapshot>,
    last_stamp: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("provider", &self.provider.describe())
            .field("last_snapshot", &self.last_snapshot)
            .finish()
    }
}

impl Simulator {
    /// Simulator seeded from OS entropy.
    pub fn new(provider: Arc<dyn MarketSnapshotProvider>) -> Self {
        Self::with_rng(provider, StdRng::from_entropy())
    }

    /// Deterministic simulator for tests and replays.
    pub fn seeded(provider: Arc<dyn MarketSnapshotProvider>, seed: u64) -> Self {
        Self::with_rng(provider, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(provider: Arc<dyn MarketSnapshotProvider>, rng: StdRng) -> Self {
        Self {
            rng,
            provider,
            last_snapshot: None,
            last_stamp: None,
        }
    }

    /// Fresh snapshot for this batch: refresh, retry once, then reuse the
    /// last good one.
    fn snapshot(&mut self) -> Result<MarketSnapshot, ArenaError> {
        let first = match self.provider.refresh() {
            Ok(snap) => Ok(snap),
            Err(e) => {
                warn!(provider = %self.provider.describe(), error = %e, "snapshot refresh failed, retrying once");
                self.provider.refresh()
            }
        };

        match first {
            Ok(snap) => {
                self.last_snapshot = Some(snap);
                Ok(snap)
            }
            Err(e) => match self.last_snapshot {
                Some(snap) => {
                    warn!(error = %e, close = snap.close, "reusing last market snapshot");
                    Ok(snap)
                }
                None => Err(e),
            },
        }
    }

    /// Strictly increasing UTC stamp with microsecond resolution.
    fn stamp(&mut self) -> String {
        let mut now = Utc::now();
        if let Some(last) = self.last_stamp {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_stamp = Some(now);
        format_ts(now)
    }

    fn draw_pnl(&mut self, close: f64) -> (Direction, f64) {
        let direction = if self.rng.gen_bool(0.5) {
            Direction::Long
        } else {
            Direction::Short
        };
        let edge = self.rng.gen_range(0.4..=1.5);
        let noise = self.rng.gen_range(-0.8..=0.8);
        let pnl_pct = direction.sign() * edge + noise;
        let pnl = (pnl_pct / 100.0 * close / 100.0).clamp(-PNL_CLAMP, PNL_CLAMP);
        (direction, pnl)
    }

    /// One ledger entry per input, in input order. Stats are updated in place
    /// before each entry is built.
    pub fn play_batch(
        &mut self,
        strategies: &mut [StrategyProfile],
        cfg: &CupConfig,
    ) -> Result<Vec<StrategyLedgerEntry>, ArenaError> {
        if strategies.is_empty() {
            return Ok(Vec::new());
        }

        let snapshot = self.snapshot()?;
        debug!(
            close = snapshot.close,
            atr = snapshot.effective_atr(),
            batch = strategies.len(),
            "simulating batch"
        );

        let mut entries = Vec::with_capacity(strategies.len());
        for profile in strategies.iter_mut() {
            let (direction, pnl) = self.draw_pnl(snapshot.close);
            let ts = self.stamp();
            let strategy_id = profile.id.clone();

            let stats = profile.ensure_stats(cfg.starting_balance, cfg.initial_goal);
            stats.balance = round_to(stats.balance + pnl, 4);
            stats.record_trade(pnl);
            stats.last_updated = ts.clone();

            entries.push(StrategyLedgerEntry {
                strategy_id,
                ts,
                pnl,
                balance_after: stats.balance,
                reason: direction.reason().to_string(),
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::FixedSnapshot;
    use crate::types::{Category, Mode, StrategyStats};
    use parking_lot::Mutex;

    fn batch(n: usize) -> Vec<StrategyProfile> {
        (0..n)
            .map(|i| StrategyProfile::new(format!("s{i}"), format!("S{i}"), Category::Quant, "1h").with_mode(Mode::Training))
            .collect()
    }

    fn fixed(close: f64) -> Arc<dyn MarketSnapshotProvider> {
        Arc::new(FixedSnapshot::new(close, 0.0))
    }

    /// Fails the first `failures` refreshes, then serves a fixed snapshot.
    struct Flaky {
        failures: Mutex<usize>,
    }

    impl MarketSnapshotProvider for Flaky {
        fn refresh(&self) -> Result<MarketSnapshot, ArenaError> {
            let mut left = self.failures.lock();
            if *left > 0 {
                *left -= 1;
                return Err(ArenaError::MissingSnapshot("flaky".into()));
            }
            Ok(MarketSnapshot::new(100.0, 1.0))
        }

        fn describe(&self) -> String {
            "flaky".into()
        }
    }

    #[test]
    fn one_entry_per_strategy_in_order() {
        let mut sim = Simulator::seeded(fixed(65_000.0), 7);
        let mut profiles = batch(5);
        let entries = sim.play_batch(&mut profiles, &CupConfig::default()).unwrap();

        assert_eq!(entries.len(), 5);
        for (entry, profile) in entries.iter().zip(&profiles) {
            let stats = profile.stats.as_ref().unwrap();
            assert_eq!(entry.strategy_id, profile.id);
            assert_eq!(entry.balance_after, stats.balance);
            assert_eq!(entry.ts, stats.last_updated);
            assert!(entry.reason == "sim_long" || entry.reason == "sim_short");
            assert!(entry.pnl.abs() <= PNL_CLAMP);
            assert_eq!(stats.trades, 1);
            assert_eq!(stats.wins + stats.losses, 1);
        }
    }

    #[test]
    fn same_seed_same_draws() {
        let cfg = CupConfig::default();
        let mut a = batch(20);
        let mut b = batch(20);
        let ea = Simulator::seeded(fixed(30_000.0), 42).play_batch(&mut a, &cfg).unwrap();
        let eb = Simulator::seeded(fixed(30_000.0), 42).play_batch(&mut b, &cfg).unwrap();
        let pa: Vec<f64> = ea.iter().map(|e| e.pnl).collect();
        let pb: Vec<f64> = eb.iter().map(|e| e.pnl).collect();
        assert_eq!(pa, pb);
    }

    #[test]
    fn pnl_is_clamped_at_high_prices() {
        let mut sim = Simulator::seeded(fixed(10_000_000.0), 1);
        let mut profiles = batch(50);
        let entries = sim.play_batch(&mut profiles, &CupConfig::default()).unwrap();
        assert!(entries.iter().all(|e| e.pnl.abs() <= PNL_CLAMP));
        assert!(entries.iter().any(|e| e.pnl.abs() == PNL_CLAMP));
    }

    #[test]
    fn stamps_strictly_increase() {
        let mut sim = Simulator::seeded(fixed(100.0), 3);
        let mut profiles = batch(200);
        let entries = sim.play_batch(&mut profiles, &CupConfig::default()).unwrap();
        assert!(entries.windows(2).all(|w| w[0].ts < w[1].ts));
    }

    #[test]
    fn existing_stats_are_continued() {
        let mut sim = Simulator::seeded(fixed(100.0), 9);
        let mut profiles = batch(1);
        profiles[0].stats = Some(StrategyStats::new(42.0, 100.0));
        let entries = sim.play_batch(&mut profiles, &CupConfig::default()).unwrap();
        assert!((entries[0].balance_after - round_to(42.0 + entries[0].pnl, 4)).abs() < 1e-9);
    }

    #[test]
    fn refresh_is_retried_once() {
        let provider = Arc::new(Flaky { failures: Mutex::new(1) });
        let mut sim = Simulator::seeded(provider, 5);
        let mut profiles = batch(2);
        assert_eq!(sim.play_batch(&mut profiles, &CupConfig::default()).unwrap().len(), 2);
    }

    #[test]
    fn missing_snapshot_without_history_fails() {
        let provider = Arc::new(Flaky { failures: Mutex::new(2) });
        let mut sim = Simulator::seeded(provider, 5);
        let mut profiles = batch(2);
        let err = sim.play_batch(&mut profiles, &CupConfig::default()).unwrap_err();
        assert!(matches!(err, ArenaError::MissingSnapshot(_)));
        assert!(profiles.iter().all(|p| p.stats.is_none()));
    }

    #[test]
    fn last_snapshot_is_reused_after_two_failures() {
        let provider = Arc::new(Flaky { failures: Mutex::new(0) });
        let mut sim = Simulator::seeded(provider.clone(), 5);
        let cfg = CupConfig::default();
        sim.play_batch(&mut batch(1), &cfg).unwrap();

        *provider.failures.lock() = 2;
        assert_eq!(sim.play_batch(&mut batch(3), &cfg).unwrap().len(), 3);
    }
}
