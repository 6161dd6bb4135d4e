// =============================================================================
// Bootstrap — synthesise the initial field of training strategies
// =============================================================================

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::info;

use super::registry::Registry;
use crate::config::CupConfig;
use crate::error::ArenaError;
use crate::types::{Category, Engine, Mode, StrategyProfile, StrategyStats};

/// Upper bound on generated profiles.
pub const MAX_BOOTSTRAP: usize = 5_000;

struct Template {
    category: Category,
    timeframes: &'static [&'static str],
    indicators: &'static [&'static str],
}

const TEMPLATES: [Template; 5] = [
    Template {
        category: Category::Scalp,
        timeframes: &["1m", "3m"],
        indicators: &["EMA9/21", "VWAP", "Range"],
    },
    Template {
        category: Category::Intra,
        timeframes: &["5m", "15m"],
        indicators: &["EMA20/50", "RSI", "ATR"],
    },
    Template {
        category: Category::Swing,
        timeframes: &["1h", "4h"],
        indicators: &["EMA50/200", "MACD", "ADX"],
    },
    Template {
        category: Category::Macro,
        timeframes: &["1h", "1d"],
        indicators: &["MacroScore", "News", "ATR"],
    },
    Template {
        category: Category::Quant,
        timeframes: &["15m", "1h"],
        indicators: &["ZScore", "VWAP", "ATR"],
    },
];

/// Build `total` (capped at 5000) training profiles cycling through the
/// categories. The sequence number `n` is shared across categories, so ids
/// run `scalp_1, intra_2, swing_3, ...`.
pub fn build_profiles<R: Rng + ?Sized>(total: usize, cfg: &CupConfig, rng: &mut R) -> Vec<StrategyProfile> {
    let total = total.min(MAX_BOOTSTRAP);
    (0..total)
        .map(|i| {
            let n = i + 1;
            let tpl = &TEMPLATES[i % TEMPLATES.len()];
            let category = tpl.category.to_string();
            let timeframe = tpl.timeframes.choose(rng).copied().unwrap_or(tpl.timeframes[0]);

            let mut profile = StrategyProfile::new(
                format!("{category}_{n}"),
                format!("{}_{n:04}", category.to_uppercase()),
                tpl.category,
                timeframe,
            )
            .with_mode(Mode::Training)
            .with_indicators(tpl.indicators.iter().copied())
            .with_stats(StrategyStats::new(cfg.starting_balance, cfg.initial_goal));
            profile.engine = Engine::Sim;
            profile.notes = Some(format!("Auto generated for {category}"));
            profile
        })
        .collect()
}

/// Merge freshly built profiles into `registry` and save. Ids already
/// present are left untouched. Returns how many were added.
pub fn bootstrap<R: Rng + ?Sized>(
    registry: &mut Registry,
    total: usize,
    cfg: &CupConfig,
    rng: &mut R,
) -> Result<usize, ArenaError> {
    let fresh: Vec<StrategyProfile> = build_profiles(total, cfg, rng)
        .into_iter()
        .filter(|p| !registry.contains(&p.id))
        .collect();
    let added = fresh.len();

    registry.extend(fresh);
    registry.save()?;

    info!(added, total = registry.len(), "registry bootstrapped");
    Ok(added)
}
