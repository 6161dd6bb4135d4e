// =============================================================================
// Validator — export gate on trade count, sharpe and drawdown
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::StrategyProfile;

fn default_min_trades() -> u64 {
    50
}

fn default_min_sharpe() -> f64 {
    0.2
}

fn default_max_drawdown() -> f64 {
    35.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationThresholds {
    #[serde(default = "default_min_trades")]
    pub min_trades: u64,
    #[serde(default = "default_min_sharpe")]
    pub min_sharpe: f64,
    /// Upper bound on `max_drawdown_pct`, in percent.
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: f64,
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            min_trades: default_min_trades(),
            min_sharpe: default_min_sharpe(),
            max_drawdown: default_max_drawdown(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub trades: u64,
    pub sharpe_ratio: f64,
    pub max_drawdown_pct: f64,
    pub wins: u64,
    pub losses: u64,
    pub balance: Option<f64>,
    pub goal: Option<f64>,
}

/// Outcome of a validation; also the content of `validation.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub reasons: Vec<String>,
    pub metrics: ValidationMetrics,
}

/// Check `profile` against `thresholds`. Every failed check adds one reason;
/// `ok` holds when none failed. Pure and infallible.
pub fn validate_strategy(profile: &StrategyProfile, thresholds: &ValidationThresholds) -> ValidationReport {
    let mut reasons = Vec::new();

    let (trades, sharpe, drawdown) = match &profile.stats {
        Some(stats) => {
            let trades = if stats.trades > 0 { stats.trades } else { stats.wins + stats.losses };
            let drawdown = if stats.max_drawdown_pct != 0.0 {
                stats.max_drawdown_pct
            } else {
                stats.drawdown_pct
            };
            (trades, stats.sharpe_ratio, drawdown)
        }
        None => {
            reasons.push("no statistics registered".to_string());
            (0, 0.0, 0.0)
        }
    };

    if trades < thresholds.min_trades {
        reasons.push(format!("require at least {} trades, have {trades}", thresholds.min_trades));
    }
    if sharpe < thresholds.min_sharpe {
        reasons.push(format!("sharpe {sharpe:.2} < min {}", thresholds.min_sharpe));
    }
    if drawdown > thresholds.max_drawdown {
        reasons.push(format!("max drawdown {drawdown:.2}% > allowed {}%", thresholds.max_drawdown));
    }

    let stats = profile.stats.as_ref();
    ValidationReport {
        ok: reasons.is_empty(),
        reasons,
        metrics: ValidationMetrics {
            trades,
            sharpe_ratio: sharpe,
            max_drawdown_pct: drawdown,
            wins: stats.map_or(0, |s| s.wins),
            losses: stats.map_or(0, |s| s.losses),
            balance: stats.map(|s| s.balance),
            goal: stats.map(|s| s.goal),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, StrategyStats};

    fn profile_with(trades: u64, sharpe: f64, max_dd: f64, balance: f64, goal: f64) -> StrategyProfile {
        let mut stats = StrategyStats::new(balance, goal);
        stats.trades = trades;
        stats.sharpe_ratio = sharpe;
        stats.max_drawdown_pct = max_dd;
        StrategyProfile::new("strat_x", "Test", Category::Scalp, "1m").with_stats(stats)
    }

    #[test]
    fn weak_stats_fail_every_check() {
        let profile = profile_with(10, 0.1, 40.0, 120.0, 150.0);
        let thresholds = ValidationThresholds { min_trades: 20, min_sharpe: 0.2, max_drawdown: 30.0 };
        let report = validate_strategy(&profile, &thresholds);
        assert!(!report.ok);
        assert_eq!(report.reasons.len(), 3);
        assert_eq!(report.reasons[0], "require at least 20 trades, have 10");
        assert_eq!(report.metrics.trades, 10);
    }

    #[test]
    fn good_stats_pass() {
        let profile = profile_with(80, 0.5, 20.0, 200.0, 150.0);
        let thresholds = ValidationThresholds { min_trades: 50, min_sharpe: 0.3, max_drawdown: 30.0 };
        let report = validate_strategy(&profile, &thresholds);
        assert!(report.ok, "{:?}", report.reasons);
        assert_eq!(report.metrics.balance, Some(200.0));
    }

    #[test]
    fn missing_stats_collects_all_applicable_reasons() {
        let profile = StrategyProfile::new("bare", "Bare", Category::Intra, "5m");
        let report = validate_strategy(&profile, &ValidationThresholds::default());
        assert!(!report.ok);
        assert_eq!(report.reasons[0], "no statistics registered");
        assert_eq!(report.reasons.len(), 3);
        assert!(report.metrics.balance.is_none());
    }

    #[test]
    fn trades_fall_back_to_wins_plus_losses() {
        let mut profile = profile_with(0, 1.0, 10.0, 50.0, 100.0);
        if let Some(stats) = profile.stats.as_mut() {
            stats.wins = 30;
            stats.losses = 25;
        }
        let report = validate_strategy(&profile, &ValidationThresholds::default());
        assert_eq!(report.metrics.trades, 55);
    }

    #[test]
    fn repeated_validation_is_identical() {
        let profile = profile_with(10, 0.1, 40.0, 120.0, 150.0);
        let thresholds = ValidationThresholds::default();
        let first = validate_strategy(&profile, &thresholds);
        for _ in 0..5 {
            assert_eq!(validate_strategy(&profile, &thresholds), first);
        }
    }
}
