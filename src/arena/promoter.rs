// =============================================================================
// Promoter — portable export packages under promoted/<id>/
// =============================================================================
//
// Package contract (downstream trading processes read these names):
//   profile.json      — the profile as stored in the registry
//   ledger_tail.json  — the 100 most recent ledger rows, newest first
//   SUMMARY.md        — human-readable summary with content checksums
//   validation.json   — the validation report, also for forced exports
// =============================================================================

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::registry::Registry;
use super::store::Store;
use super::validator::{validate_strategy, ValidationReport, ValidationThresholds};
use crate::error::ArenaError;
use crate::persist;
use crate::types::{now_iso, StrategyLedgerEntry, StrategyProfile};

pub const LEDGER_TAIL_LIMIT: usize = 100;

pub const PACKAGE_FILES: [&str; 4] = ["profile.json", "ledger_tail.json", "SUMMARY.md", "validation.json"];

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub thresholds: ValidationThresholds,
    /// Export even when validation fails.
    pub force: bool,
    pub dest_dir: PathBuf,
}

impl ExportOptions {
    pub fn new(dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            thresholds: ValidationThresholds::default(),
            force: false,
            dest_dir: dest_dir.into(),
        }
    }
}

/// Result of a successful export.
#[derive(Debug, Clone)]
pub struct ExportedPackage {
    pub dir: PathBuf,
    pub validation: ValidationReport,
}

/// Validate `strategy_id` and write its package.
///
/// Fails with `NotFound` for an unknown id and with `ValidationRejected`
/// when validation fails and `force` is off; nothing is written then.
pub fn export_strategy(
    registry: &Registry,
    store: &Store,
    strategy_id: &str,
    opts: &ExportOptions,
) -> Result<ExportedPackage, ArenaError> {
    let profile = registry
        .get(strategy_id)
        .ok_or_else(|| ArenaError::NotFound(format!("strategy {strategy_id} is not in the registry")))?;

    let validation = validate_strategy(profile, &opts.thresholds);
    if !validation.ok {
        if !opts.force {
            return Err(ArenaError::ValidationRejected {
                strategy_id: strategy_id.to_string(),
                reasons: validation.reasons,
            });
        }
        warn!(strategy_id, reasons = ?validation.reasons, "forcing export of unvalidated strategy");
    }

    let ledger = store.ledger_for(strategy_id, LEDGER_TAIL_LIMIT)?;

    let pkg_dir = opts.dest_dir.join(strategy_id);
    if pkg_dir.exists() {
        fs::remove_dir_all(&pkg_dir).map_err(|e| ArenaError::io(format!("clear {}", pkg_dir.display()), e))?;
    }

    let profile_json = to_pretty(profile)?;
    let ledger_json = to_pretty(&ledger)?;
    let summary = render_summary(profile, &ledger, &validation, &profile_json, &ledger_json);

    persist::write_atomic(&pkg_dir.join(PACKAGE_FILES[0]), profile_json.as_bytes())?;
    persist::write_atomic(&pkg_dir.join(PACKAGE_FILES[1]), ledger_json.as_bytes())?;
    persist::write_atomic(&pkg_dir.join(PACKAGE_FILES[2]), summary.as_bytes())?;
    persist::write_json_atomic(&pkg_dir.join(PACKAGE_FILES[3]), &validation)?;

    info!(
        strategy_id,
        dir = %pkg_dir.display(),
        ok = validation.ok,
        ledger_rows = ledger.len(),
        "strategy package exported"
    );

    Ok(ExportedPackage {
        dir: pkg_dir,
        validation,
    })
}

fn to_pretty<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, ArenaError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| ArenaError::StorageUnavailable(format!("serialise package: {e}")))
}

fn sha256_hex(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

fn render_summary(
    profile: &StrategyProfile,
    ledger: &[StrategyLedgerEntry],
    validation: &ValidationReport,
    profile_json: &str,
    ledger_json: &str,
) -> String {
    let stats = profile.stats.as_ref();
    let latest = ledger.first();

    let balance = latest
        .map(|e| e.balance_after)
        .or_else(|| stats.map(|s| s.balance))
        .map_or_else(|| "N/A".to_string(), |b| format!("{b:.4}"));
    let goal = stats.map_or_else(|| "N/A".to_string(), |s| format!("{:.2}", s.goal));

    let mut out = String::new();
    let _ = writeln!(out, "# {} ({})", profile.name, profile.id);
    let _ = writeln!(out);
    let _ = writeln!(out, "- Category: **{}**", profile.category);
    let _ = writeln!(out, "- Mode: **{}** · Engine: {}", profile.mode, profile.engine);
    let _ = writeln!(out, "- Current balance: {balance}");
    let _ = writeln!(
        out,
        "- Goal: {goal} · Wins: {} · Losses: {}",
        stats.map_or(0, |s| s.wins),
        stats.map_or(0, |s| s.losses)
    );
    let _ = writeln!(out, "- Last record: {}", latest.map_or("N/A", |e| e.ts.as_str()));
    let _ = writeln!(
        out,
        "- Validation: {}",
        if validation.ok { "passed".to_string() } else { format!("FORCED ({})", validation.reasons.join("; ")) }
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "Files:");
    let _ = writeln!(out, "- `profile.json` sha256 {}", sha256_hex(profile_json));
    let _ = writeln!(out, "- `ledger_tail.json` sha256 {} ({} rows)", sha256_hex(ledger_json), ledger.len());
    let _ = writeln!(out, "- `validation.json`");
    let _ = writeln!(out);
    let _ = writeln!(out, "Package generated {}.", now_iso());
    out
}

/// Files present in a package directory, sorted.
pub fn package_files(dir: &Path) -> Result<Vec<String>, ArenaError> {
    let mut names = Vec::new();
    let entries = fs::read_dir(dir).map_err(|e| ArenaError::io(format!("read {}", dir.display()), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| ArenaError::io(format!("read {}", dir.display()), e))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::cup::CupStateStore;
    use crate::config::CupConfig;
    use crate::types::{Category, Mode, StrategyStats};

    struct Fixture {
        dir: tempfile::TempDir,
        registry: Registry,
        store: Store,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let cup = CupStateStore::new(dir.path().join("cup_state.json"), CupConfig::default());
        let mut registry = Registry::load(dir.path().join("registry.json"), cup);
        let store = Store::open(dir.path().join("arena.db")).unwrap();

        let mut weak = StrategyStats::new(120.0, 150.0);
        weak.trades = 10;
        weak.sharpe_ratio = 0.1;
        weak.max_drawdown_pct = 40.0;
        registry.upsert(
            StrategyProfile::new("strat_x", "Test", Category::Scalp, "1m")
                .with_mode(Mode::Race)
                .with_stats(weak),
        );
        store
            .append_ledger(&[StrategyLedgerEntry {
                strategy_id: "strat_x".into(),
                ts: "2025-01-01T00:00:00.000000Z".into(),
                pnl: 1.5,
                balance_after: 120.0,
                reason: "sim_long".into(),
            }])
            .unwrap();

        Fixture { dir, registry, store }
    }

    fn strict(dest: &Path) -> ExportOptions {
        ExportOptions {
            thresholds: ValidationThresholds { min_trades: 20, min_sharpe: 0.2, max_drawdown: 30.0 },
            force: false,
            dest_dir: dest.to_path_buf(),
        }
    }

    #[test]
    fn reject_then_force() {
        let fx = fixture();
        let dest = fx.dir.path().join("promoted");
        let mut opts = strict(&dest);

        let err = export_strategy(&fx.registry, &fx.store, "strat_x", &opts).unwrap_err();
        match err {
            ArenaError::ValidationRejected { reasons, .. } => assert_eq!(reasons.len(), 3),
            other => panic!("unexpected {other}"),
        }
        assert!(!dest.join("strat_x").exists());

        opts.force = true;
        let pkg = export_strategy(&fx.registry, &fx.store, "strat_x", &opts).unwrap();
        let files = package_files(&pkg.dir).unwrap();
        assert_eq!(files, ["SUMMARY.md", "ledger_tail.json", "profile.json", "validation.json"]);

        let validation: ValidationReport =
            serde_json::from_str(&fs::read_to_string(pkg.dir.join("validation.json")).unwrap()).unwrap();
        assert!(!validation.ok);
        assert_eq!(validation.reasons.len(), 3);

        let tail: Vec<StrategyLedgerEntry> =
            serde_json::from_str(&fs::read_to_string(pkg.dir.join("ledger_tail.json")).unwrap()).unwrap();
        assert_eq!(tail.len(), 1);
    }

    #[test]
    fn unknown_strategy_is_not_found() {
        let fx = fixture();
        let opts = strict(&fx.dir.path().join("promoted"));
        assert!(matches!(
            export_strategy(&fx.registry, &fx.store, "nope", &opts),
            Err(ArenaError::NotFound(_))
        ));
    }

    #[test]
    fn re_export_keeps_exactly_four_files() {
        let fx = fixture();
        let dest = fx.dir.path().join("promoted");
        let mut opts = strict(&dest);
        opts.force = true;
        export_strategy(&fx.registry, &fx.store, "strat_x", &opts).unwrap();
        fs::write(dest.join("strat_x").join("stale.txt"), "x").unwrap();

        let pkg = export_strategy(&fx.registry, &fx.store, "strat_x", &opts).unwrap();
        assert_eq!(package_files(&pkg.dir).unwrap().len(), 4);

        let summary = fs::read_to_string(pkg.dir.join("SUMMARY.md")).unwrap();
        assert!(summary.starts_with("# Test (strat_x)"));
        assert!(summary.contains("Current balance: 120.0000"));
    }
}
