// =============================================================================
// Strategy Arena — Main Entry Point
// =============================================================================
//
// `arena serve` runs the tick loop in the background next to the operator
// HTTP API. Every other subcommand performs one operation against the data
// directory and exits.
//
// The Binance provider uses a blocking HTTP client, so only `serve` builds a
// tokio runtime; the one-shot commands stay synchronous.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod arena;
mod config;
mod error;
mod market;
mod persist;
mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::arena::promoter::package_files;
use crate::arena::service::ArenaService;
use crate::arena::validator::ValidationThresholds;
use crate::arena::{Arena, PromoteRequest};
use crate::config::{ArenaSettings, MarketSource};
use crate::error::ArenaError;
use crate::market::{BinanceKlineProvider, FixedSnapshot, MarketSnapshotProvider};

#[derive(Parser)]
#[command(name = "arena", version, about = "Strategy arena: simulated cup league for trading strategies")]
struct Cli {
    /// Operator settings file.
    #[arg(long, global = true, default_value = "arena_settings.json")]
    settings: PathBuf,

    /// Override the data directory from the settings file.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the tick loop and the HTTP API until Ctrl-C.
    Serve,
    /// Run a single tick.
    Tick,
    /// Validate a strategy and export its deployment package.
    Promote {
        strategy_id: String,
        #[arg(long, default_value_t = 50)]
        min_trades: u64,
        #[arg(long, default_value_t = 0.2)]
        min_sharpe: f64,
        #[arg(long, default_value_t = 35.0)]
        max_drawdown: f64,
        /// Export even when validation fails.
        #[arg(long)]
        force: bool,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Print the top of the latest ranking.
    Ranking {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Print the cup state.
    State,
    /// Seed the registry with generated training strategies.
    Bootstrap {
        #[arg(long, default_value_t = 5000)]
        total: usize,
    },
    /// Attach an operator note to a strategy.
    Note {
        strategy_id: String,
        text: String,
        #[arg(long)]
        author: Option<String>,
    },
    /// Credit a win recorded outside the simulator.
    Credit {
        strategy_id: String,
        #[arg(allow_negative_numbers = true)]
        pnl: f64,
    },
    /// Print a strategy's recent ledger rows and summary.
    Ledger {
        strategy_id: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // ── 2. Settings ──────────────────────────────────────────────────────
    let mut settings = if cli.settings.exists() {
        ArenaSettings::load(&cli.settings).unwrap_or_else(|e| {
            warn!(error = %e, "failed to load arena settings, using defaults");
            ArenaSettings::default()
        })
    } else {
        warn!(path = %cli.settings.display(), "arena settings not found, writing defaults");
        let defaults = ArenaSettings::default();
        if let Err(e) = defaults.save(&cli.settings) {
            warn!(error = %e, "could not write default arena settings");
        }
        defaults
    };
    settings.apply_env();
    if let Some(dir) = cli.data_dir {
        settings.data_dir = dir;
    }

    // ── 3. Arena ─────────────────────────────────────────────────────────
    let provider = build_provider(&settings)?;
    let arena = Arena::open(&settings, provider)
        .with_context(|| format!("failed to open arena at {}", settings.data_dir.display()))?;

    // ── 4. Dispatch ──────────────────────────────────────────────────────
    match cli.command {
        Command::Serve => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to build tokio runtime")?;
            let arena = Arc::new(arena);
            let result = runtime.block_on(serve(arena.clone()));
            // The blocking HTTP client inside the provider must be dropped
            // outside the runtime.
            drop(runtime);
            drop(arena);
            result
        }
        Command::Tick => {
            let report = arena.tick().context("arena tick failed")?;
            print_json(&report)
        }
        Command::Promote {
            strategy_id,
            min_trades,
            min_sharpe,
            max_drawdown,
            force,
            output_dir,
        } => {
            let req = PromoteRequest {
                thresholds: ValidationThresholds {
                    min_trades,
                    min_sharpe,
                    max_drawdown,
                },
                force,
                dest_dir: output_dir,
            };
            match arena.promote_strategy(&strategy_id, &req) {
                Ok(pkg) => {
                    info!(strategy_id = %strategy_id, path = %pkg.dir.display(), "strategy exported");
                    let files = package_files(&pkg.dir).context("failed to list package")?;
                    print_json(&serde_json::json!({
                        "status": "ok",
                        "path": pkg.dir.display().to_string(),
                        "files": files,
                        "validation": pkg.validation,
                    }))
                }
                Err(ArenaError::ValidationRejected { strategy_id, reasons }) => {
                    for reason in &reasons {
                        eprintln!("  - {reason}");
                    }
                    anyhow::bail!("validation rejected for {strategy_id} (use --force to export anyway)")
                }
                Err(e) => Err(e).context("promotion failed"),
            }
        }
        Command::Ranking { limit } => {
            let rows = arena.ranking(limit);
            if rows.is_empty() {
                println!("no ranking yet; run `arena tick` first");
                return Ok(());
            }
            for (i, row) in rows.iter().enumerate() {
                println!(
                    "{:>3}. {:<14} {:<6} score={:>8.4} balance={:>10} wins={} losses={}",
                    i + 1,
                    row.id,
                    row.category,
                    row.score,
                    row.balance.map(|b| format!("{b:.4}")).unwrap_or_else(|| "-".into()),
                    row.wins,
                    row.losses,
                );
            }
            Ok(())
        }
        Command::State => {
            let state = arena.cup_state().context("failed to read cup state")?;
            print_json(&state)
        }
        Command::Bootstrap { total } => {
            let added = arena.bootstrap(total).context("bootstrap failed")?;
            println!("added {added} strategies ({} total)", arena.strategy_count());
            Ok(())
        }
        Command::Note {
            strategy_id,
            text,
            author,
        } => {
            let note = arena
                .add_note(&strategy_id, &text, author.as_deref())
                .context("failed to add note")?;
            print_json(&note)
        }
        Command::Credit { strategy_id, pnl } => {
            arena
                .record_win(&strategy_id, pnl)
                .with_context(|| format!("failed to credit {strategy_id}"))?;
            let stats = arena.profile(&strategy_id).and_then(|p| p.stats);
            print_json(&stats)
        }
        Command::Ledger { strategy_id, limit } => {
            let entries = arena
                .ledger(&strategy_id, limit)
                .context("failed to read ledger")?;
            let summary = arena
                .ledger_summary(&strategy_id, limit)
                .context("failed to summarise ledger")?;
            print_json(&serde_json::json!({
                "entries": entries,
                "summary": summary,
            }))
        }
    }
}

fn build_provider(settings: &ArenaSettings) -> Result<Arc<dyn MarketSnapshotProvider>> {
    let provider: Arc<dyn MarketSnapshotProvider> = match settings.market_source {
        MarketSource::Fixed => Arc::new(FixedSnapshot::new(settings.fixed_close, settings.fixed_atr)),
        MarketSource::Binance => Arc::new(
            BinanceKlineProvider::new(&settings.symbol, &settings.timeframe)
                .context("failed to build Binance kline provider")?,
        ),
    };
    info!(provider = %provider.describe(), "market snapshot source ready");
    Ok(provider)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{text}");
    Ok(())
}

async fn serve(arena: Arc<Arena>) -> Result<()> {
    let settings = arena.settings().clone();

    // ── Tick loop ────────────────────────────────────────────────────────
    let service = ArenaService::new(arena.clone(), settings.interval_seconds);
    match service.start_background() {
        Ok(()) | Err(ArenaError::AlreadyRunning) => {}
        Err(e) => return Err(e).context("failed to start arena service"),
    }

    // ── HTTP API ─────────────────────────────────────────────────────────
    if std::env::var(api::auth::TOKEN_ENV).unwrap_or_default().is_empty() {
        warn!("{} is not set; authenticated routes will reject every request", api::auth::TOKEN_ENV);
    }
    let app = api::router(arena);
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {}", settings.bind_addr))?;
    info!(addr = %settings.bind_addr, "API server listening");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "API server failed");
        }
    });

    // ── Shutdown ─────────────────────────────────────────────────────────
    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    if !service.is_running() {
        warn!("arena service worker had already exited");
    }
    warn!("shutdown signal received, stopping arena service");
    if !service.stop().await {
        warn!("arena service abandoned after timeout");
    }
    server.abort();
    info!("arena shut down");
    Ok(())
}
