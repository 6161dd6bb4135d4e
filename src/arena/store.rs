// =============================================================================
// Store — SQLite ledger, key/value state and operator notes
// =============================================================================
//
// Layout of `arena.db`:
//   ledger(id AUTOINCREMENT, strategy_id, ts, pnl, balance_after, reason)
//     idx_ledger_strategy     (strategy_id)
//     idx_ledger_strategy_id  (strategy_id, id DESC)
//   state(key PRIMARY KEY, value)       -- single row keyed "arena_state"
//   notes(id AUTOINCREMENT, strategy_id, note, author, ts)
//     idx_notes_strategy      (strategy_id)
//
// A connection is opened per operation so the handle can be cloned freely
// across threads. Writers additionally serialise on an in-process mutex;
// readers rely on SQLite's own locking and never take it.
// =============================================================================

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ArenaError;
use crate::types::{now_iso, round_to, Note, StrategyLedgerEntry};

const STATE_KEY: &str = "arena_state";

const LEDGER_COLUMNS: [&str; 6] = ["id", "strategy_id", "ts", "pnl", "balance_after", "reason"];
const STATE_COLUMNS: [&str; 2] = ["key", "value"];
const NOTES_COLUMNS: [&str; 5] = ["id", "strategy_id", "note", "author", "ts"];

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ledger (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    strategy_id TEXT NOT NULL,
    ts TEXT NOT NULL,
    pnl REAL NOT NULL,
    balance_after REAL NOT NULL,
    reason TEXT
);
CREATE INDEX IF NOT EXISTS idx_ledger_strategy ON ledger(strategy_id);
CREATE INDEX IF NOT EXISTS idx_ledger_strategy_id ON ledger(strategy_id, id DESC);

CREATE TABLE IF NOT EXISTS state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS notes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    strategy_id TEXT NOT NULL,
    note TEXT NOT NULL,
    author TEXT,
    ts TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_notes_strategy ON notes(strategy_id);
";

/// Aggregates over the most recent ledger rows of one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub strategy_id: String,
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub final_balance: f64,
    /// Largest fall from the running peak of `balance_after`, in percent.
    pub max_drawdown_pct: f64,
}

impl LedgerSummary {
    /// Summarise `entries` given oldest first.
    pub fn from_chronological(strategy_id: &str, entries: &[StrategyLedgerEntry]) -> Self {
        let total_trades = entries.len();
        let wins = entries.iter().filter(|e| e.pnl >= 0.0).count();
        let losses = total_trades - wins;
        let total_pnl: f64 = entries.iter().map(|e| e.pnl).sum();

        let mut peak = f64::NEG_INFINITY;
        let mut max_dd = 0.0_f64;
        for entry in entries {
            peak = peak.max(entry.balance_after);
            if peak > 0.0 {
                max_dd = max_dd.max((peak - entry.balance_after) / peak * 100.0);
            }
        }

        let (win_rate, avg_pnl) = if total_trades == 0 {
            (0.0, 0.0)
        } else {
            (wins as f64 / total_trades as f64, total_pnl / total_trades as f64)
        };

        Self {
            strategy_id: strategy_id.to_string(),
            total_trades,
            wins,
            losses,
            win_rate: round_to(win_rate, 4),
            total_pnl: round_to(total_pnl, 4),
            avg_pnl: round_to(avg_pnl, 6),
            final_balance: entries.last().map(|e| e.balance_after).unwrap_or(0.0),
            max_drawdown_pct: round_to(max_dd, 4),
        }
    }
}

/// Cloneable handle to `arena.db`.
#[derive(Clone)]
pub struct Store {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
    skipped_rows: Arc<AtomicU64>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish()
    }
}

impl Store {
    /// Open (creating if needed) the database at `path` and check its schema.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ArenaError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ArenaError::io(format!("create dir {}", parent.display()), e))?;
        }

        let store = Self {
            path,
            write_lock: Arc::new(Mutex::new(())),
            skipped_rows: Arc::new(AtomicU64::new(0)),
        };

        {
            let _guard = store.write_lock.lock();
            let conn = store.connect()?;
            conn.execute_batch(SCHEMA)?;
            verify_schema(&conn)?;
        }

        info!(path = %store.path.display(), "arena store ready");
        Ok(store)
    }

    /// Ledger rows skipped because they could not be decoded.
    pub fn skipped_rows(&self) -> u64 {
        self.skipped_rows.load(Ordering::Relaxed)
    }

    fn connect(&self) -> Result<Connection, ArenaError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    // -------------------------------------------------------------------------
    // Ledger
    // -------------------------------------------------------------------------

    /// Insert every entry in one transaction. Empty input touches nothing.
    pub fn append_ledger(&self, entries: &[StrategyLedgerEntry]) -> Result<usize, ArenaError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock();
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO ledger(strategy_id, ts, pnl, balance_after, reason) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.strategy_id,
                    entry.ts,
                    entry.pnl,
                    entry.balance_after,
                    entry.reason
                ])?;
            }
        }
        tx.commit()?;

        debug!(rows = entries.len(), "ledger rows appended");
        Ok(entries.len())
    }

    /// Most recent row per strategy, highest `balance_after` first.
    pub fn top_balances(&self, limit: usize) -> Result<Vec<StrategyLedgerEntry>, ArenaError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT l.strategy_id, l.ts, l.pnl, l.balance_after, l.reason
             FROM ledger l
             JOIN (
                 SELECT strategy_id, MAX(id) AS max_id
                 FROM ledger
                 GROUP BY strategy_id
             ) latest ON latest.max_id = l.id
             ORDER BY l.balance_after DESC, l.strategy_id ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], ledger_row)?;
        Ok(self.collect_rows(rows))
    }

    /// The `limit` most recent entries of `strategy_id`, newest first.
    pub fn ledger_for(&self, strategy_id: &str, limit: usize) -> Result<Vec<StrategyLedgerEntry>, ArenaError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT strategy_id, ts, pnl, balance_after, reason
             FROM ledger
             WHERE strategy_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![strategy_id, limit as i64], ledger_row)?;
        Ok(self.collect_rows(rows))
    }

    pub fn ledger_summary(&self, strategy_id: &str, limit: usize) -> Result<LedgerSummary, ArenaError> {
        let mut tail = self.ledger_for(strategy_id, limit)?;
        tail.reverse();
        Ok(LedgerSummary::from_chronological(strategy_id, &tail))
    }

    fn collect_rows(
        &self,
        rows: impl Iterator<Item = rusqlite::Result<StrategyLedgerEntry>>,
    ) -> Vec<StrategyLedgerEntry> {
        let mut out = Vec::new();
        for row in rows {
            match row {
                Ok(entry) => out.push(entry),
                Err(e) => {
                    let skipped = self.skipped_rows.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(error = %e, skipped, "skipping undecodable ledger row");
                }
            }
        }
        out
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    pub fn save_state<T: Serialize + ?Sized>(&self, state: &T) -> Result<(), ArenaError> {
        let payload = serde_json::to_string(state)
            .map_err(|e| ArenaError::StorageUnavailable(format!("serialise arena state: {e}")))?;

        let _guard = self.write_lock.lock();
        let conn = self.connect()?;
        conn.execute(
            "INSERT OR REPLACE INTO state(key, value) VALUES (?1, ?2)",
            params![STATE_KEY, payload],
        )?;
        Ok(())
    }

    /// The stored state object, or an empty map when absent or unreadable.
    pub fn load_state(&self) -> serde_json::Map<String, serde_json::Value> {
        let raw: Option<String> = match self.connect().and_then(|conn| {
            conn.query_row(
                "SELECT value FROM state WHERE key = ?1",
                params![STATE_KEY],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other.into()),
            })
        }) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "arena state unreadable, returning empty");
                return serde_json::Map::new();
            }
        };

        match raw.map(|s| serde_json::from_str::<serde_json::Value>(&s)) {
            Some(Ok(serde_json::Value::Object(map))) => map,
            Some(Ok(_)) | Some(Err(_)) => {
                warn!("arena state is not a JSON object, returning empty");
                serde_json::Map::new()
            }
            None => serde_json::Map::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Notes
    // -------------------------------------------------------------------------

    pub fn add_note(&self, strategy_id: &str, note: &str, author: Option<&str>) -> Result<Note, ArenaError> {
        let ts = now_iso();
        let _guard = self.write_lock.lock();
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO notes(strategy_id, note, author, ts) VALUES (?1, ?2, ?3, ?4)",
            params![strategy_id, note, author, ts],
        )?;
        Ok(Note {
            strategy_id: strategy_id.to_string(),
            note: note.to_string(),
            author: author.map(str::to_string),
            ts,
        })
    }

    /// Notes of `strategy_id`, newest first.
    pub fn notes_for(&self, strategy_id: &str, limit: usize) -> Result<Vec<Note>, ArenaError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT strategy_id, note, author, ts
             FROM notes
             WHERE strategy_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let notes = stmt
            .query_map(params![strategy_id, limit as i64], |row| {
                Ok(Note {
                    strategy_id: row.get(0)?,
                    note: row.get(1)?,
                    author: row.get(2)?,
                    ts: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(notes)
    }
}

fn ledger_row(row: &Row<'_>) -> rusqlite::Result<StrategyLedgerEntry> {
    Ok(StrategyLedgerEntry {
        strategy_id: row.get(0)?,
        ts: row.get(1)?,
        pnl: row.get(2)?,
        balance_after: row.get(3)?,
        reason: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
    })
}

/// Every table must expose at least the columns the queries use.
fn verify_schema(conn: &Connection) -> Result<(), ArenaError> {
    for (table, expected) in [
        ("ledger", &LEDGER_COLUMNS[..]),
        ("state", &STATE_COLUMNS[..]),
        ("notes", &NOTES_COLUMNS[..]),
    ] {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let missing: Vec<&str> = expected
            .iter()
            .copied()
            .filter(|col| !columns.iter().any(|c| c == col))
            .collect();
        if !missing.is_empty() {
            return Err(ArenaError::StorageCorrupt(format!(
                "table {table} is missing columns: {}",
                missing.join(", ")
            )));
        }
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
