// =============================================================================
// Arena error taxonomy
// =============================================================================
//
// Library code returns `ArenaError`; the binary glue wraps it in `anyhow`
// and the HTTP layer maps each kind to a distinct status code.
// =============================================================================

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArenaError {
    /// The Store or a persisted document cannot be opened or written.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A persisted artefact has an inconsistent schema or cannot be parsed.
    #[error("storage corrupt: {0}")]
    StorageCorrupt(String),

    /// The Promoter refused an export; carries every failed check.
    #[error("validation rejected for {strategy_id}: {}", reasons.join("; "))]
    ValidationRejected {
        strategy_id: String,
        reasons: Vec<String>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("arena service already running")]
    AlreadyRunning,

    /// No market snapshot could be obtained for the tick.
    #[error("market snapshot missing: {0}")]
    MissingSnapshot(String),
}

impl ArenaError {
    /// Wrap an I/O failure on `what` as `StorageUnavailable`.
    pub fn io(what: impl std::fmt::Display, err: std::io::Error) -> Self {
        Self::StorageUnavailable(format!("{what}: {err}"))
    }

    /// Joined validation reasons, empty for every other kind.
    pub fn reasons(&self) -> Vec<String> {
        match self {
            Self::ValidationRejected { reasons, .. } => reasons.clone(),
            _ => Vec::new(),
        }
    }
}

impl From<rusqlite::Error> for ArenaError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(inner, _)
                if matches!(
                    inner.code,
                    ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase
                ) =>
            {
                Self::StorageCorrupt(e.to_string())
            }
            // "no such column" / "no such table" surface as generic SQL
            // errors; a schema that does not match is corruption, not an
            // outage.
            rusqlite::Error::SqliteFailure(_, Some(msg))
                if msg.starts_with("no such") || msg.contains("has no column") =>
            {
                Self::StorageCorrupt(e.to_string())
            }
            rusqlite::Error::InvalidColumnType(..) | rusqlite::Error::InvalidColumnName(_) => {
                Self::StorageCorrupt(e.to_string())
            }
            _ => Self::StorageUnavailable(e.to_string()),
        }
    }
}
