// =============================================================================
// Document persistence — atomic JSON rewrite and tolerant reads
// =============================================================================
//
// Every JSON document the arena owns (registry, cup state, ranking,
// scoreboard, champions, config) is rewritten with the tmp + rename pattern
// so that a reader never observes a half-written file. The temporary sibling
// lives in the same directory, which keeps the rename on one filesystem.
// =============================================================================

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ArenaError;

/// Outcome of reading a document that is allowed to be absent or damaged.
#[derive(Debug)]
pub enum Loaded<T> {
    Present(T),
    Absent,
    Corrupt(String),
}

impl<T> Loaded<T> {
    /// Collapse to a value, logging when a damaged document is replaced by
    /// the fallback.
    pub fn or_else_default(self, path: &Path, fallback: impl FnOnce() -> T) -> T {
        match self {
            Self::Present(value) => value,
            Self::Absent => fallback(),
            Self::Corrupt(reason) => {
                warn!(path = %path.display(), reason = %reason, "unreadable document, using fallback");
                fallback()
            }
        }
    }
}

/// Read and parse a JSON document without ever failing.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Loaded<T> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Loaded::Absent,
        Err(e) => return Loaded::Corrupt(format!("read failed: {e}")),
    };
    match serde_json::from_str(&content) {
        Ok(value) => Loaded::Present(value),
        Err(e) => Loaded::Corrupt(format!("parse failed: {e}")),
    }
}

/// Serialise `value` as pretty JSON and atomically replace `path`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ArenaError> {
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| ArenaError::StorageUnavailable(format!("serialise {}: {e}", path.display())))?;
    write_atomic(path, content.as_bytes())
}

/// Atomically replace `path` with `bytes` (write sibling `.tmp`, fsync, rename).
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ArenaError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| ArenaError::io(format!("create dir {}", parent.display()), e))?;
    }

    let tmp_path = tmp_sibling(path);
    {
        let mut file = fs::File::create(&tmp_path)
            .map_err(|e| ArenaError::io(format!("create {}", tmp_path.display()), e))?;
        file.write_all(bytes)
            .map_err(|e| ArenaError::io(format!("write {}", tmp_path.display()), e))?;
        file.sync_all()
            .map_err(|e| ArenaError::io(format!("sync {}", tmp_path.display()), e))?;
    }

    fs::rename(&tmp_path, path)
        .map_err(|e| ArenaError::io(format!("rename onto {}", path.display()), e))?;

    debug!(path = %path.display(), bytes = bytes.len(), "document saved (atomic)");
    Ok(())
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
