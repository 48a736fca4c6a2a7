//! Watermark store: the last transaction consumed per root.
//!
//! Persists a [`Watermark`] JSON document at
//! `<home>/.tributary/watermarks/<root>.json`.
//! Writes use the same atomic `.tmp` + rename pattern as the root registry.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tributary_core::types::TxId;

use crate::error::{io_err, SyncError};

/// On-disk watermark payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Watermark {
    pub consumed: TxId,
    pub recorded_at: DateTime<Utc>,
}

impl Watermark {
    pub fn now(consumed: TxId) -> Self {
        Self {
            consumed,
            recorded_at: Utc::now(),
        }
    }
}

/// `~/.tributary/watermarks/<root>.json`
pub fn watermark_path_at(home: &Path, root: &str) -> PathBuf {
    home.join(".tributary")
        .join("watermarks")
        .join(format!("{root}.json"))
}

/// Load the watermark for `root`, or `None` if nothing was consumed yet.
pub fn load_at(home: &Path, root: &str) -> Result<Option<Watermark>, SyncError> {
    let path = watermark_path_at(home, root);
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Save the watermark for `root` atomically.
pub fn save_at(home: &Path, root: &str, watermark: &Watermark) -> Result<(), SyncError> {
    let path = watermark_path_at(home, root);
    let Some(dir) = path.parent() else {
        return Err(io_err(
            path,
            std::io::Error::other("invalid watermark path"),
        ));
    };

    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(watermark)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// Forget what was consumed for `root`; the next collection starts over.
pub fn clear_at(home: &Path, root: &str) -> Result<bool, SyncError> {
    let path = watermark_path_at(home, root);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_err(&path, e)),
    }
}
